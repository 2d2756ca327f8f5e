//! Deterministic stand-ins for the primitive collaborators, bundle fixtures and
//! a scripted client, for unit and integration tests.
//!
//! Nothing here is cryptographically meaningful: keys and record protection are
//! keyed SHA-256 keystreams with an integrity tag, which is enough to make a
//! wrong key or a flipped byte fail the way the real primitives would.
//!
//! 用于单元测试和集成测试的确定性原语替身、证书包夹具以及脚本化客户端。
//! 这里的实现不具备任何密码学意义。

mod client;
mod keys;
mod protection;

pub use client::{ClientOptions, KeyTarget, Observed, TestClient};
pub use keys::{ToyKey, ToyPublicKey, toy_ca_certificate};
pub use protection::ToyRecordProtection;

use crate::bundle::{AuthenticationBundle, GmBundleSet, KeyTransportBundle, RsaBundleSet};
use crate::config::{ServerConfig, ServerMode};
use crate::crypto::keys::KeyScheme;
use std::sync::Arc;
use std::time::Duration;

/// An RSA bundle set whose chain is `[leaf, toy CA]`.
pub fn rsa_bundle_set(id: u8) -> RsaBundleSet {
    let key = ToyKey::new(KeyScheme::Rsa, id);
    let chain = vec![key.certificate(), toy_ca_certificate()];
    let auth = AuthenticationBundle::new(chain, Arc::new(key)).unwrap();
    RsaBundleSet::new(auth).unwrap()
}

/// A GM bundle set with single-certificate chains.
pub fn gm_bundle_set(sign_id: u8, enc_id: u8) -> GmBundleSet {
    let sign = ToyKey::new(KeyScheme::Sm2, sign_id);
    let enc = ToyKey::new(KeyScheme::Sm2, enc_id);
    let auth = AuthenticationBundle::new(vec![sign.certificate()], Arc::new(sign)).unwrap();
    let kt = KeyTransportBundle::new(vec![enc.certificate()], Arc::new(enc)).unwrap();
    GmBundleSet::new(auth, kt).unwrap()
}

/// The mode used throughout the tests: GM signing key 1, encryption key 2, RSA key 3.
pub fn auto_switch_mode() -> ServerMode {
    ServerMode::AutoSwitch {
        national: gm_bundle_set(1, 2),
        standard: rsa_bundle_set(3),
    }
}

pub fn server_config(mode: ServerMode) -> ServerConfig {
    ServerConfig::builder()
        .mode(mode)
        .record_protection(Arc::new(ToyRecordProtection))
        .handshake_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

