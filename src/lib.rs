//! A server-side handshake front end that serves TLS 1.2 (RSA certificate) and
//! GMSSL/TLCP (SM2 signing + encryption certificate pair) on one port,
//! switching per connection on what the ClientHello asks for.
//!
//! 在同一端口上同时提供 TLS 1.2（RSA 证书）与 GMSSL/TLCP（SM2 签名证书 +
//! 加密证书）的服务器端握手前端，按每个连接的 ClientHello 自动切换。
//!
//! ```text
//! TcpStream ─▶ Sniffer ─▶ Selector ─▶ HandshakeServer ─▶ SecureChannel
//!              (classify)  (bundles)   (typestate)
//! ```

pub mod bundle;
pub mod channel;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod listener;
pub mod protocol;
pub mod selector;
pub mod sniffer;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use bundle::{
    AuthenticationBundle, CertificateBundle, CertificateRole, GmBundleSet, KeyTransportBundle,
    RsaBundleSet,
};
pub use channel::SecureChannel;
pub use config::{HandshakeSettings, ServerConfig, ServerMode};
pub use crypto::keys::{KeyScheme, PrivateKey};
pub use crypto::protection::{RecordProtection, RecordProtector};
pub use crypto::suite::CipherSuite;
pub use error::{ConfigError, HandshakeError, PrimitiveError, WireError};
pub use listener::{Acceptor, Listener, ListenerError, ListenerHandle, serve};
pub use protocol::state::Phase;
pub use selector::{BundleSet, Selector};
pub use sniffer::{ProtocolClassification, Rewind, Sniffer};
