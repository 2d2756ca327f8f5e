//! Certificate bundles: (certificate chain, private key) pairs tagged by role.
//!
//! The two roles are separate types. A GM bundle set is assembled from one
//! [`AuthenticationBundle`] and one [`KeyTransportBundle`], so putting the
//! encryption certificate where the signing certificate belongs does not type
//! check; bundles built from an untyped [`CertificateBundle`] have their role
//! tag checked at conversion time.
//!
//! 证书包：按角色标记的（证书链，私钥）对。
//!
//! 两种角色是不同的类型。国密证书包集合由一个 [`AuthenticationBundle`]
//! 和一个 [`KeyTransportBundle`] 组成，因此把加密证书放到签名证书的位置
//! 无法通过类型检查；由无类型的 [`CertificateBundle`] 转换而来的证书包
//! 会在转换时检查角色标记。

use crate::crypto::keys::{KeyScheme, PrivateKey};
use crate::error::{ConfigError, PrimitiveError};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// What a certificate's key is used for during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertificateRole {
    /// Proves server identity by signing (the only role in the RSA family).
    Authentication,
    /// Decrypts the client's pre-master secret (national-crypto family only).
    KeyTransport,
}

/// A certificate chain (DER, leaf first) with its private key, tagged by role.
///
/// 带角色标记的证书链（DER 编码，叶子证书在前）及其私钥。
#[derive(Clone)]
pub struct CertificateBundle {
    role: CertificateRole,
    certificate_chain: Arc<[Vec<u8>]>,
    private_key: Arc<dyn PrivateKey>,
}

impl CertificateBundle {
    pub fn new(
        role: CertificateRole,
        certificate_chain: Vec<Vec<u8>>,
        private_key: Arc<dyn PrivateKey>,
    ) -> Result<Self, ConfigError> {
        if certificate_chain.is_empty() || certificate_chain.iter().any(Vec::is_empty) {
            return Err(ConfigError::EmptyCertificateChain);
        }
        Ok(Self {
            role,
            certificate_chain: certificate_chain.into(),
            private_key,
        })
    }

    pub fn role(&self) -> CertificateRole {
        self.role
    }

    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.certificate_chain
    }

    /// The leaf certificate (first entry of the chain).
    pub fn leaf(&self) -> &[u8] {
        // The constructor rejects empty chains.
        &self.certificate_chain[0]
    }

    pub fn key_scheme(&self) -> KeyScheme {
        self.private_key.scheme()
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("role", &self.role)
            .field("chain_len", &self.certificate_chain.len())
            .field("key_scheme", &self.private_key.scheme())
            .finish()
    }
}

/// A bundle whose key may only sign.
#[derive(Debug, Clone)]
pub struct AuthenticationBundle(CertificateBundle);

/// A bundle whose key may only decrypt key-transport ciphertexts.
#[derive(Debug, Clone)]
pub struct KeyTransportBundle(CertificateBundle);

impl AuthenticationBundle {
    pub fn new(
        certificate_chain: Vec<Vec<u8>>,
        private_key: Arc<dyn PrivateKey>,
    ) -> Result<Self, ConfigError> {
        CertificateBundle::new(CertificateRole::Authentication, certificate_chain, private_key)
            .map(Self)
    }

    pub fn bundle(&self) -> &CertificateBundle {
        &self.0
    }

    /// Signs handshake parameters with the authentication key.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        self.0.private_key.sign(message)
    }

    /// Opens a ciphertext with the authentication key.
    ///
    /// Only the RSA family transports keys with its authentication certificate;
    /// the GM handshake calls this solely to diagnose a client that encrypted
    /// to the wrong certificate.
    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
        self.0.private_key.decrypt(ciphertext)
    }
}

impl KeyTransportBundle {
    pub fn new(
        certificate_chain: Vec<Vec<u8>>,
        private_key: Arc<dyn PrivateKey>,
    ) -> Result<Self, ConfigError> {
        CertificateBundle::new(CertificateRole::KeyTransport, certificate_chain, private_key)
            .map(Self)
    }

    pub fn bundle(&self) -> &CertificateBundle {
        &self.0
    }

    /// Decrypts the client's encrypted pre-master secret.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
        self.0.private_key.decrypt(ciphertext)
    }
}

impl TryFrom<CertificateBundle> for AuthenticationBundle {
    type Error = ConfigError;

    fn try_from(bundle: CertificateBundle) -> Result<Self, Self::Error> {
        match bundle.role {
            CertificateRole::Authentication => Ok(Self(bundle)),
            CertificateRole::KeyTransport => Err(ConfigError::CertificateRoleMismatch(
                "key-transport bundle used as authentication bundle",
            )),
        }
    }
}

impl TryFrom<CertificateBundle> for KeyTransportBundle {
    type Error = ConfigError;

    fn try_from(bundle: CertificateBundle) -> Result<Self, Self::Error> {
        match bundle.role {
            CertificateRole::KeyTransport => Ok(Self(bundle)),
            CertificateRole::Authentication => Err(ConfigError::CertificateRoleMismatch(
                "authentication bundle used as key-transport bundle",
            )),
        }
    }
}

/// The RSA family: exactly one authentication bundle, no key-transport bundle.
#[derive(Debug, Clone)]
pub struct RsaBundleSet {
    authentication: AuthenticationBundle,
}

impl RsaBundleSet {
    pub fn new(authentication: AuthenticationBundle) -> Result<Self, ConfigError> {
        let found = authentication.bundle().key_scheme();
        if found != KeyScheme::Rsa {
            return Err(ConfigError::KeySchemeMismatch {
                found,
                family: "standard",
            });
        }
        Ok(Self { authentication })
    }

    pub fn authentication(&self) -> &AuthenticationBundle {
        &self.authentication
    }
}

/// The national-crypto family: one signing bundle and one encryption bundle.
///
/// 国密协议族：一个签名证书包和一个加密证书包。
#[derive(Debug, Clone)]
pub struct GmBundleSet {
    authentication: AuthenticationBundle,
    key_transport: KeyTransportBundle,
}

impl GmBundleSet {
    pub fn new(
        authentication: AuthenticationBundle,
        key_transport: KeyTransportBundle,
    ) -> Result<Self, ConfigError> {
        for found in [
            authentication.bundle().key_scheme(),
            key_transport.bundle().key_scheme(),
        ] {
            if found != KeyScheme::Sm2 {
                return Err(ConfigError::KeySchemeMismatch {
                    found,
                    family: "national-crypto",
                });
            }
        }
        if authentication.bundle().leaf() == key_transport.bundle().leaf() {
            return Err(ConfigError::CertificateRoleMismatch(
                "signing and encryption certificates must differ",
            ));
        }
        Ok(Self {
            authentication,
            key_transport,
        })
    }

    pub fn authentication(&self) -> &AuthenticationBundle {
        &self.authentication
    }

    pub fn key_transport(&self) -> &KeyTransportBundle {
        &self.key_transport
    }
}
