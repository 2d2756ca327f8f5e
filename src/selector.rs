//! Maps a classification to the certificate bundles and cipher policy of the
//! matching family.

use crate::bundle::{AuthenticationBundle, GmBundleSet, KeyTransportBundle, RsaBundleSet};
use crate::config::{HandshakeSettings, ServerMode};
use crate::crypto::suite::CipherSuite;
use crate::error::ConfigError;
use crate::sniffer::{ClassificationPolicy, ProtocolClassification};
use std::sync::Arc;

/// The certificates a connection will present, by family.
#[derive(Debug, Clone)]
pub enum SelectedCertificates {
    Standard(RsaBundleSet),
    NationalCrypto(GmBundleSet),
}

/// The outcome of selection: certificates plus the family's suite preference.
///
/// 选择结果：证书以及该协议族的套件偏好。
#[derive(Debug, Clone)]
pub struct BundleSet {
    certificates: SelectedCertificates,
    cipher_suites: Arc<[CipherSuite]>,
}

impl BundleSet {
    pub fn certificates(&self) -> &SelectedCertificates {
        &self.certificates
    }

    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    pub fn classification(&self) -> ProtocolClassification {
        match self.certificates {
            SelectedCertificates::Standard(_) => ProtocolClassification::Standard,
            SelectedCertificates::NationalCrypto(_) => ProtocolClassification::NationalCrypto,
        }
    }

    pub fn authentication(&self) -> &AuthenticationBundle {
        match &self.certificates {
            SelectedCertificates::Standard(set) => set.authentication(),
            SelectedCertificates::NationalCrypto(set) => set.authentication(),
        }
    }

    /// The dedicated encryption bundle; `None` for the standard family.
    pub fn key_transport(&self) -> Option<&KeyTransportBundle> {
        match &self.certificates {
            SelectedCertificates::Standard(_) => None,
            SelectedCertificates::NationalCrypto(set) => Some(set.key_transport()),
        }
    }
}

/// Read-only table from family to bundle set, built once at startup and shared
/// by every connection.
///
/// 从协议族到证书包集合的只读映射表，启动时构建一次，由所有连接共享。
#[derive(Debug, Clone)]
pub struct Selector {
    standard: Option<BundleSet>,
    national: Option<BundleSet>,
}

impl Selector {
    pub fn new(mode: &ServerMode, settings: &HandshakeSettings) -> Self {
        let standard = mode.standard().map(|set| BundleSet {
            certificates: SelectedCertificates::Standard(set.clone()),
            cipher_suites: settings.standard_cipher_suites.clone().into(),
        });
        let national = mode.national().map(|set| BundleSet {
            certificates: SelectedCertificates::NationalCrypto(set.clone()),
            cipher_suites: settings.national_cipher_suites.clone().into(),
        });
        Self { standard, national }
    }

    /// The tie-break policy implied by the configured families.
    pub fn policy(&self) -> ClassificationPolicy {
        ClassificationPolicy {
            national_crypto_available: self.national.is_some(),
        }
    }

    /// Pure lookup; fails when the family is unrecognized or not configured.
    pub fn select(&self, classification: ProtocolClassification) -> Result<BundleSet, ConfigError> {
        let slot = match classification {
            ProtocolClassification::Standard => self.standard.as_ref(),
            ProtocolClassification::NationalCrypto => self.national.as_ref(),
            ProtocolClassification::Unrecognized => None,
        };
        slot.cloned()
            .ok_or(ConfigError::UnsupportedProtocol(classification))
    }
}
