//! Server configuration: which certificate families are served and how.
//!
//! The serving mode is a tagged variant resolved once at startup. Tunables that
//! an operator may keep in a file live in [`HandshakeSettings`], which
//! deserializes with serde.
//!
//! 服务器配置：提供哪些证书族以及如何提供。
//!
//! 服务模式是在启动时一次性确定的带标签变体。运维人员可能放在文件中的
//! 可调参数位于 [`HandshakeSettings`]，可通过 serde 反序列化。

use crate::bundle::{GmBundleSet, RsaBundleSet};
use crate::crypto::protection::RecordProtection;
use crate::crypto::suite::{CipherSuite, DEFAULT_NATIONAL_SUITES, DEFAULT_STANDARD_SUITES};
use crate::error::ConfigError;
use crate::protocol::message::HANDSHAKE_HEADER_LEN;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Which families the listener serves.
///
/// 监听器提供的协议族。
#[derive(Debug, Clone)]
pub enum ServerMode {
    /// TLS 1.2 with an RSA certificate only.
    Standard(RsaBundleSet),
    /// GMSSL with the sign/encrypt certificate pair only.
    NationalCrypto(GmBundleSet),
    /// Both families; each connection is dispatched on its ClientHello.
    AutoSwitch {
        national: GmBundleSet,
        standard: RsaBundleSet,
    },
}

impl ServerMode {
    pub fn standard(&self) -> Option<&RsaBundleSet> {
        match self {
            ServerMode::Standard(set) | ServerMode::AutoSwitch { standard: set, .. } => Some(set),
            ServerMode::NationalCrypto(_) => None,
        }
    }

    pub fn national(&self) -> Option<&GmBundleSet> {
        match self {
            ServerMode::NationalCrypto(set) | ServerMode::AutoSwitch { national: set, .. } => {
                Some(set)
            }
            ServerMode::Standard(_) => None,
        }
    }
}

/// Handshake tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandshakeSettings {
    /// Upper bound for one whole handshake, first byte to Finished.
    pub handshake_timeout_ms: u64,
    /// Connections beyond this many in-flight handshakes wait for a slot.
    pub max_concurrent_handshakes: usize,
    /// Largest handshake message body accepted from a client.
    pub max_handshake_message_len: usize,
    /// Server preference order for standard suites.
    pub standard_cipher_suites: Vec<CipherSuite>,
    /// Server preference order for national-crypto suites.
    pub national_cipher_suites: Vec<CipherSuite>,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            max_concurrent_handshakes: 1024,
            max_handshake_message_len: 64 * 1024,
            standard_cipher_suites: DEFAULT_STANDARD_SUITES.to_vec(),
            national_cipher_suites: DEFAULT_NATIONAL_SUITES.to_vec(),
        }
    }
}

impl HandshakeSettings {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Checks the limits and suite lists. Called by the config builder and
    /// again by [`crate::Listener::bind`], since the fields are public.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::InvalidSettings("handshake timeout must be positive"));
        }
        if self.max_concurrent_handshakes == 0 {
            return Err(ConfigError::InvalidSettings(
                "at least one concurrent handshake must be allowed",
            ));
        }
        if self.max_concurrent_handshakes > Semaphore::MAX_PERMITS {
            return Err(ConfigError::InvalidSettings(
                "max_concurrent_handshakes exceeds the semaphore permit limit",
            ));
        }
        if self.max_handshake_message_len < HANDSHAKE_HEADER_LEN {
            return Err(ConfigError::InvalidSettings(
                "max_handshake_message_len is too small for any message",
            ));
        }
        if self.standard_cipher_suites.is_empty() || self.national_cipher_suites.is_empty() {
            return Err(ConfigError::CipherPolicy("suite preference list is empty"));
        }
        if self
            .standard_cipher_suites
            .iter()
            .any(|suite| suite.is_national_crypto())
        {
            return Err(ConfigError::CipherPolicy(
                "national-crypto suite in the standard list",
            ));
        }
        if self
            .national_cipher_suites
            .iter()
            .any(|suite| !suite.is_national_crypto())
        {
            return Err(ConfigError::CipherPolicy(
                "standard suite in the national-crypto list",
            ));
        }
        Ok(())
    }
}

/// Everything a listener needs; immutable once built.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: ServerMode,
    pub settings: HandshakeSettings,
    pub record_protection: Arc<dyn RecordProtection>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder<Missing, Missing> {
        ServerConfigBuilder::new()
    }
}

/// Marker type for a missing field in the builder.
///
/// 用于在构建器中标记缺失字段的类型。
pub struct Missing;

/// A builder for [`ServerConfig`] that only offers `build` once the mode and
/// the record-protection collaborator are set.
///
/// [`ServerConfig`] 的构建器，只有在设置了模式和记录保护组件后才提供 `build`。
pub struct ServerConfigBuilder<Mode, Protection> {
    mode: Mode,
    record_protection: Protection,
    settings: HandshakeSettings,
}

impl ServerConfigBuilder<Missing, Missing> {
    pub fn new() -> Self {
        Self {
            mode: Missing,
            record_protection: Missing,
            settings: HandshakeSettings::default(),
        }
    }
}

impl Default for ServerConfigBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M, P> ServerConfigBuilder<M, P> {
    pub fn mode(self, mode: ServerMode) -> ServerConfigBuilder<ServerMode, P> {
        ServerConfigBuilder {
            mode,
            record_protection: self.record_protection,
            settings: self.settings,
        }
    }

    pub fn record_protection(
        self,
        protection: Arc<dyn RecordProtection>,
    ) -> ServerConfigBuilder<M, Arc<dyn RecordProtection>> {
        ServerConfigBuilder {
            mode: self.mode,
            record_protection: protection,
            settings: self.settings,
        }
    }

    pub fn settings(mut self, settings: HandshakeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.settings.handshake_timeout_ms = timeout.as_millis().max(1) as u64;
        self
    }
}

impl ServerConfigBuilder<ServerMode, Arc<dyn RecordProtection>> {
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.settings.validate()?;
        Ok(ServerConfig {
            mode: self.mode,
            settings: self.settings,
            record_protection: self.record_protection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: HandshakeSettings = serde_json::from_str(
            r#"{ "handshake_timeout_ms": 2500, "national_cipher_suites": ["ECC_SM4_CBC_SM3"] }"#,
        )
        .unwrap();
        assert_eq!(settings.handshake_timeout(), Duration::from_millis(2500));
        assert_eq!(settings.national_cipher_suites, vec![CipherSuite::EccSm4CbcSm3]);
        assert_eq!(
            settings.standard_cipher_suites,
            DEFAULT_STANDARD_SUITES.to_vec()
        );
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn cross_family_suite_lists_are_rejected() {
        let settings = HandshakeSettings {
            standard_cipher_suites: vec![CipherSuite::EccSm4GcmSm3],
            ..HandshakeSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::CipherPolicy(_))
        ));
    }

    #[test]
    fn concurrency_limit_is_bounded_by_semaphore_permits() {
        let json = format!(
            r#"{{ "max_concurrent_handshakes": {} }}"#,
            Semaphore::MAX_PERMITS as u64 + 1
        );
        let settings: HandshakeSettings = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidSettings(_))
        ));

        let zero = HandshakeSettings {
            max_concurrent_handshakes: 0,
            ..HandshakeSettings::default()
        };
        assert!(matches!(zero.validate(), Err(ConfigError::InvalidSettings(_))));

        let at_limit = HandshakeSettings {
            max_concurrent_handshakes: Semaphore::MAX_PERMITS,
            ..HandshakeSettings::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<HandshakeSettings>(r#"{ "handshake_timeout": 1 }"#);
        assert!(parsed.is_err());
    }
}
