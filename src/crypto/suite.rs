//! Cipher suites of both protocol families and the parameters derived from them.
//!
//! 两个协议族的密码套件及其派生参数。

use serde::{Deserialize, Serialize};

/// Hash function that drives the PRF and the transcript digest of a suite.
///
/// 驱动某个套件的 PRF 和握手记录摘要的哈希函数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sm3,
}

impl HashAlgorithm {
    pub const fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sm3 => 32,
            HashAlgorithm::Sha384 => 48,
        }
    }
}

/// Lengths of the per-direction key material carved out of the key block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMaterialLengths {
    pub mac_key_len: usize,
    pub enc_key_len: usize,
    pub fixed_iv_len: usize,
}

impl KeyMaterialLengths {
    /// Total key block length covering both directions.
    pub const fn key_block_len(&self) -> usize {
        2 * (self.mac_key_len + self.enc_key_len + self.fixed_iv_len)
    }
}

/// A key-transport cipher suite this server can negotiate.
///
/// Standard suites use RSA key transport with the single authentication
/// certificate; national-crypto suites use SM2 key transport through the
/// dedicated encryption certificate.
///
/// 本服务器可协商的密钥传输密码套件。
///
/// 标准套件使用 RSA 密钥传输并复用唯一的认证证书；
/// 国密套件通过专用的加密证书进行 SM2 密钥传输。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherSuite {
    #[serde(rename = "TLS_RSA_WITH_AES_128_GCM_SHA256")]
    RsaWithAes128GcmSha256,
    #[serde(rename = "TLS_RSA_WITH_AES_256_GCM_SHA384")]
    RsaWithAes256GcmSha384,
    #[serde(rename = "TLS_RSA_WITH_AES_128_CBC_SHA256")]
    RsaWithAes128CbcSha256,
    #[serde(rename = "ECC_SM4_CBC_SM3")]
    EccSm4CbcSm3,
    #[serde(rename = "ECC_SM4_GCM_SM3")]
    EccSm4GcmSm3,
}

/// Server preference order for the standard family.
pub const DEFAULT_STANDARD_SUITES: &[CipherSuite] = &[
    CipherSuite::RsaWithAes128GcmSha256,
    CipherSuite::RsaWithAes256GcmSha384,
    CipherSuite::RsaWithAes128CbcSha256,
];

/// Server preference order for the national-crypto family.
pub const DEFAULT_NATIONAL_SUITES: &[CipherSuite] =
    &[CipherSuite::EccSm4GcmSm3, CipherSuite::EccSm4CbcSm3];

// GM/T 0024 identifiers, including the ECDHE/IBC variants this server does not
// negotiate. Offering any of them signals national-crypto capability.
const GM_SUITE_IDS: &[u16] = &[0xE001, 0xE003, 0xE011, 0xE013, 0xE015, 0xE017, 0xE019, 0xE051, 0xE053];

impl CipherSuite {
    pub const ALL: [CipherSuite; 5] = [
        CipherSuite::RsaWithAes128GcmSha256,
        CipherSuite::RsaWithAes256GcmSha384,
        CipherSuite::RsaWithAes128CbcSha256,
        CipherSuite::EccSm4CbcSm3,
        CipherSuite::EccSm4GcmSm3,
    ];

    pub const fn id(self) -> u16 {
        match self {
            CipherSuite::RsaWithAes128GcmSha256 => 0x009C,
            CipherSuite::RsaWithAes256GcmSha384 => 0x009D,
            CipherSuite::RsaWithAes128CbcSha256 => 0x003C,
            CipherSuite::EccSm4CbcSm3 => 0xE013,
            CipherSuite::EccSm4GcmSm3 => 0xE053,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|suite| suite.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            CipherSuite::RsaWithAes128GcmSha256 => "TLS_RSA_WITH_AES_128_GCM_SHA256",
            CipherSuite::RsaWithAes256GcmSha384 => "TLS_RSA_WITH_AES_256_GCM_SHA384",
            CipherSuite::RsaWithAes128CbcSha256 => "TLS_RSA_WITH_AES_128_CBC_SHA256",
            CipherSuite::EccSm4CbcSm3 => "ECC_SM4_CBC_SM3",
            CipherSuite::EccSm4GcmSm3 => "ECC_SM4_GCM_SM3",
        }
    }

    pub const fn is_national_crypto(self) -> bool {
        matches!(self, CipherSuite::EccSm4CbcSm3 | CipherSuite::EccSm4GcmSm3)
    }

    pub const fn hash(self) -> HashAlgorithm {
        match self {
            CipherSuite::RsaWithAes128GcmSha256 | CipherSuite::RsaWithAes128CbcSha256 => {
                HashAlgorithm::Sha256
            }
            CipherSuite::RsaWithAes256GcmSha384 => HashAlgorithm::Sha384,
            CipherSuite::EccSm4CbcSm3 | CipherSuite::EccSm4GcmSm3 => HashAlgorithm::Sm3,
        }
    }

    pub const fn is_aead(self) -> bool {
        matches!(
            self,
            CipherSuite::RsaWithAes128GcmSha256
                | CipherSuite::RsaWithAes256GcmSha384
                | CipherSuite::EccSm4GcmSm3
        )
    }

    pub const fn key_material(self) -> KeyMaterialLengths {
        match self {
            CipherSuite::RsaWithAes128GcmSha256 => KeyMaterialLengths {
                mac_key_len: 0,
                enc_key_len: 16,
                fixed_iv_len: 4,
            },
            CipherSuite::RsaWithAes256GcmSha384 => KeyMaterialLengths {
                mac_key_len: 0,
                enc_key_len: 32,
                fixed_iv_len: 4,
            },
            // TLS 1.2 CBC carries an explicit per-record IV.
            CipherSuite::RsaWithAes128CbcSha256 => KeyMaterialLengths {
                mac_key_len: 32,
                enc_key_len: 16,
                fixed_iv_len: 0,
            },
            // GM/T 0024 derives the CBC IV from the key block.
            CipherSuite::EccSm4CbcSm3 => KeyMaterialLengths {
                mac_key_len: 32,
                enc_key_len: 16,
                fixed_iv_len: 16,
            },
            CipherSuite::EccSm4GcmSm3 => KeyMaterialLengths {
                mac_key_len: 0,
                enc_key_len: 16,
                fixed_iv_len: 4,
            },
        }
    }
}

/// Whether a raw suite identifier belongs to the GM/T 0024 range.
pub fn is_national_crypto_suite_id(id: u16) -> bool {
    GM_SUITE_IDS.contains(&id)
}

/// Picks the first suite in `preference` that the client offered.
///
/// Server preference wins, as in the usual TLS 1.2 server behaviour.
///
/// 按服务器偏好选择客户端提供的第一个套件。
pub fn negotiate(preference: &[CipherSuite], offered: &[u16]) -> Option<CipherSuite> {
    preference
        .iter()
        .copied()
        .find(|suite| offered.contains(&suite.id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_lookup() {
        for suite in CipherSuite::ALL {
            assert_eq!(CipherSuite::from_id(suite.id()), Some(suite));
        }
        assert_eq!(CipherSuite::from_id(0x1301), None);
    }

    #[test]
    fn negotiation_follows_server_preference() {
        let offered = [0x009D, 0x009C];
        assert_eq!(
            negotiate(DEFAULT_STANDARD_SUITES, &offered),
            Some(CipherSuite::RsaWithAes128GcmSha256)
        );
        assert_eq!(negotiate(DEFAULT_NATIONAL_SUITES, &offered), None);
    }

    #[test]
    fn gm_range_includes_unsupported_ecdhe_suites() {
        assert!(is_national_crypto_suite_id(0xE011));
        assert!(is_national_crypto_suite_id(CipherSuite::EccSm4CbcSm3.id()));
        assert!(!is_national_crypto_suite_id(0x009C));
    }

    #[test]
    fn suite_names_deserialize_from_iana_style_strings() {
        let suite: CipherSuite = serde_json::from_str("\"ECC_SM4_CBC_SM3\"").unwrap();
        assert_eq!(suite, CipherSuite::EccSm4CbcSm3);
        assert_eq!(suite.hash(), HashAlgorithm::Sm3);
    }
}
