use crate::sniffer::ProtocolClassification;
use thiserror::Error;

/// An error raised while decoding wire structures (records, handshake messages).
///
/// These never escape on their own: the state machine wraps them in
/// [`HandshakeError::MalformedRecord`].
///
/// 解码线上结构（记录、握手消息）时产生的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// The input ended before a complete field could be read.
    ///
    /// 输入在读取完整字段之前结束。
    #[error("truncated input: needed {needed} more byte(s)")]
    Truncated { needed: usize },

    /// A structure was followed by bytes that belong to no field.
    ///
    /// 结构之后存在不属于任何字段的多余字节。
    #[error("{0} trailing byte(s) after structure")]
    TrailingBytes(usize),

    /// A declared length exceeds the limit allowed for that field.
    ///
    /// 声明的长度超过该字段允许的上限。
    #[error("declared length {length} exceeds limit {limit}")]
    LengthOverflow { length: usize, limit: usize },

    /// The record carries a content type this endpoint does not speak.
    #[error("unknown record content type {0}")]
    UnknownContentType(u8),

    /// The handshake message type is not part of either supported family.
    #[error("unknown handshake message type {0}")]
    UnknownHandshakeType(u8),

    /// A field holds a value the protocol forbids.
    #[error("illegal value in field `{0}`")]
    IllegalValue(&'static str),
}

/// Failures of a primitive collaborator (private key or record protection).
///
/// The message is deliberately coarse; callers map it onto
/// [`HandshakeError::CryptoVerificationFailure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("primitive operation failed: {0}")]
pub struct PrimitiveError(pub &'static str);

/// Errors raised while assembling certificate bundles or selecting them.
///
/// 组装或选择证书包时产生的错误。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The classification has no configured bundle set (or is `Unrecognized`).
    ///
    /// 该分类没有已配置的证书包集合（或分类为 `Unrecognized`）。
    #[error("no certificate bundle configured for {0:?}")]
    UnsupportedProtocol(ProtocolClassification),

    /// A bundle was placed in a slot reserved for the other role, or the two
    /// GM bundles share one certificate.
    ///
    /// 证书包被放入另一角色的位置，或两个国密证书包共用同一张证书。
    #[error("certificate role mismatch: {0}")]
    CertificateRoleMismatch(&'static str),

    /// A bundle carries no certificate at all.
    #[error("certificate chain is empty")]
    EmptyCertificateChain,

    /// The private key's scheme does not belong to the bundle's family.
    #[error("key scheme {found:?} cannot serve the {family} family")]
    KeySchemeMismatch {
        found: crate::crypto::keys::KeyScheme,
        family: &'static str,
    },

    /// A cipher-suite preference list is empty or names a suite of the other family.
    #[error("cipher suite policy invalid: {0}")]
    CipherPolicy(&'static str),

    /// A handshake limit is out of range.
    #[error("invalid handshake settings: {0}")]
    InvalidSettings(&'static str),
}

/// The terminal error of one connection's handshake.
///
/// Every variant ends the connection only, never the process, and none is
/// retried by the server. Peers only ever observe a generic
/// `handshake_failure` alert; the variant is reserved for operator logs.
///
/// 单个连接握手的终止性错误。
///
/// 所有变体只终止当前连接，不会终止进程，服务器也不会重试。
/// 对端只会看到通用的 `handshake_failure` 警报；具体变体仅用于运维日志。
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed record: {0}")]
    MalformedRecord(#[from] WireError),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(ConfigError),

    #[error("certificate role mismatch: {0}")]
    CertificateRoleMismatch(&'static str),

    #[error("cryptographic verification failed: {0}")]
    CryptoVerificationFailure(&'static str),

    #[error("handshake did not complete within the configured timeout")]
    HandshakeTimeout,

    #[error("received an unexpected or out-of-order message for the current state")]
    UnexpectedMessage,

    #[error("client hello parsed as {parsed:?} but was sniffed as {sniffed:?}")]
    ClassificationMismatch {
        sniffed: ProtocolClassification,
        parsed: ProtocolClassification,
    },

    #[error("no cipher suite offered by the client is enabled for this family")]
    NoCommonCipherSuite,

    #[error("peer sent alert {description} (level {level})")]
    PeerAlert { level: u8, description: u8 },

    #[error("configuration error: {0}")]
    Config(ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandshakeError {
    /// A short, stable tag for structured logging.
    ///
    /// 用于结构化日志的简短稳定标签。
    pub fn failure_reason(&self) -> &'static str {
        match self {
            HandshakeError::MalformedRecord(_) => "malformed_record",
            HandshakeError::UnsupportedProtocol(_) => "unsupported_protocol",
            HandshakeError::CertificateRoleMismatch(_) => "certificate_role_mismatch",
            HandshakeError::CryptoVerificationFailure(_) => "crypto_verification_failure",
            HandshakeError::HandshakeTimeout => "handshake_timeout",
            HandshakeError::UnexpectedMessage => "unexpected_message",
            HandshakeError::ClassificationMismatch { .. } => "classification_mismatch",
            HandshakeError::NoCommonCipherSuite => "no_common_cipher_suite",
            HandshakeError::PeerAlert { .. } => "peer_alert",
            HandshakeError::Config(_) => "config",
            HandshakeError::Io(_) => "io",
        }
    }
}

impl From<ConfigError> for HandshakeError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnsupportedProtocol(_) => HandshakeError::UnsupportedProtocol(err),
            ConfigError::CertificateRoleMismatch(what) => {
                HandshakeError::CertificateRoleMismatch(what)
            }
            other => HandshakeError::Config(other),
        }
    }
}

impl From<PrimitiveError> for HandshakeError {
    fn from(err: PrimitiveError) -> Self {
        HandshakeError::CryptoVerificationFailure(err.0)
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
