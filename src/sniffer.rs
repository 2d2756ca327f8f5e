//! Classifies an incoming connection by peeking at the records carrying its
//! ClientHello.
//!
//! The sniffer reads the handshake records carrying the ClientHello into a
//! bounded buffer (a hello may be split across several records) and hands the
//! stream back wrapped in [`Rewind`], which replays those bytes before the live
//! socket so the handshake parser sees the connection from its first byte.
//!
//! 通过窥视承载 ClientHello 的握手记录来对连接进行分类。
//!
//! 嗅探器把这些记录读入有界缓冲区，并将流包装为 [`Rewind`] 返回；
//! [`Rewind`] 会先重放这些字节再读取真实套接字，因此握手解析器
//! 能从第一个字节开始看到整个连接。

use crate::crypto::suite::is_national_crypto_suite_id;
use crate::error::{Result, WireError};
use crate::protocol::codec::Reader;
use crate::protocol::message::{
    ClientHello, ContentType, EXTENSION_SUPPORTED_VERSIONS, HANDSHAKE_HEADER_LEN, HandshakeType,
    MAX_FRAGMENT_LEN, ProtocolVersion, RANDOM_LEN, RECORD_HEADER_LEN, RecordHeader,
    parse_supported_versions,
};
use bytes::{Buf, Bytes};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Matches the default `max_handshake_message_len` of the handshake settings.
const DEFAULT_MAX_HELLO_LEN: usize = 64 * 1024;

/// Which protocol family a ClientHello belongs to.
///
/// 客户端 Hello 所属的协议族。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolClassification {
    /// TLS 1.2 with an RSA certificate.
    Standard,
    /// GMSSL / TLCP with dual SM2 certificates.
    NationalCrypto,
    Unrecognized,
}

impl ProtocolClassification {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolClassification::Standard => "standard",
            ProtocolClassification::NationalCrypto => "national_crypto",
            ProtocolClassification::Unrecognized => "unrecognized",
        }
    }

    /// The version the server answers with for this family.
    pub fn server_version(self) -> Option<ProtocolVersion> {
        match self {
            ProtocolClassification::Standard => Some(ProtocolVersion::TLS12),
            ProtocolClassification::NationalCrypto => Some(ProtocolVersion::TLCP),
            ProtocolClassification::Unrecognized => None,
        }
    }
}

/// Inputs to the tie-break between the two families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassificationPolicy {
    /// Whether a national-crypto bundle set is configured. Opportunistic GM
    /// capability in a standard hello is only honoured when it is.
    pub national_crypto_available: bool,
}

/// The fields of a ClientHello that decide its family.
#[derive(Debug, Clone, Default)]
pub struct HelloSignals<'a> {
    pub version: Option<ProtocolVersion>,
    pub cipher_suites: &'a [u16],
    pub supported_versions: &'a [ProtocolVersion],
}

/// The classification policy, shared by the sniffer and the state machine so
/// both reach the same answer for the same hello.
///
/// * `0x0101` → national-crypto; `0x0303` → standard.
/// * Any other legacy version falls back to `supported_versions`, preferring
///   the national-crypto entry.
/// * A standard hello that also advertises GM capability (a GM suite or `0x0101`
///   in `supported_versions`) is national-crypto only when the server has a GM
///   bundle.
///
/// 分类策略，由嗅探器和状态机共用，保证同一个 Hello 得到同样的结果。
pub fn classify_hello(signals: &HelloSignals<'_>, policy: ClassificationPolicy) -> ProtocolClassification {
    let advertises_gm = signals.supported_versions.contains(&ProtocolVersion::TLCP)
        || signals
            .cipher_suites
            .iter()
            .any(|id| is_national_crypto_suite_id(*id));

    match signals.version {
        Some(ProtocolVersion::TLCP) => ProtocolClassification::NationalCrypto,
        Some(ProtocolVersion::TLS12) => {
            if advertises_gm && policy.national_crypto_available {
                ProtocolClassification::NationalCrypto
            } else {
                ProtocolClassification::Standard
            }
        }
        Some(_) if signals.supported_versions.contains(&ProtocolVersion::TLCP) => {
            ProtocolClassification::NationalCrypto
        }
        Some(_) if signals.supported_versions.contains(&ProtocolVersion::TLS12) => {
            ProtocolClassification::Standard
        }
        _ => ProtocolClassification::Unrecognized,
    }
}

/// Classifies a fully parsed ClientHello.
pub fn classify_client_hello(hello: &ClientHello, policy: ClassificationPolicy) -> ProtocolClassification {
    let supported_versions = hello.supported_versions();
    classify_hello(
        &HelloSignals {
            version: Some(hello.version),
            cipher_suites: &hello.cipher_suites,
            supported_versions: &supported_versions,
        },
        policy,
    )
}

/// Concatenates the fragments of the leading handshake records in `bytes`
/// (record headers included). Stops at the first record that is not a
/// plaintext handshake record; a record cut short contributes what is there.
fn handshake_payload(bytes: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut rest = bytes;
    while let Some(header) = rest.first_chunk::<RECORD_HEADER_LEN>() {
        let Ok(header) = RecordHeader::parse(header) else {
            break;
        };
        if header.content_type != ContentType::Handshake || header.length > MAX_FRAGMENT_LEN {
            break;
        }
        let end = (RECORD_HEADER_LEN + header.length).min(rest.len());
        payload.extend_from_slice(&rest[RECORD_HEADER_LEN..end]);
        rest = &rest[end..];
    }
    payload
}

/// Reads as much of the ClientHello as `payload` holds. The version is
/// mandatory; suites and extensions are best effort.
fn scan_hello(payload: &[u8]) -> std::result::Result<(ProtocolVersion, Vec<u16>, Vec<ProtocolVersion>), WireError> {
    let mut r = Reader::new(payload);
    let handshake_type = r.read_u8()?;
    if handshake_type != HandshakeType::ClientHello as u8 {
        return Err(WireError::UnknownHandshakeType(handshake_type));
    }
    let declared_len = r.read_u24()?;
    let mut r = Reader::new(r.take(declared_len.min(r.remaining()))?);
    let version = ProtocolVersion(r.read_u16()?);

    let mut suites = Vec::new();
    let mut supported = Vec::new();
    let mut rest = || -> std::result::Result<(), WireError> {
        r.take(RANDOM_LEN)?;
        r.read_u8_prefixed()?;
        let raw = r.read_u16_prefixed()?;
        suites.extend(raw.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])));
        r.read_u8_prefixed()?;
        if r.is_empty() {
            return Ok(());
        }
        let mut exts = Reader::new(r.read_u16_prefixed()?);
        while !exts.is_empty() {
            let ext_type = exts.read_u16()?;
            let data = exts.read_u16_prefixed()?;
            if ext_type == EXTENSION_SUPPORTED_VERSIONS {
                supported = parse_supported_versions(data);
            }
        }
        Ok(())
    };
    // Truncation past the version only loses tie-break signals.
    let _ = rest();
    Ok((version, suites, supported))
}

/// Whether `payload` still lacks part of the ClientHello it starts with.
fn needs_more(payload: &[u8], max_hello_len: usize) -> bool {
    let Some(header) = payload.first_chunk::<HANDSHAKE_HEADER_LEN>() else {
        return true;
    };
    if header[0] != HandshakeType::ClientHello as u8 {
        return false;
    }
    let declared = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
    declared <= max_hello_len && payload.len() < HANDSHAKE_HEADER_LEN + declared
}

/// Peeks at the leading handshake records and classifies the connection.
///
/// 窥视开头的握手记录并对连接进行分类。
#[derive(Debug, Clone, Copy)]
pub struct Sniffer {
    policy: ClassificationPolicy,
    max_hello_len: usize,
}

impl Sniffer {
    pub fn new(policy: ClassificationPolicy) -> Self {
        Self {
            policy,
            max_hello_len: DEFAULT_MAX_HELLO_LEN,
        }
    }

    /// Caps the ClientHello body the sniffer is willing to buffer.
    pub fn with_max_hello_len(mut self, max_hello_len: usize) -> Self {
        self.max_hello_len = max_hello_len;
        self
    }

    pub fn policy(&self) -> ClassificationPolicy {
        self.policy
    }

    /// Classifies the buffered records (headers included). The ClientHello may
    /// span several handshake records. Never fails: anything that does not
    /// start with a ClientHello record is `Unrecognized`.
    pub fn classify(&self, initial_bytes: &[u8]) -> ProtocolClassification {
        match scan_hello(&handshake_payload(initial_bytes)) {
            Ok((version, suites, supported)) => classify_hello(
                &HelloSignals {
                    version: Some(version),
                    cipher_suites: &suites,
                    supported_versions: &supported,
                },
                self.policy,
            ),
            Err(_) => ProtocolClassification::Unrecognized,
        }
    }

    /// Reads handshake records from `stream` until the whole ClientHello is
    /// buffered (never past it), classifies them and returns the stream with
    /// the consumed bytes queued for replay.
    ///
    /// A header that is not a plausible plaintext handshake header stops the
    /// read right there, as does a hello declaring more than the configured
    /// maximum; classification then works with what is buffered.
    ///
    /// 持续读取握手记录直到完整的 ClientHello 被缓冲（不会多读），
    /// 对其分类后返回流，已读取的字节会被重放。
    pub async fn sniff<S>(&self, mut stream: S) -> Result<(ProtocolClassification, Rewind<S>)>
    where
        S: AsyncRead + Unpin,
    {
        let mut buffered = Vec::new();
        let mut payload = Vec::new();
        loop {
            let start = buffered.len();
            buffered.resize(start + RECORD_HEADER_LEN, 0);
            stream.read_exact(&mut buffered[start..]).await?;
            let header = match buffered[start..]
                .first_chunk::<RECORD_HEADER_LEN>()
                .map(RecordHeader::parse)
            {
                Some(Ok(header))
                    if header.content_type == ContentType::Handshake
                        && header.length <= MAX_FRAGMENT_LEN =>
                {
                    header
                }
                _ => break,
            };

            let body = buffered.len();
            buffered.resize(body + header.length, 0);
            stream.read_exact(&mut buffered[body..]).await?;
            payload.extend_from_slice(&buffered[body..]);
            if !needs_more(&payload, self.max_hello_len) {
                break;
            }
        }
        let classification = self.classify(&buffered);
        Ok((classification, Rewind::new_buffered(stream, buffered.into())))
    }
}

/// A stream that first yields previously read bytes, then reads from `inner`.
/// Writes go straight to `inner`.
#[derive(Debug)]
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(inner: S) -> Self {
        Self {
            prefix: Bytes::new(),
            inner,
        }
    }

    pub fn new_buffered(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }

    /// Bytes still waiting to be replayed.
    pub fn buffered(&self) -> &[u8] {
        &self.prefix
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> (S, Bytes) {
        (self.inner, self.prefix)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.prefix.has_remaining() {
            let n = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..n]);
            self.prefix.advance(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
