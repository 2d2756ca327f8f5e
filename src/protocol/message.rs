//! Wire structures of the handshake: record header, handshake messages and alerts.
//!
//! Both families share the TLS 1.2 framing; they differ in the version number
//! (`0x0303` vs `0x0101`), the cipher suites and the content of the Certificate
//! and ServerKeyExchange messages.
//!
//! 握手的线上结构：记录头、握手消息和警报。
//! 两个协议族共用 TLS 1.2 的封装格式，区别在于版本号、密码套件，
//! 以及 Certificate 与 ServerKeyExchange 消息的内容。

use crate::error::WireError;
use crate::protocol::codec::{
    Reader, put_u8_prefixed, put_u16, put_u16_prefixed, put_u24, put_u24_prefixed,
};

pub const RECORD_HEADER_LEN: usize = 5;
pub const HANDSHAKE_HEADER_LEN: usize = 4;
/// Largest plaintext fragment a record may carry.
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;
/// Largest protected fragment a record may carry (plaintext + expansion).
pub const MAX_CIPHERTEXT_LEN: usize = MAX_FRAGMENT_LEN + 2048;
pub const RANDOM_LEN: usize = 32;

pub const EXTENSION_SUPPORTED_VERSIONS: u16 = 0x002b;

/// A protocol version as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    /// TLS 1.0, used by many clients as the record version of the first flight.
    pub const TLS10: ProtocolVersion = ProtocolVersion(0x0301);
    pub const TLS12: ProtocolVersion = ProtocolVersion(0x0303);
    /// GM/T 0024 (TLCP / "GMSSL 1.1").
    pub const TLCP: ProtocolVersion = ProtocolVersion(0x0101);

    /// Whether a record header may carry this version at all.
    pub fn is_plausible_record_version(self) -> bool {
        self == Self::TLCP || (self.0 >> 8) == 0x03
    }
}

/// Record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl TryFrom<u8> for ContentType {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            20 => Ok(ContentType::ChangeCipherSpec),
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            other => Err(WireError::UnknownContentType(other)),
        }
    }
}

/// The fixed five-byte header in front of every record.
///
/// 每条记录前固定的五字节头部。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub length: usize,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8; RECORD_HEADER_LEN]) -> Result<Self, WireError> {
        let content_type = ContentType::try_from(bytes[0])?;
        let version = ProtocolVersion(u16::from_be_bytes([bytes[1], bytes[2]]));
        if !version.is_plausible_record_version() {
            return Err(WireError::IllegalValue("record version"));
        }
        let length = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        if length > MAX_CIPHERTEXT_LEN {
            return Err(WireError::LengthOverflow {
                length,
                limit: MAX_CIPHERTEXT_LEN,
            });
        }
        if length == 0 && content_type != ContentType::ApplicationData {
            return Err(WireError::IllegalValue("empty record"));
        }
        Ok(Self {
            content_type,
            version,
            length,
        })
    }

    pub fn encode(&self) -> [u8; RECORD_HEADER_LEN] {
        let v = self.version.0.to_be_bytes();
        let l = (self.length as u16).to_be_bytes();
        [self.content_type as u8, v[0], v[1], l[0], l[1]]
    }
}

/// Frames `payload` as a single record. Callers keep `payload` within
/// [`MAX_CIPHERTEXT_LEN`].
pub fn encode_record(content_type: ContentType, version: ProtocolVersion, payload: &[u8]) -> Vec<u8> {
    let header = RecordHeader {
        content_type,
        version,
        length: payload.len(),
    };
    let mut out = Vec::with_capacity(RECORD_HEADER_LEN + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}

/// Handshake message types used by the two key-transport choreographies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    Certificate = 11,
    ServerKeyExchange = 12,
    ServerHelloDone = 14,
    ClientKeyExchange = 16,
    Finished = 20,
}

impl TryFrom<u8> for HandshakeType {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            11 => Ok(HandshakeType::Certificate),
            12 => Ok(HandshakeType::ServerKeyExchange),
            14 => Ok(HandshakeType::ServerHelloDone),
            16 => Ok(HandshakeType::ClientKeyExchange),
            20 => Ok(HandshakeType::Finished),
            other => Err(WireError::UnknownHandshakeType(other)),
        }
    }
}

/// A hello extension kept as raw bytes; only `supported_versions` is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: u16,
    pub data: Vec<u8>,
}

fn decode_extensions(r: &mut Reader<'_>) -> Result<Vec<Extension>, WireError> {
    if r.is_empty() {
        return Ok(Vec::new());
    }
    let mut block = Reader::new(r.read_u16_prefixed()?);
    let mut extensions = Vec::new();
    while !block.is_empty() {
        let extension_type = block.read_u16()?;
        let data = block.read_u16_prefixed()?.to_vec();
        extensions.push(Extension {
            extension_type,
            data,
        });
    }
    Ok(extensions)
}

fn encode_extensions(out: &mut Vec<u8>, extensions: &[Extension]) {
    if extensions.is_empty() {
        return;
    }
    let mut block = Vec::new();
    for ext in extensions {
        put_u16(&mut block, ext.extension_type);
        put_u16_prefixed(&mut block, &ext.data);
    }
    put_u16_prefixed(out, &block);
}

/// Client -> Server: opens the handshake.
///
/// 客户端 -> 服务器：发起握手。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<u8>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let version = ProtocolVersion(r.read_u16()?);
        let random = r.read_array::<RANDOM_LEN>()?;
        let session_id = r.read_u8_prefixed()?.to_vec();
        if session_id.len() > 32 {
            return Err(WireError::IllegalValue("session_id"));
        }
        let suites = r.read_u16_prefixed()?;
        if suites.is_empty() || suites.len() % 2 != 0 {
            return Err(WireError::IllegalValue("cipher_suites"));
        }
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        let compression_methods = r.read_u8_prefixed()?.to_vec();
        if !compression_methods.contains(&0) {
            return Err(WireError::IllegalValue("compression_methods"));
        }
        let extensions = decode_extensions(&mut r)?;
        r.finish()?;
        Ok(Self {
            version,
            random,
            session_id,
            cipher_suites,
            compression_methods,
            extensions,
        })
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        put_u16(out, self.version.0);
        out.extend_from_slice(&self.random);
        put_u8_prefixed(out, &self.session_id);
        let mut suites = Vec::with_capacity(self.cipher_suites.len() * 2);
        for suite in &self.cipher_suites {
            put_u16(&mut suites, *suite);
        }
        put_u16_prefixed(out, &suites);
        put_u8_prefixed(out, &self.compression_methods);
        encode_extensions(out, &self.extensions);
    }

    /// Versions listed in the `supported_versions` extension, if any.
    ///
    /// A malformed extension yields an empty list rather than an error; the
    /// legacy version field still decides the family in that case.
    pub fn supported_versions(&self) -> Vec<ProtocolVersion> {
        self.extensions
            .iter()
            .find(|ext| ext.extension_type == EXTENSION_SUPPORTED_VERSIONS)
            .map(|ext| parse_supported_versions(&ext.data))
            .unwrap_or_default()
    }
}

pub(crate) fn parse_supported_versions(data: &[u8]) -> Vec<ProtocolVersion> {
    let mut r = Reader::new(data);
    let Ok(list) = r.read_u8_prefixed() else {
        return Vec::new();
    };
    list.chunks_exact(2)
        .map(|c| ProtocolVersion(u16::from_be_bytes([c[0], c[1]])))
        .collect()
}

/// Server -> Client: the negotiated version, suite and the server random.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub version: ProtocolVersion,
    pub random: [u8; RANDOM_LEN],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub compression_method: u8,
}

impl ServerHello {
    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let version = ProtocolVersion(r.read_u16()?);
        let random = r.read_array::<RANDOM_LEN>()?;
        let session_id = r.read_u8_prefixed()?.to_vec();
        let cipher_suite = r.read_u16()?;
        let compression_method = r.read_u8()?;
        // Extensions are tolerated but ignored.
        decode_extensions(&mut r)?;
        r.finish()?;
        Ok(Self {
            version,
            random,
            session_id,
            cipher_suite,
            compression_method,
        })
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        put_u16(out, self.version.0);
        out.extend_from_slice(&self.random);
        put_u8_prefixed(out, &self.session_id);
        put_u16(out, self.cipher_suite);
        out.push(self.compression_method);
    }
}

/// A Certificate message: DER certificates, in wire order.
///
/// For the national-crypto family the first entry is the signing
/// (authentication) certificate and the second the encryption
/// (key-transport) certificate.
///
/// 证书消息：按线上顺序排列的 DER 证书。
/// 国密协议族中第一张为签名（认证）证书，第二张为加密（密钥传输）证书。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub certificates: Vec<Vec<u8>>,
}

impl Certificate {
    fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(body);
        let mut list = Reader::new(r.read_u24_prefixed()?);
        r.finish()?;
        let mut certificates = Vec::new();
        while !list.is_empty() {
            let der = list.read_u24_prefixed()?;
            if der.is_empty() {
                return Err(WireError::IllegalValue("certificate"));
            }
            certificates.push(der.to_vec());
        }
        Ok(Self { certificates })
    }

    fn encode_body(&self, out: &mut Vec<u8>) {
        let mut list = Vec::new();
        for der in &self.certificates {
            put_u24_prefixed(&mut list, der);
        }
        put_u24_prefixed(out, &list);
    }
}

/// GM/T 0024 ECC ServerKeyExchange: the signing key's signature over
/// `client_random ‖ server_random ‖ encryption certificate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerKeyExchange {
    pub signature: Vec<u8>,
}

/// Builds the bytes covered by the ServerKeyExchange signature.
pub fn server_key_exchange_signed_params(
    client_random: &[u8; RANDOM_LEN],
    server_random: &[u8; RANDOM_LEN],
    encryption_certificate: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * RANDOM_LEN + 3 + encryption_certificate.len());
    out.extend_from_slice(client_random);
    out.extend_from_slice(server_random);
    put_u24_prefixed(&mut out, encryption_certificate);
    out
}

/// Client -> Server: the pre-master secret encrypted to the key-transport key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKeyExchange {
    pub encrypted_pre_master_secret: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

/// Defines the messages exchanged during the handshake.
///
/// 定义握手过程中交换的消息。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    Certificate(Certificate),
    ServerKeyExchange(ServerKeyExchange),
    ServerHelloDone,
    ClientKeyExchange(ClientKeyExchange),
    Finished(Finished),
}

impl HandshakeMessage {
    pub fn handshake_type(&self) -> HandshakeType {
        match self {
            HandshakeMessage::ClientHello(_) => HandshakeType::ClientHello,
            HandshakeMessage::ServerHello(_) => HandshakeType::ServerHello,
            HandshakeMessage::Certificate(_) => HandshakeType::Certificate,
            HandshakeMessage::ServerKeyExchange(_) => HandshakeType::ServerKeyExchange,
            HandshakeMessage::ServerHelloDone => HandshakeType::ServerHelloDone,
            HandshakeMessage::ClientKeyExchange(_) => HandshakeType::ClientKeyExchange,
            HandshakeMessage::Finished(_) => HandshakeType::Finished,
        }
    }

    /// Decodes one complete message (4-byte header included).
    pub fn decode(message: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(message);
        let handshake_type = HandshakeType::try_from(r.read_u8()?)?;
        let body = r.read_u24_prefixed()?;
        r.finish()?;

        Ok(match handshake_type {
            HandshakeType::ClientHello => {
                HandshakeMessage::ClientHello(ClientHello::decode_body(body)?)
            }
            HandshakeType::ServerHello => {
                HandshakeMessage::ServerHello(ServerHello::decode_body(body)?)
            }
            HandshakeType::Certificate => {
                HandshakeMessage::Certificate(Certificate::decode_body(body)?)
            }
            HandshakeType::ServerKeyExchange => {
                let mut r = Reader::new(body);
                let signature = r.read_u16_prefixed()?.to_vec();
                r.finish()?;
                HandshakeMessage::ServerKeyExchange(ServerKeyExchange { signature })
            }
            HandshakeType::ServerHelloDone => {
                if !body.is_empty() {
                    return Err(WireError::TrailingBytes(body.len()));
                }
                HandshakeMessage::ServerHelloDone
            }
            HandshakeType::ClientKeyExchange => {
                let mut r = Reader::new(body);
                let encrypted_pre_master_secret = r.read_u16_prefixed()?.to_vec();
                r.finish()?;
                if encrypted_pre_master_secret.is_empty() {
                    return Err(WireError::IllegalValue("encrypted_pre_master_secret"));
                }
                HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
                    encrypted_pre_master_secret,
                })
            }
            HandshakeType::Finished => HandshakeMessage::Finished(Finished {
                verify_data: body.to_vec(),
            }),
        })
    }

    /// Encodes the message with its 4-byte handshake header.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        match self {
            HandshakeMessage::ClientHello(hello) => hello.encode_body(&mut body),
            HandshakeMessage::ServerHello(hello) => hello.encode_body(&mut body),
            HandshakeMessage::Certificate(cert) => cert.encode_body(&mut body),
            HandshakeMessage::ServerKeyExchange(ske) => put_u16_prefixed(&mut body, &ske.signature),
            HandshakeMessage::ServerHelloDone => {}
            HandshakeMessage::ClientKeyExchange(cke) => {
                put_u16_prefixed(&mut body, &cke.encrypted_pre_master_secret)
            }
            HandshakeMessage::Finished(fin) => body.extend_from_slice(&fin.verify_data),
        }
        let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
        out.push(self.handshake_type() as u8);
        put_u24(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }
}

pub const ALERT_LEVEL_WARNING: u8 = 1;
pub const ALERT_LEVEL_FATAL: u8 = 2;
pub const ALERT_CLOSE_NOTIFY: u8 = 0;
pub const ALERT_HANDSHAKE_FAILURE: u8 = 40;

/// A two-byte alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alert {
    pub level: u8,
    pub description: u8,
}

impl Alert {
    /// The single alert a peer ever sees when the server aborts a handshake.
    pub const HANDSHAKE_FAILURE: Alert = Alert {
        level: ALERT_LEVEL_FATAL,
        description: ALERT_HANDSHAKE_FAILURE,
    };

    pub const CLOSE_NOTIFY: Alert = Alert {
        level: ALERT_LEVEL_WARNING,
        description: ALERT_CLOSE_NOTIFY,
    };

    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(payload);
        let level = r.read_u8()?;
        let description = r.read_u8()?;
        r.finish()?;
        Ok(Self { level, description })
    }

    pub fn encode(&self) -> [u8; 2] {
        [self.level, self.description]
    }
}
