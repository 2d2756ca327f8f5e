//! Runs the sans-I/O state machine against an async byte stream.
//!
//! The driver owns framing concerns only: reading records, reassembling
//! handshake messages, enforcing the negotiated record version and writing the
//! server's flights. Every decision about message content stays in
//! [`HandshakeServer`].
//!
//! 在异步字节流上驱动无 I/O 的状态机。驱动器只负责记录读取、握手消息重组、
//! 记录版本校验以及写出服务器消息；所有关于消息内容的判断都留在
//! [`HandshakeServer`] 中。

use crate::crypto::suite::CipherSuite;
use crate::error::{HandshakeError, Result, WireError};
use crate::handshake::server::HandshakeServer;
use crate::protocol::message::{
    Alert, ContentType, MAX_CIPHERTEXT_LEN, MAX_FRAGMENT_LEN, ProtocolVersion, RecordHeader,
};
use crate::protocol::record::{HandshakeReassembler, read_record, write_records};
use crate::protocol::state::{Established, Phase, Ready, ServerEstablished, ServerReady};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// How far a handshake got. Updated in place so it stays readable after the
/// driving future is cancelled by a timeout.
///
/// 握手的进度。原地更新，因此即使驱动 future 因超时被取消仍可读取。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: Phase,
    pub suite: Option<CipherSuite>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            phase: Phase::AwaitingClientHello,
            suite: None,
        }
    }
}

/// Drives one handshake to `Established`.
///
/// Any error is terminal; the caller is responsible for alerting the peer and
/// closing the stream.
pub async fn drive<S>(
    server: HandshakeServer<Ready, ServerReady>,
    stream: &mut S,
    max_message_len: usize,
    progress: &mut Progress,
) -> Result<HandshakeServer<Established, ServerEstablished>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut joiner = HandshakeReassembler::new(max_message_len);
    progress.phase = server.phase();

    // --- ClientHello ---
    let hello = next_handshake_message(stream, &mut joiner, None).await?;
    let (flight, server) = server.process_client_hello(&hello)?;
    if joiner.has_partial() {
        return Err(HandshakeError::UnexpectedMessage);
    }
    progress.suite = Some(flight.suite);
    let version = flight.version;
    write_records(stream, ContentType::Handshake, version, flight.bytes()).await?;
    trace!(messages = flight.messages.len(), "server flight written");
    progress.phase = server.phase();

    // --- ClientKeyExchange ---
    let exchange = next_handshake_message(stream, &mut joiner, Some(version)).await?;
    let mut server = server.process_client_key_exchange(&exchange)?;
    if joiner.has_partial() {
        return Err(HandshakeError::UnexpectedMessage);
    }
    progress.phase = server.phase();

    // --- ChangeCipherSpec, Finished ---
    loop {
        let limit = if server.client_cipher_active() {
            MAX_CIPHERTEXT_LEN
        } else {
            MAX_FRAGMENT_LEN
        };
        let (header, fragment) = read_versioned_record(stream, Some(version), limit).await?;
        match header.content_type {
            ContentType::ChangeCipherSpec => server.process_change_cipher_spec(&fragment)?,
            ContentType::Handshake => {
                let plaintext = server.open_handshake_record(&header, &fragment)?;
                joiner.push(&plaintext);
                if let Some(finished) = joiner.next_message()? {
                    if joiner.has_partial() {
                        return Err(HandshakeError::UnexpectedMessage);
                    }
                    let (records, established) = server.process_finished(&finished)?;
                    stream.write_all(&records).await?;
                    stream.flush().await?;
                    return Ok(established);
                }
            }
            ContentType::Alert => return Err(peer_alert(&fragment)),
            ContentType::ApplicationData => return Err(HandshakeError::UnexpectedMessage),
        }
    }
}

/// Reads one record, checking its version against the negotiated one (once
/// known) and its length against `limit`: plaintext records may not exceed
/// [`MAX_FRAGMENT_LEN`].
async fn read_versioned_record<S>(
    stream: &mut S,
    expected: Option<ProtocolVersion>,
    limit: usize,
) -> Result<(RecordHeader, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let (header, fragment) = read_record(stream).await?;
    if header.length > limit {
        return Err(WireError::LengthOverflow {
            length: header.length,
            limit,
        }
        .into());
    }
    match expected {
        Some(version) if header.version != version => {
            Err(WireError::IllegalValue("record version").into())
        }
        _ => Ok((header, fragment)),
    }
}

/// Reads plaintext handshake records until one whole message is buffered.
async fn next_handshake_message<S>(
    stream: &mut S,
    joiner: &mut HandshakeReassembler,
    expected: Option<ProtocolVersion>,
) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(message) = joiner.next_message()? {
            return Ok(message);
        }
        let (header, fragment) = read_versioned_record(stream, expected, MAX_FRAGMENT_LEN).await?;
        match header.content_type {
            ContentType::Handshake => joiner.push(&fragment),
            ContentType::Alert => return Err(peer_alert(&fragment)),
            _ => return Err(HandshakeError::UnexpectedMessage),
        }
    }
}

pub(crate) fn peer_alert(payload: &[u8]) -> HandshakeError {
    match Alert::decode(payload) {
        Ok(alert) => HandshakeError::PeerAlert {
            level: alert.level,
            description: alert.description,
        },
        Err(err) => err.into(),
    }
}
