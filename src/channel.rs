//! The secure channel handed to the application once a handshake completes.
//!
//! 握手完成后交给应用的安全通道。

use crate::crypto::protection::RecordProtector;
use crate::crypto::suite::CipherSuite;
use crate::error::{HandshakeError, Result, WireError};
use crate::handshake::server::ChannelParts;
use crate::protocol::message::{
    ALERT_CLOSE_NOTIFY, Alert, ContentType, MAX_FRAGMENT_LEN, ProtocolVersion, encode_record,
};
use crate::protocol::record::read_record;
use crate::protocol::state::Negotiated;
use crate::sniffer::ProtocolClassification;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// A connection with negotiated keys installed in both directions. Only the
/// record protectors are kept; the master secret is gone by the time the
/// channel exists.
pub struct SecureChannel<S> {
    stream: S,
    classification: ProtocolClassification,
    negotiated: Negotiated,
    reader: Box<dyn RecordProtector>,
    writer: Box<dyn RecordProtector>,
    peer_closed: bool,
}

impl<S> fmt::Debug for SecureChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("classification", &self.classification)
            .field("suite", &self.negotiated.suite)
            .field("version", &self.negotiated.version)
            .field("peer_closed", &self.peer_closed)
            .finish_non_exhaustive()
    }
}

impl<S> SecureChannel<S> {
    pub fn from_parts(stream: S, parts: ChannelParts) -> Self {
        Self {
            stream,
            classification: parts.classification,
            negotiated: parts.negotiated,
            reader: parts.reader,
            writer: parts.writer,
            peer_closed: false,
        }
    }

    pub fn classification(&self) -> ProtocolClassification {
        self.classification
    }

    pub fn suite(&self) -> CipherSuite {
        self.negotiated.suite
    }

    pub fn version(&self) -> ProtocolVersion {
        self.negotiated.version
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Seals `data` into one or more application-data records.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        let version = self.negotiated.version;
        for chunk in data.chunks(MAX_FRAGMENT_LEN) {
            let sealed = self
                .writer
                .seal(ContentType::ApplicationData, version, chunk)?;
            self.stream
                .write_all(&encode_record(ContentType::ApplicationData, version, &sealed))
                .await?;
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Returns the next application-data payload, or `None` once the peer has
    /// sent close_notify.
    ///
    /// 返回下一段应用数据；对端发送 close_notify 后返回 `None`。
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        if self.peer_closed {
            return Ok(None);
        }
        let version = self.negotiated.version;
        loop {
            let (header, fragment) = read_record(&mut self.stream).await?;
            if header.version != version {
                return Err(WireError::IllegalValue("record version").into());
            }
            let plaintext = self
                .reader
                .open(header.content_type, version, &fragment)
                .map_err(|_| HandshakeError::CryptoVerificationFailure("record authentication"))?;
            match header.content_type {
                ContentType::ApplicationData if plaintext.is_empty() => continue,
                ContentType::ApplicationData => return Ok(Some(plaintext)),
                ContentType::Alert => {
                    let alert = Alert::decode(&plaintext)?;
                    if alert.description == ALERT_CLOSE_NOTIFY {
                        self.peer_closed = true;
                        return Ok(None);
                    }
                    return Err(HandshakeError::PeerAlert {
                        level: alert.level,
                        description: alert.description,
                    });
                }
                _ => return Err(HandshakeError::UnexpectedMessage),
            }
        }
    }

    /// Sends close_notify and shuts the write half down.
    pub async fn close(mut self) -> Result<()> {
        let version = self.negotiated.version;
        let sealed = self
            .writer
            .seal(ContentType::Alert, version, &Alert::CLOSE_NOTIFY.encode())?;
        self.stream
            .write_all(&encode_record(ContentType::Alert, version, &sealed))
            .await?;
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}
