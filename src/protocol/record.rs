//! Record I/O over an async byte stream, and reassembly of handshake messages
//! that are split across (or packed into) records.

use crate::error::{HandshakeError, Result, WireError};
use crate::protocol::codec::Reader;
use crate::protocol::message::{
    ContentType, HANDSHAKE_HEADER_LEN, MAX_FRAGMENT_LEN, ProtocolVersion, RECORD_HEADER_LEN,
    RecordHeader, encode_record,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one complete record. The header is validated before the body is read,
/// so a hostile length never causes an oversized allocation.
///
/// 读取一条完整记录。先校验头部再读取记录体。
pub async fn read_record<R>(reader: &mut R) -> Result<(RecordHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let header = RecordHeader::parse(&header)?;
    let mut body = vec![0u8; header.length];
    reader.read_exact(&mut body).await?;
    Ok((header, body))
}

/// Writes `payload` as one or more records of at most [`MAX_FRAGMENT_LEN`] bytes.
pub async fn write_records<W>(
    writer: &mut W,
    content_type: ContentType,
    version: ProtocolVersion,
    payload: &[u8],
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for fragment in payload.chunks(MAX_FRAGMENT_LEN) {
        writer
            .write_all(&encode_record(content_type, version, fragment))
            .await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Collects handshake-record fragments and yields whole handshake messages.
#[derive(Debug)]
pub struct HandshakeReassembler {
    buffer: Vec<u8>,
    max_message_len: usize,
}

impl HandshakeReassembler {
    pub fn new(max_message_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_message_len,
        }
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buffer.extend_from_slice(fragment);
    }

    /// Whether a partial message is still waiting for more fragments.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Pops the next complete message (header included), if one is buffered.
    pub fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < HANDSHAKE_HEADER_LEN {
            return Ok(None);
        }
        let mut r = Reader::new(&self.buffer[1..HANDSHAKE_HEADER_LEN]);
        let body_len = r.read_u24().map_err(HandshakeError::from)?;
        if body_len > self.max_message_len {
            return Err(WireError::LengthOverflow {
                length: body_len,
                limit: self.max_message_len,
            }
            .into());
        }
        let total = HANDSHAKE_HEADER_LEN + body_len;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let rest = self.buffer.split_off(total);
        Ok(Some(std::mem::replace(&mut self.buffer, rest)))
    }
}
