//! Seam to the record-protection collaborator.
//!
//! The handshake engine only needs to seal its own Finished message and open
//! the client's; everything after the handshake goes through the same
//! protectors inside [`crate::channel::SecureChannel`]. The actual AEAD/CBC
//! record transforms (AES-GCM, SM4-CBC-SM3, ...) live outside this crate.

use crate::crypto::keys::DirectionKeys;
use crate::crypto::suite::CipherSuite;
use crate::error::PrimitiveError;
use crate::protocol::message::{ContentType, ProtocolVersion};
use std::fmt;

/// One direction of record protection. Implementations track their own
/// sequence numbers, so calls must follow wire order.
///
/// 单一方向的记录保护。实现自行维护序列号，因此调用必须遵循线上顺序。
pub trait RecordProtector: Send {
    fn seal(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError>;

    fn open(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError>;
}

/// Factory that turns negotiated key material into record protectors.
///
/// 将协商出的密钥材料转换为记录保护器的工厂。
pub trait RecordProtection: Send + Sync + fmt::Debug {
    fn protector(
        &self,
        suite: CipherSuite,
        keys: &DirectionKeys,
    ) -> Result<Box<dyn RecordProtector>, PrimitiveError>;
}
