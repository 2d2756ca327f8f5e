use crate::crypto::keys::DirectionKeys;
use crate::crypto::protection::{RecordProtection, RecordProtector};
use crate::crypto::suite::CipherSuite;
use crate::error::PrimitiveError;
use crate::protocol::message::{ContentType, ProtocolVersion};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

const TAG_LEN: usize = 8;

/// Record protection keyed by the derived key block: a SHA-256 keystream per
/// sequence number plus a truncated tag over the record header fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToyRecordProtection;

impl RecordProtection for ToyRecordProtection {
    fn protector(
        &self,
        suite: CipherSuite,
        keys: &DirectionKeys,
    ) -> Result<Box<dyn RecordProtector>, PrimitiveError> {
        let lengths = suite.key_material();
        if keys.enc_key.len() != lengths.enc_key_len
            || keys.mac_key.len() != lengths.mac_key_len
            || keys.fixed_iv.len() != lengths.fixed_iv_len
        {
            return Err(PrimitiveError("key material does not fit the suite"));
        }
        let mut key = Zeroizing::new(Vec::new());
        key.extend_from_slice(&suite.id().to_be_bytes());
        key.extend_from_slice(&keys.enc_key);
        key.extend_from_slice(&keys.mac_key);
        key.extend_from_slice(&keys.fixed_iv);
        Ok(Box::new(ToyProtector { key, sequence: 0 }))
    }
}

struct ToyProtector {
    key: Zeroizing<Vec<u8>>,
    sequence: u64,
}

impl ToyProtector {
    fn keystream(&self, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        let mut block = 0u32;
        while out.len() < len {
            let chunk = Sha256::new()
                .chain_update(self.key.as_slice())
                .chain_update(self.sequence.to_be_bytes())
                .chain_update(block.to_be_bytes())
                .finalize();
            out.extend_from_slice(&chunk);
            block += 1;
        }
        out.truncate(len);
        out
    }

    fn tag(&self, content_type: ContentType, version: ProtocolVersion, plaintext: &[u8]) -> Vec<u8> {
        Sha256::new()
            .chain_update(b"toy-record-tag")
            .chain_update(self.key.as_slice())
            .chain_update(self.sequence.to_be_bytes())
            .chain_update([content_type as u8])
            .chain_update(version.0.to_be_bytes())
            .chain_update(plaintext)
            .finalize()[..TAG_LEN]
            .to_vec()
    }
}

impl RecordProtector for ToyProtector {
    fn seal(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        let mut out: Vec<u8> = plaintext
            .iter()
            .zip(self.keystream(plaintext.len()))
            .map(|(p, k)| p ^ k)
            .collect();
        out.extend_from_slice(&self.tag(content_type, version, plaintext));
        self.sequence += 1;
        Ok(out)
    }

    fn open(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        if ciphertext.len() < TAG_LEN {
            return Err(PrimitiveError("record too short"));
        }
        let (body, received_tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);
        let plaintext: Vec<u8> = body
            .iter()
            .zip(self.keystream(body.len()))
            .map(|(c, k)| c ^ k)
            .collect();
        let expected = self.tag(content_type, version, &plaintext);
        if !bool::from(expected.ct_eq(received_tag)) {
            return Err(PrimitiveError("bad record mac"));
        }
        self.sequence += 1;
        Ok(plaintext)
    }
}
