use crate::crypto::keys::{KeyScheme, PrivateKey};
use crate::error::PrimitiveError;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

const CERT_MAGIC: &[u8] = b"TOY-CERT";
const CA_CERT: &[u8] = b"TOY-CA-ROOT";
const TAG_LEN: usize = 16;

fn scheme_byte(scheme: KeyScheme) -> u8 {
    match scheme {
        KeyScheme::Rsa => 1,
        KeyScheme::Sm2 => 2,
    }
}

fn keystream(scheme: KeyScheme, id: u8, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter = 0u32;
    while out.len() < len {
        let block = Sha256::new()
            .chain_update(b"toy-keystream")
            .chain_update([scheme_byte(scheme), id])
            .chain_update(counter.to_be_bytes())
            .finalize();
        out.extend_from_slice(&block);
        counter += 1;
    }
    out.truncate(len);
    out
}

fn tag(scheme: KeyScheme, id: u8, plaintext: &[u8]) -> Vec<u8> {
    Sha256::new()
        .chain_update(b"toy-tag")
        .chain_update([scheme_byte(scheme), id])
        .chain_update(plaintext)
        .finalize()[..TAG_LEN]
        .to_vec()
}

fn signature(scheme: KeyScheme, id: u8, message: &[u8]) -> Vec<u8> {
    Sha256::new()
        .chain_update(b"toy-signature")
        .chain_update([scheme_byte(scheme), id])
        .chain_update(message)
        .finalize()
        .to_vec()
}

/// The intermediate every toy chain ends with.
pub fn toy_ca_certificate() -> Vec<u8> {
    CA_CERT.to_vec()
}

/// A toy private key identified by `(scheme, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyKey {
    scheme: KeyScheme,
    id: u8,
}

impl ToyKey {
    pub fn new(scheme: KeyScheme, id: u8) -> Self {
        Self { scheme, id }
    }

    /// A fake DER blob naming this key; distinct ids give distinct certificates.
    pub fn certificate(&self) -> Vec<u8> {
        let mut der = CERT_MAGIC.to_vec();
        der.push(scheme_byte(self.scheme));
        der.push(self.id);
        der
    }

    pub fn public_key(&self) -> ToyPublicKey {
        ToyPublicKey {
            scheme: self.scheme,
            id: self.id,
        }
    }
}

impl PrivateKey for ToyKey {
    fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        Ok(signature(self.scheme, self.id, message))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, PrimitiveError> {
        if ciphertext.len() < TAG_LEN {
            return Err(PrimitiveError("ciphertext too short"));
        }
        let (body, received_tag) = ciphertext.split_at(ciphertext.len() - TAG_LEN);
        let plaintext: Zeroizing<Vec<u8>> = Zeroizing::new(
            body.iter()
                .zip(keystream(self.scheme, self.id, body.len()))
                .map(|(c, k)| c ^ k)
                .collect(),
        );
        let expected = tag(self.scheme, self.id, &plaintext);
        if !bool::from(expected.ct_eq(received_tag)) {
            return Err(PrimitiveError("decryption failed"));
        }
        Ok(plaintext)
    }
}

/// The public half, as a client recovers it from a toy certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyPublicKey {
    scheme: KeyScheme,
    id: u8,
}

impl ToyPublicKey {
    pub fn from_certificate(der: &[u8]) -> Option<Self> {
        let rest = der.strip_prefix(CERT_MAGIC)?;
        let [scheme, id] = rest else {
            return None;
        };
        let scheme = match scheme {
            1 => KeyScheme::Rsa,
            2 => KeyScheme::Sm2,
            _ => return None,
        };
        Some(Self { scheme, id: *id })
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out: Vec<u8> = plaintext
            .iter()
            .zip(keystream(self.scheme, self.id, plaintext.len()))
            .map(|(p, k)| p ^ k)
            .collect();
        out.extend_from_slice(&tag(self.scheme, self.id, plaintext));
        out
    }

    pub fn verify(&self, message: &[u8], sig: &[u8]) -> bool {
        bool::from(signature(self.scheme, self.id, message).ct_eq(sig))
    }
}
