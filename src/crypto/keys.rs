//! Private-key seam and the TLS 1.2 / GM/T 0024 key schedule.
//!
//! Both families share one PRF construction (`P_hash` over HMAC); only the hash
//! differs (SHA-256/384 for standard suites, SM3 for national-crypto suites).
//! All derived secrets live in [`Zeroizing`] buffers so they are wiped when the
//! owning state is dropped.
//!
//! 私钥接口以及 TLS 1.2 / GM/T 0024 密钥编排。
//!
//! 两个协议族共用同一个 PRF 构造（基于 HMAC 的 `P_hash`），只有哈希函数不同。
//! 所有派生密钥都存放在 [`Zeroizing`] 缓冲区中，所属状态被丢弃时即被清零。

use crate::crypto::suite::{CipherSuite, HashAlgorithm};
use crate::error::{HandshakeError, PrimitiveError, Result};
use hmac::{Mac, SimpleHmac};
use sha2::digest::{Digest, core_api::BlockSizeUser};
use sha2::{Sha256, Sha384};
use sm3::Sm3;
use std::fmt;
use zeroize::Zeroizing;

pub const PRE_MASTER_SECRET_LEN: usize = 48;
pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

const MASTER_SECRET_LABEL: &[u8] = b"master secret";
const KEY_EXPANSION_LABEL: &[u8] = b"key expansion";
const CLIENT_FINISHED_LABEL: &[u8] = b"client finished";
const SERVER_FINISHED_LABEL: &[u8] = b"server finished";

/// The public-key scheme a private key belongs to.
///
/// 私钥所属的公钥体制。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyScheme {
    Rsa,
    Sm2,
}

/// An opaque private-key handle supplied by the primitive layer.
///
/// The handle never exposes key material: the handshake only borrows it for a
/// single `sign` or `decrypt` call. Implementations must keep their `Debug`
/// output free of secrets.
///
/// 由原语层提供的不透明私钥句柄。
///
/// 该句柄从不暴露密钥材料：握手只在单次 `sign` 或 `decrypt` 调用期间借用它。
pub trait PrivateKey: Send + Sync + fmt::Debug {
    fn scheme(&self) -> KeyScheme;

    /// Signs `message` (SM2 signatures include the default user id).
    fn sign(&self, message: &[u8]) -> std::result::Result<Vec<u8>, PrimitiveError>;

    /// Decrypts a key-transport ciphertext (RSA PKCS#1 v1.5 or SM2 encryption).
    fn decrypt(&self, ciphertext: &[u8]) -> std::result::Result<Zeroizing<Vec<u8>>, PrimitiveError>;
}

/// Symmetric key material for one direction of the record layer.
///
/// 记录层单个方向的对称密钥材料。
pub struct DirectionKeys {
    pub mac_key: Zeroizing<Vec<u8>>,
    pub enc_key: Zeroizing<Vec<u8>>,
    pub fixed_iv: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionKeys")
            .field("mac_key_len", &self.mac_key.len())
            .field("enc_key_len", &self.enc_key.len())
            .field("fixed_iv_len", &self.fixed_iv.len())
            .finish()
    }
}

/// The key block split into client-write and server-write halves.
#[derive(Debug)]
pub struct KeyBlock {
    pub client_write: DirectionKeys,
    pub server_write: DirectionKeys,
}

/// The master secret of a session.
///
/// 会话主密钥。
pub struct MasterSecret(Zeroizing<Vec<u8>>);

impl MasterSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

fn p_hash<D>(secret: &[u8], seed: &[u8], out: &mut [u8]) -> Result<()>
where
    D: Digest + BlockSizeUser + Clone,
{
    let mac = <SimpleHmac<D> as Mac>::new_from_slice(secret)
        .map_err(|_| HandshakeError::CryptoVerificationFailure("prf key rejected"))?;

    let mut a = {
        let mut m = mac.clone();
        Mac::update(&mut m, seed);
        m.finalize().into_bytes()
    };

    let mut offset = 0;
    while offset < out.len() {
        let mut m = mac.clone();
        Mac::update(&mut m, &a);
        Mac::update(&mut m, seed);
        let block = m.finalize().into_bytes();
        let n = block.len().min(out.len() - offset);
        out[offset..offset + n].copy_from_slice(&block[..n]);
        offset += n;

        let mut m = mac.clone();
        Mac::update(&mut m, &a);
        a = m.finalize().into_bytes();
    }
    Ok(())
}

/// The TLS 1.2 PRF: `P_hash(secret, label ‖ seed)` truncated to `len` bytes.
///
/// GM/T 0024 reuses the construction with HMAC-SM3.
pub fn prf(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    len: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let mut labelled_seed = Vec::with_capacity(label.len() + seed.len());
    labelled_seed.extend_from_slice(label);
    labelled_seed.extend_from_slice(seed);

    let mut out = Zeroizing::new(vec![0u8; len]);
    match hash {
        HashAlgorithm::Sha256 => p_hash::<Sha256>(secret, &labelled_seed, &mut out)?,
        HashAlgorithm::Sha384 => p_hash::<Sha384>(secret, &labelled_seed, &mut out)?,
        HashAlgorithm::Sm3 => p_hash::<Sm3>(secret, &labelled_seed, &mut out)?,
    }
    Ok(out)
}

/// `master_secret = PRF(pre_master, "master secret", client_random ‖ server_random)`.
pub fn derive_master_secret(
    suite: CipherSuite,
    pre_master_secret: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<MasterSecret> {
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);
    let secret = prf(
        suite.hash(),
        pre_master_secret,
        MASTER_SECRET_LABEL,
        &seed,
        MASTER_SECRET_LEN,
    )?;
    Ok(MasterSecret(secret))
}

/// Expands the master secret into per-direction keys.
///
/// Note the seed order is `server_random ‖ client_random`, the reverse of the
/// master secret derivation.
///
/// 将主密钥扩展为各方向的密钥。注意种子顺序与主密钥派生相反。
pub fn derive_key_block(
    suite: CipherSuite,
    master: &MasterSecret,
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Result<KeyBlock> {
    let lengths = suite.key_material();
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);
    let block = prf(
        suite.hash(),
        master.as_bytes(),
        KEY_EXPANSION_LABEL,
        &seed,
        lengths.key_block_len(),
    )?;

    let mut offset = 0;
    let mut carve = |len: usize| {
        let part = Zeroizing::new(block[offset..offset + len].to_vec());
        offset += len;
        part
    };
    let client_mac = carve(lengths.mac_key_len);
    let server_mac = carve(lengths.mac_key_len);
    let client_key = carve(lengths.enc_key_len);
    let server_key = carve(lengths.enc_key_len);
    let client_iv = carve(lengths.fixed_iv_len);
    let server_iv = carve(lengths.fixed_iv_len);

    Ok(KeyBlock {
        client_write: DirectionKeys {
            mac_key: client_mac,
            enc_key: client_key,
            fixed_iv: client_iv,
        },
        server_write: DirectionKeys {
            mac_key: server_mac,
            enc_key: server_key,
            fixed_iv: server_iv,
        },
    })
}

/// Which endpoint a Finished message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedSender {
    Client,
    Server,
}

/// `verify_data = PRF(master, label, Hash(handshake_messages))[..12]`.
pub fn compute_verify_data(
    suite: CipherSuite,
    master: &MasterSecret,
    sender: FinishedSender,
    transcript_hash: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let label = match sender {
        FinishedSender::Client => CLIENT_FINISHED_LABEL,
        FinishedSender::Server => SERVER_FINISHED_LABEL,
    };
    prf(
        suite.hash(),
        master.as_bytes(),
        label,
        transcript_hash,
        VERIFY_DATA_LEN,
    )
}
