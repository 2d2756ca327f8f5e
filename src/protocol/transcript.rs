//! Manages the hashing of the handshake transcript.
//!
//! The hash function is only known once the cipher suite is negotiated, so the
//! transcript buffers the ClientHello until [`Transcript::start`] selects the
//! digest, then runs as an incremental hash.
//!
//! 管理握手记录的哈希计算。
//!
//! 哈希函数要在协商出密码套件后才能确定，因此握手记录会先缓存 ClientHello，
//! 直到 [`Transcript::start`] 选定摘要算法，此后以增量方式计算哈希。
use crate::crypto::suite::HashAlgorithm;
use sha2::{Digest, Sha256, Sha384};
use sm3::Sm3;

#[derive(Debug, Clone)]
enum RunningHash {
    Sha256(Sha256),
    Sha384(Sha384),
    Sm3(Sm3),
}

impl RunningHash {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => RunningHash::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => RunningHash::Sha384(Sha384::new()),
            HashAlgorithm::Sm3 => RunningHash::Sm3(Sm3::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            RunningHash::Sha256(h) => h.update(bytes),
            RunningHash::Sha384(h) => h.update(bytes),
            RunningHash::Sm3(h) => h.update(bytes),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        match self {
            RunningHash::Sha256(h) => h.clone().finalize().to_vec(),
            RunningHash::Sha384(h) => h.clone().finalize().to_vec(),
            RunningHash::Sm3(h) => h.clone().finalize().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pending: Vec<u8>,
    hasher: Option<RunningHash>,
}

impl Transcript {
    /// Creates a new, empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one encoded handshake message (header included), exactly as it was
    /// sent or received.
    ///
    /// 加入一条编码后的握手消息（含头部），与收发时的字节完全一致。
    pub fn update(&mut self, message: &[u8]) {
        match self.hasher.as_mut() {
            Some(hasher) => hasher.update(message),
            None => self.pending.extend_from_slice(message),
        }
    }

    /// Fixes the digest and folds in everything buffered so far. Calling it a
    /// second time has no effect.
    pub fn start(&mut self, algorithm: HashAlgorithm) {
        if self.hasher.is_some() {
            return;
        }
        let mut hasher = RunningHash::new(algorithm);
        hasher.update(&self.pending);
        self.pending = Vec::new();
        self.hasher = Some(hasher);
    }

    /// Returns the current hash without consuming the transcript.
    ///
    /// Before [`Transcript::start`] this is `None`: no digest has been chosen.
    ///
    /// 返回当前哈希值而不消耗握手记录。
    pub fn current_hash(&self) -> Option<Vec<u8>> {
        self.hasher.as_ref().map(RunningHash::snapshot)
    }
}
