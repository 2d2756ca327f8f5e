//! Defines the various states of the handshake protocol state machine.
//!
//! The marker structs are zero-sized types used to enforce the protocol flow at
//! compile time; the `Server*` structs hold the data each state owns. Secrets
//! in the data structs are wiped on drop, so leaving a state (by success,
//! failure or cancellation) releases them.
//!
//! 定义握手协议状态机的各个状态。
//!
//! 标记结构体是零大小类型，用于在编译时强制执行协议流程；`Server*` 结构体
//! 保存每个状态拥有的数据。数据结构中的密钥在丢弃时被清零，因此无论以
//! 成功、失败还是取消的方式离开状态，密钥都会被释放。

use crate::crypto::keys::MasterSecret;
use crate::crypto::protection::RecordProtector;
use crate::crypto::suite::CipherSuite;
use crate::protocol::message::{ProtocolVersion, RANDOM_LEN};
use std::fmt;

// --- Markers ---

/// The initial state: waiting for the ClientHello.
#[derive(Debug)]
pub struct Ready;

/// ServerHelloDone has been sent; waiting for the ClientKeyExchange.
#[derive(Debug)]
pub struct AwaitingKeyExchange;

/// Keys are derived; waiting for ChangeCipherSpec and the client Finished.
#[derive(Debug)]
pub struct AwaitingFinished;

/// The final state of a successful handshake.
#[derive(Debug)]
pub struct Established;

/// Runtime view of where a connection's handshake stands, for logging and for
/// reporting where a failure happened.
///
/// 连接握手所处阶段的运行时视图，用于日志以及报告失败发生的位置。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AwaitingClientHello,
    AwaitingClientKeyExchange,
    AwaitingFinished,
    Established,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::AwaitingClientHello => "awaiting_client_hello",
            Phase::AwaitingClientKeyExchange => "awaiting_client_key_exchange",
            Phase::AwaitingFinished => "awaiting_finished",
            Phase::Established => "established",
            Phase::Failed => "failed",
        }
    }
}

// --- Server State Data ---

/// Data held by the server in the `Ready` state.
#[derive(Debug, Default)]
pub struct ServerReady {}

/// Parameters fixed by the hello exchange.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated {
    pub suite: CipherSuite,
    /// Version the server answered with (and records now carry).
    pub version: ProtocolVersion,
    /// Version the client put in its hello; the pre-master secret must echo it.
    pub client_version: ProtocolVersion,
    pub client_random: [u8; RANDOM_LEN],
    pub server_random: [u8; RANDOM_LEN],
}

/// Data held by the server in the `AwaitingKeyExchange` state.
#[derive(Debug)]
pub struct ServerAwaitingKeyExchange {
    pub negotiated: Negotiated,
}

/// Data held by the server in the `AwaitingFinished` state.
pub struct ServerAwaitingFinished {
    pub negotiated: Negotiated,
    pub master_secret: MasterSecret,
    pub client_protector: Box<dyn RecordProtector>,
    pub server_protector: Box<dyn RecordProtector>,
    /// Set once the client's ChangeCipherSpec has arrived.
    pub client_cipher_active: bool,
}

impl fmt::Debug for ServerAwaitingFinished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerAwaitingFinished")
            .field("negotiated", &self.negotiated)
            .field("client_cipher_active", &self.client_cipher_active)
            .finish_non_exhaustive()
    }
}

/// Data held by the server in the `Established` state. The master secret is
/// not carried over; only the record protectors survive the handshake.
pub struct ServerEstablished {
    pub negotiated: Negotiated,
    pub client_protector: Box<dyn RecordProtector>,
    pub server_protector: Box<dyn RecordProtector>,
}

impl fmt::Debug for ServerEstablished {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEstablished")
            .field("negotiated", &self.negotiated)
            .finish_non_exhaustive()
    }
}
