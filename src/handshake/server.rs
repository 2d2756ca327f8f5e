//! Implements the server-side of the handshake protocol state machine.
//! 实现握手协议状态机的服务器端。
//!
//! The machine is sans-I/O: each transition takes the bytes of one handshake
//! message and returns the bytes to send plus the next state. Every transition
//! consumes `self`, so an error drops the state and wipes its secrets; there is
//! no way to retry a step.
//!
//! ```text
//!  Ready ──ClientHello──▶ AwaitingKeyExchange ──ClientKeyExchange──▶ AwaitingFinished
//!                                                                     │ ChangeCipherSpec
//!                                                                     │ Finished
//!                                                                     ▼
//!                                                                Established
//! ```

use crate::bundle::GmBundleSet;
use crate::crypto::protection::RecordProtection;
use crate::crypto::suite::CipherSuite;
use crate::protocol::message::{Certificate, HandshakeMessage, ProtocolVersion};
use crate::protocol::transcript::Transcript;
use crate::selector::{BundleSet, SelectedCertificates};
use crate::sniffer::{ClassificationPolicy, ProtocolClassification};
use std::marker::PhantomData;
use std::sync::Arc;

mod builder;
mod state_awaiting_finished;
mod state_awaiting_key_exchange;
mod state_established;
mod state_ready;

pub use builder::{HandshakeServerBuilder, Missing};
pub use state_established::ChannelParts;

/// The server-side handshake state machine.
///
/// Generic over the state `S` to enforce protocol flow at compile time.
/// This ensures that methods can only be called in the correct sequence,
/// so an out-of-order message can only surface as a runtime
/// `UnexpectedMessage`, never as a skipped step.
///
/// 服务器端握手协议状态机。
///
/// 通过泛型状态 `S` 在编译时强制执行协议流程。
/// 这确保了方法只能按正确的顺序调用，乱序消息只会表现为运行时的
/// `UnexpectedMessage`，而不会跳过任何步骤。
#[derive(Debug)]
pub struct HandshakeServer<S, StateData> {
    /// Zero-sized marker to hold the current state `S`.
    ///
    /// 零大小标记，用于持有当前状态 `S`。
    state: PhantomData<S>,
    /// The actual data associated with the current state.
    ///
    /// 与当前状态关联的实际数据。
    state_data: StateData,
    /// Certificates and suite preference chosen for this connection.
    ///
    /// 为此连接选择的证书和套件偏好。
    bundles: BundleSet,
    /// Tie-break policy, so the parsed hello is classified like the sniffed one.
    policy: ClassificationPolicy,
    /// Factory for the record protectors installed after key exchange.
    record_protection: Arc<dyn RecordProtection>,
    /// A running hash of every handshake message sent and received.
    ///
    /// 所有收发握手消息的运行哈希。
    transcript: Transcript,
}

impl<S, D> HandshakeServer<S, D> {
    /// The family this machine was built for.
    pub fn classification(&self) -> ProtocolClassification {
        self.bundles.classification()
    }

    /// Moves the shared fields into a new state.
    fn transition<T, E>(self, state_data: E) -> HandshakeServer<T, E> {
        HandshakeServer {
            state: PhantomData,
            state_data,
            bundles: self.bundles,
            policy: self.policy,
            record_protection: self.record_protection,
            transcript: self.transcript,
        }
    }
}

/// The server's first flight: ServerHello, Certificate, ServerKeyExchange (GM
/// only) and ServerHelloDone.
///
/// 服务器的第一组消息。
#[derive(Debug, Clone)]
pub struct ServerFlight {
    pub version: ProtocolVersion,
    pub suite: CipherSuite,
    pub messages: Vec<HandshakeMessage>,
    bytes: Vec<u8>,
}

impl ServerFlight {
    /// The concatenated encoded messages, ready to be framed into records.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Every Certificate message in the flight.
    pub fn certificate_messages(&self) -> impl Iterator<Item = &Certificate> {
        self.messages.iter().filter_map(|m| match m {
            HandshakeMessage::Certificate(cert) => Some(cert),
            _ => None,
        })
    }
}

/// The certificate list for the Certificate message.
///
/// Standard: the authentication chain as configured. National-crypto: the
/// signing leaf, then the encryption leaf, then the remaining chain
/// certificates (signing chain first, duplicates dropped).
fn certificate_list(bundles: &BundleSet) -> Vec<Vec<u8>> {
    match bundles.certificates() {
        SelectedCertificates::Standard(set) => {
            set.authentication().bundle().certificate_chain().to_vec()
        }
        SelectedCertificates::NationalCrypto(set) => gm_certificate_list(set),
    }
}

fn gm_certificate_list(set: &GmBundleSet) -> Vec<Vec<u8>> {
    let sign = set.authentication().bundle().certificate_chain();
    let enc = set.key_transport().bundle().certificate_chain();
    let mut list = vec![sign[0].clone(), enc[0].clone()];
    for cert in sign[1..].iter().chain(enc[1..].iter()) {
        if !list.contains(cert) {
            list.push(cert.clone());
        }
    }
    list
}
