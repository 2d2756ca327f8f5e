use super::HandshakeServer;
use crate::crypto::protection::RecordProtector;
use crate::crypto::suite::CipherSuite;
use crate::protocol::message::ProtocolVersion;
use crate::protocol::state::{Established, Negotiated, Phase, ServerEstablished};
use crate::sniffer::ProtocolClassification;
use std::fmt;

/// What a finished handshake hands to the secure channel: the negotiated
/// parameters and one record protector per direction.
///
/// 握手完成后交给安全通道的内容：协商参数以及每个方向各一个记录保护器。
pub struct ChannelParts {
    pub classification: ProtocolClassification,
    pub negotiated: Negotiated,
    /// Opens records arriving from the peer.
    pub reader: Box<dyn RecordProtector>,
    /// Seals records sent to the peer.
    pub writer: Box<dyn RecordProtector>,
}

impl fmt::Debug for ChannelParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelParts")
            .field("classification", &self.classification)
            .field("negotiated", &self.negotiated)
            .finish_non_exhaustive()
    }
}

impl HandshakeServer<Established, ServerEstablished> {
    pub fn phase(&self) -> Phase {
        Phase::Established
    }

    pub fn suite(&self) -> CipherSuite {
        self.state_data.negotiated.suite
    }

    pub fn version(&self) -> ProtocolVersion {
        self.state_data.negotiated.version
    }

    /// Consumes the state machine; the server reads with the client-write keys
    /// and writes with the server-write keys.
    ///
    /// 消耗状态机；服务器使用客户端写密钥读取，使用服务器写密钥写入。
    pub fn into_parts(self) -> ChannelParts {
        let classification = self.classification();
        ChannelParts {
            classification,
            negotiated: self.state_data.negotiated,
            reader: self.state_data.client_protector,
            writer: self.state_data.server_protector,
        }
    }
}
