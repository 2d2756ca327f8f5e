use super::{HandshakeServer, HandshakeServerBuilder, Missing, ServerFlight, certificate_list};
use crate::crypto::suite::negotiate;
use crate::error::{HandshakeError, Result};
use crate::protocol::message::{
    Certificate, HandshakeMessage, RANDOM_LEN, ServerHello, ServerKeyExchange,
    server_key_exchange_signed_params,
};
use crate::protocol::state::{
    AwaitingKeyExchange, Negotiated, Phase, Ready, ServerAwaitingKeyExchange, ServerReady,
};
use crate::sniffer::classify_client_hello;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::debug;

const SESSION_ID_LEN: usize = 32;

impl HandshakeServer<Ready, ServerReady> {
    /// Creates a new builder for a `HandshakeServer`.
    ///
    /// 为 `HandshakeServer` 创建一个新的构建器。
    pub fn builder() -> HandshakeServerBuilder<Missing, Missing> {
        HandshakeServerBuilder::new()
    }

    pub fn phase(&self) -> Phase {
        Phase::AwaitingClientHello
    }

    /// Processes the ClientHello and produces the server's first flight.
    ///
    /// The hello is re-classified with the same policy the sniffer used; a
    /// disagreement means the prefix the sniffer saw was not representative and
    /// the connection is dropped before any certificate leaves the server.
    ///
    /// 处理 ClientHello 并生成服务器的第一组消息。
    ///
    /// 使用与嗅探器相同的策略重新分类；若结果不一致，则在发送任何证书之前
    /// 丢弃该连接。
    pub fn process_client_hello(
        mut self,
        message: &[u8],
    ) -> Result<(
        ServerFlight,
        HandshakeServer<AwaitingKeyExchange, ServerAwaitingKeyExchange>,
    )> {
        let hello = match HandshakeMessage::decode(message)? {
            HandshakeMessage::ClientHello(hello) => hello,
            _ => return Err(HandshakeError::UnexpectedMessage),
        };

        let sniffed = self.bundles.classification();
        let parsed = classify_client_hello(&hello, self.policy);
        if parsed != sniffed {
            return Err(HandshakeError::ClassificationMismatch { sniffed, parsed });
        }
        let version = sniffed
            .server_version()
            .ok_or(HandshakeError::UnexpectedMessage)?;

        let suite = negotiate(self.bundles.cipher_suites(), &hello.cipher_suites)
            .ok_or(HandshakeError::NoCommonCipherSuite)?;
        debug!(suite = suite.name(), version = ?version, "negotiated cipher suite");

        self.transcript.update(message);
        self.transcript.start(suite.hash());

        let mut server_random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut server_random);
        let mut session_id = vec![0u8; SESSION_ID_LEN];
        OsRng.fill_bytes(&mut session_id);

        let mut messages = vec![
            HandshakeMessage::ServerHello(ServerHello {
                version,
                random: server_random,
                session_id,
                cipher_suite: suite.id(),
                compression_method: 0,
            }),
            HandshakeMessage::Certificate(Certificate {
                certificates: certificate_list(&self.bundles),
            }),
        ];

        // GM key transport: the signing key vouches for the encryption certificate.
        if let Some(key_transport) = self.bundles.key_transport() {
            let params = server_key_exchange_signed_params(
                &hello.random,
                &server_random,
                key_transport.bundle().leaf(),
            );
            let signature = self.bundles.authentication().sign(&params)?;
            messages.push(HandshakeMessage::ServerKeyExchange(ServerKeyExchange {
                signature,
            }));
        }
        messages.push(HandshakeMessage::ServerHelloDone);

        let mut bytes = Vec::new();
        for message in &messages {
            let encoded = message.encode();
            self.transcript.update(&encoded);
            bytes.extend_from_slice(&encoded);
        }

        let flight = ServerFlight {
            version,
            suite,
            messages,
            bytes,
        };
        let negotiated = Negotiated {
            suite,
            version,
            client_version: hello.version,
            client_random: hello.random,
            server_random,
        };
        Ok((
            flight,
            self.transition(ServerAwaitingKeyExchange { negotiated }),
        ))
    }
}
