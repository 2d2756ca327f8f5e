use super::HandshakeServer;
use crate::crypto::keys::{FinishedSender, compute_verify_data};
use crate::error::{HandshakeError, Result, WireError};
use crate::protocol::message::{
    ContentType, Finished, HandshakeMessage, RecordHeader, encode_record,
};
use crate::protocol::state::{
    AwaitingFinished, Established, Phase, ServerAwaitingFinished, ServerEstablished,
};
use subtle::ConstantTimeEq;

/// The only legal ChangeCipherSpec body.
const CHANGE_CIPHER_SPEC: [u8; 1] = [1];

impl HandshakeServer<AwaitingFinished, ServerAwaitingFinished> {
    pub fn phase(&self) -> Phase {
        Phase::AwaitingFinished
    }

    /// Whether the client has switched to the negotiated keys.
    pub fn client_cipher_active(&self) -> bool {
        self.state_data.client_cipher_active
    }

    /// Records the client's ChangeCipherSpec. From here on the client's
    /// handshake records are protected.
    ///
    /// 记录客户端的 ChangeCipherSpec。此后客户端的握手记录均受保护。
    pub fn process_change_cipher_spec(&mut self, payload: &[u8]) -> Result<()> {
        if payload != CHANGE_CIPHER_SPEC.as_slice() {
            return Err(WireError::IllegalValue("change_cipher_spec").into());
        }
        if self.state_data.client_cipher_active {
            return Err(HandshakeError::UnexpectedMessage);
        }
        self.state_data.client_cipher_active = true;
        Ok(())
    }

    /// Opens a protected handshake record sent after ChangeCipherSpec.
    pub fn open_handshake_record(
        &mut self,
        header: &RecordHeader,
        fragment: &[u8],
    ) -> Result<Vec<u8>> {
        if !self.state_data.client_cipher_active {
            return Err(HandshakeError::UnexpectedMessage);
        }
        self.state_data
            .client_protector
            .open(header.content_type, header.version, fragment)
            .map_err(|_| HandshakeError::CryptoVerificationFailure("client finished record"))
    }

    /// Verifies the client Finished and answers with the server's
    /// ChangeCipherSpec and Finished, returned as ready-to-write records.
    ///
    /// The comparison is constant-time; any mismatch, including a wrong
    /// length, fails the handshake.
    ///
    /// 校验客户端 Finished，并以可直接写出的记录形式返回服务器的
    /// ChangeCipherSpec 和 Finished。比较以常数时间进行。
    pub fn process_finished(
        mut self,
        message: &[u8],
    ) -> Result<(Vec<u8>, HandshakeServer<Established, ServerEstablished>)> {
        if !self.state_data.client_cipher_active {
            return Err(HandshakeError::UnexpectedMessage);
        }
        let finished = match HandshakeMessage::decode(message)? {
            HandshakeMessage::Finished(finished) => finished,
            _ => return Err(HandshakeError::UnexpectedMessage),
        };

        let negotiated = self.state_data.negotiated;
        let client_hash = self
            .transcript
            .current_hash()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let expected = compute_verify_data(
            negotiated.suite,
            &self.state_data.master_secret,
            FinishedSender::Client,
            &client_hash,
        )?;
        if !bool::from(expected.as_slice().ct_eq(finished.verify_data.as_slice())) {
            return Err(HandshakeError::CryptoVerificationFailure("client finished"));
        }
        self.transcript.update(message);

        let server_hash = self
            .transcript
            .current_hash()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let verify_data = compute_verify_data(
            negotiated.suite,
            &self.state_data.master_secret,
            FinishedSender::Server,
            &server_hash,
        )?;
        let server_finished = HandshakeMessage::Finished(Finished {
            verify_data: verify_data.to_vec(),
        })
        .encode();
        self.transcript.update(&server_finished);

        let sealed = self.state_data.server_protector.seal(
            ContentType::Handshake,
            negotiated.version,
            &server_finished,
        )?;
        let mut records = encode_record(
            ContentType::ChangeCipherSpec,
            negotiated.version,
            &CHANGE_CIPHER_SPEC,
        );
        records.extend_from_slice(&encode_record(
            ContentType::Handshake,
            negotiated.version,
            &sealed,
        ));

        let ServerAwaitingFinished {
            negotiated,
            master_secret,
            client_protector,
            server_protector,
            ..
        } = self.state_data;
        drop(master_secret);
        let established = HandshakeServer {
            state: std::marker::PhantomData,
            state_data: ServerEstablished {
                negotiated,
                client_protector,
                server_protector,
            },
            bundles: self.bundles,
            policy: self.policy,
            record_protection: self.record_protection,
            transcript: self.transcript,
        };
        Ok((records, established))
    }
}
