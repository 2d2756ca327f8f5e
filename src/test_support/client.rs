use super::keys::ToyPublicKey;
use super::protection::ToyRecordProtection;
use crate::channel::SecureChannel;
use crate::crypto::keys::{
    FinishedSender, PRE_MASTER_SECRET_LEN, compute_verify_data, derive_key_block,
    derive_master_secret,
};
use crate::crypto::protection::RecordProtection;
use crate::crypto::suite::CipherSuite;
use crate::error::{HandshakeError, Result};
use crate::handshake::driver::peer_alert;
use crate::handshake::server::ChannelParts;
use crate::protocol::message::{
    Alert, ClientHello, ClientKeyExchange, ContentType, Extension, Finished, HandshakeMessage,
    ProtocolVersion, RANDOM_LEN, ServerHello, encode_record, server_key_exchange_signed_params,
};
use crate::protocol::record::{HandshakeReassembler, read_record, write_records};
use crate::protocol::state::Negotiated;
use crate::protocol::transcript::Transcript;
use crate::sniffer::ProtocolClassification;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

/// Which certificate the client encrypts the pre-master secret to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    /// The encryption certificate for GM, the only certificate for RSA.
    KeyTransport,
    /// The GM signing certificate; a role-confused client.
    Authentication,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub hello_version: ProtocolVersion,
    /// Record version of the ClientHello record(s).
    pub record_version: ProtocolVersion,
    pub cipher_suites: Vec<u16>,
    pub extensions: Vec<Extension>,
    pub key_target: KeyTarget,
    /// Flip the low bit of this byte of the encoded Finished message.
    pub tamper_finished: Option<usize>,
    /// Flip the low bit of this byte of the sealed Finished record body.
    pub tamper_finished_record: Option<usize>,
    /// Split the ClientHello into records of at most this many bytes.
    pub hello_fragment_len: Option<usize>,
    /// Stop after the ClientHello and wait for the server to give up.
    pub stall_after_hello: bool,
}

impl ClientOptions {
    pub fn standard() -> Self {
        Self {
            hello_version: ProtocolVersion::TLS12,
            record_version: ProtocolVersion::TLS10,
            cipher_suites: vec![0x009C, 0x003C],
            extensions: Vec::new(),
            key_target: KeyTarget::KeyTransport,
            tamper_finished: None,
            tamper_finished_record: None,
            hello_fragment_len: None,
            stall_after_hello: false,
        }
    }

    pub fn national() -> Self {
        Self {
            hello_version: ProtocolVersion::TLCP,
            record_version: ProtocolVersion::TLCP,
            cipher_suites: vec![0xE053, 0xE013],
            ..Self::standard()
        }
    }
}

/// Everything the client saw of the server's side of the handshake.
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub server_hello: Option<ServerHello>,
    pub certificate_messages: Vec<Vec<Vec<u8>>>,
    pub server_key_exchange: Option<Vec<u8>>,
    pub alert: Option<Alert>,
    pub server_finished_verified: bool,
}

impl Observed {
    /// The certificate list of the first Certificate message.
    pub fn certificates(&self) -> Option<&[Vec<u8>]> {
        self.certificate_messages.first().map(Vec::as_slice)
    }
}

/// A scripted client speaking just enough of both families to drive the server.
#[derive(Debug)]
pub struct TestClient {
    options: ClientOptions,
    protection: Arc<dyn RecordProtection>,
    observed: Observed,
}

impl TestClient {
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            protection: Arc::new(ToyRecordProtection),
            observed: Observed::default(),
        }
    }

    pub fn observed(&self) -> &Observed {
        &self.observed
    }

    pub async fn handshake<S>(&mut self, mut stream: S) -> Result<SecureChannel<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let options = self.options.clone();
        let mut transcript = Transcript::new();
        let mut joiner = HandshakeReassembler::new(1 << 20);

        let mut client_random = [0u8; RANDOM_LEN];
        OsRng.fill_bytes(&mut client_random);
        let hello = HandshakeMessage::ClientHello(ClientHello {
            version: options.hello_version,
            random: client_random,
            session_id: Vec::new(),
            cipher_suites: options.cipher_suites.clone(),
            compression_methods: vec![0],
            extensions: options.extensions.clone(),
        })
        .encode();
        transcript.update(&hello);
        match options.hello_fragment_len {
            Some(len) => {
                for chunk in hello.chunks(len) {
                    stream
                        .write_all(&encode_record(
                            ContentType::Handshake,
                            options.record_version,
                            chunk,
                        ))
                        .await?;
                }
                stream.flush().await?;
            }
            None => {
                write_records(&mut stream, ContentType::Handshake, options.record_version, &hello)
                    .await?
            }
        }

        if options.stall_after_hello {
            loop {
                self.next_message(&mut stream, &mut joiner).await?;
            }
        }

        // --- Server flight ---
        let mut suite = None;
        loop {
            let message = self.next_message(&mut stream, &mut joiner).await?;
            transcript.update(&message);
            match HandshakeMessage::decode(&message)? {
                HandshakeMessage::ServerHello(server_hello) => {
                    let negotiated = CipherSuite::from_id(server_hello.cipher_suite)
                        .ok_or(HandshakeError::UnexpectedMessage)?;
                    transcript.start(negotiated.hash());
                    suite = Some(negotiated);
                    self.observed.server_hello = Some(server_hello);
                }
                HandshakeMessage::Certificate(certificate) => self
                    .observed
                    .certificate_messages
                    .push(certificate.certificates),
                HandshakeMessage::ServerKeyExchange(exchange) => {
                    self.observed.server_key_exchange = Some(exchange.signature)
                }
                HandshakeMessage::ServerHelloDone => break,
                _ => return Err(HandshakeError::UnexpectedMessage),
            }
        }
        let suite = suite.ok_or(HandshakeError::UnexpectedMessage)?;
        let server_hello = self
            .observed
            .server_hello
            .clone()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let version = server_hello.version;
        let national = version == ProtocolVersion::TLCP;

        // --- Key transport ---
        let certificates = self
            .observed
            .certificates()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let certificate_key = |index: usize| {
            certificates
                .get(index)
                .and_then(|der| ToyPublicKey::from_certificate(der))
                .ok_or(HandshakeError::CryptoVerificationFailure("server certificate"))
        };
        let authentication = certificate_key(0)?;
        let recipient = if national {
            let key_transport = certificate_key(1)?;
            let signature = self
                .observed
                .server_key_exchange
                .as_deref()
                .ok_or(HandshakeError::UnexpectedMessage)?;
            let params = server_key_exchange_signed_params(
                &client_random,
                &server_hello.random,
                &certificates[1],
            );
            if !authentication.verify(&params, signature) {
                return Err(HandshakeError::CryptoVerificationFailure(
                    "server key exchange signature",
                ));
            }
            match options.key_target {
                KeyTarget::KeyTransport => key_transport,
                KeyTarget::Authentication => authentication,
            }
        } else {
            authentication
        };

        let mut pre_master_secret = Zeroizing::new(vec![0u8; PRE_MASTER_SECRET_LEN]);
        OsRng.fill_bytes(&mut pre_master_secret[2..]);
        pre_master_secret[..2].copy_from_slice(&options.hello_version.0.to_be_bytes());
        let exchange = HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
            encrypted_pre_master_secret: recipient.encrypt(&pre_master_secret),
        })
        .encode();
        transcript.update(&exchange);
        write_records(&mut stream, ContentType::Handshake, version, &exchange).await?;

        let master_secret =
            derive_master_secret(suite, &pre_master_secret, &client_random, &server_hello.random)?;
        let key_block =
            derive_key_block(suite, &master_secret, &client_random, &server_hello.random)?;
        let mut writer = self.protection.protector(suite, &key_block.client_write)?;
        let mut reader = self.protection.protector(suite, &key_block.server_write)?;

        // --- ChangeCipherSpec, Finished ---
        write_records(&mut stream, ContentType::ChangeCipherSpec, version, &[1]).await?;
        let client_hash = transcript
            .current_hash()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let verify_data =
            compute_verify_data(suite, &master_secret, FinishedSender::Client, &client_hash)?;
        let mut finished = HandshakeMessage::Finished(Finished {
            verify_data: verify_data.to_vec(),
        })
        .encode();
        transcript.update(&finished);
        if let Some(index) = options.tamper_finished {
            finished[index] ^= 0x01;
        }
        let mut sealed = writer.seal(ContentType::Handshake, version, &finished)?;
        if let Some(index) = options.tamper_finished_record {
            sealed[index] ^= 0x01;
        }
        write_records(&mut stream, ContentType::Handshake, version, &sealed).await?;

        let (header, body) = read_record(&mut stream).await?;
        match header.content_type {
            ContentType::ChangeCipherSpec if body == [1] => {}
            ContentType::Alert => return Err(self.record_alert(&body)),
            _ => return Err(HandshakeError::UnexpectedMessage),
        }
        let (header, body) = read_record(&mut stream).await?;
        if header.content_type != ContentType::Handshake {
            return Err(HandshakeError::UnexpectedMessage);
        }
        let plaintext = reader.open(ContentType::Handshake, version, &body)?;
        let server_finished = match HandshakeMessage::decode(&plaintext)? {
            HandshakeMessage::Finished(finished) => finished,
            _ => return Err(HandshakeError::UnexpectedMessage),
        };
        let server_hash = transcript
            .current_hash()
            .ok_or(HandshakeError::UnexpectedMessage)?;
        let expected =
            compute_verify_data(suite, &master_secret, FinishedSender::Server, &server_hash)?;
        if !bool::from(expected.as_slice().ct_eq(&server_finished.verify_data)) {
            return Err(HandshakeError::CryptoVerificationFailure("server finished"));
        }
        self.observed.server_finished_verified = true;

        let classification = if national {
            ProtocolClassification::NationalCrypto
        } else {
            ProtocolClassification::Standard
        };
        Ok(SecureChannel::from_parts(
            stream,
            ChannelParts {
                classification,
                negotiated: Negotiated {
                    suite,
                    version,
                    client_version: options.hello_version,
                    client_random,
                    server_random: server_hello.random,
                },
                reader,
                writer,
            },
        ))
    }

    async fn next_message<S>(
        &mut self,
        stream: &mut S,
        joiner: &mut HandshakeReassembler,
    ) -> Result<Vec<u8>>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(message) = joiner.next_message()? {
                return Ok(message);
            }
            let (header, body) = read_record(stream).await?;
            match header.content_type {
                ContentType::Handshake => joiner.push(&body),
                ContentType::Alert => return Err(self.record_alert(&body)),
                _ => return Err(HandshakeError::UnexpectedMessage),
            }
        }
    }

    fn record_alert(&mut self, payload: &[u8]) -> HandshakeError {
        self.observed.alert = Alert::decode(payload).ok();
        peer_alert(payload)
    }
}
