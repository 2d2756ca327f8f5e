//! Integration test for the server handshake state machine, driven message by
//! message without any I/O.
//! 对服务器握手状态机的集成测试，逐条消息驱动，不涉及 I/O。

use gm_autoswitch::crypto::keys::{
    FinishedSender, KeyScheme, MasterSecret, compute_verify_data, derive_key_block,
    derive_master_secret,
};
use gm_autoswitch::crypto::protection::{RecordProtection, RecordProtector};
use gm_autoswitch::crypto::suite::CipherSuite;
use gm_autoswitch::error::{HandshakeError, Result};
use gm_autoswitch::handshake::server::{HandshakeServer, ServerFlight};
use gm_autoswitch::protocol::message::{
    ClientHello, ClientKeyExchange, ContentType, Finished, HandshakeMessage, ProtocolVersion,
    RecordHeader, ServerHello, server_key_exchange_signed_params,
};
use gm_autoswitch::protocol::state::{
    AwaitingFinished, AwaitingKeyExchange, Phase, Ready, ServerAwaitingFinished,
    ServerAwaitingKeyExchange, ServerReady,
};
use gm_autoswitch::protocol::transcript::Transcript;
use gm_autoswitch::test_support::{ToyKey, ToyRecordProtection, auto_switch_mode};
use gm_autoswitch::{HandshakeSettings, ProtocolClassification, Selector};
use std::sync::Arc;

const SM2_SIGN: u8 = 1;
const SM2_ENC: u8 = 2;
const RSA: u8 = 3;

fn server_for(classification: ProtocolClassification) -> Result<HandshakeServer<Ready, ServerReady>> {
    let selector = Selector::new(&auto_switch_mode(), &HandshakeSettings::default());
    let bundles = selector.select(classification)?;
    Ok(HandshakeServer::builder()
        .bundles(bundles)
        .policy(selector.policy())
        .record_protection(Arc::new(ToyRecordProtection))
        .build())
}

fn client_hello(version: ProtocolVersion, suites: &[u16]) -> ([u8; 32], Vec<u8>) {
    let random = [0x42; 32];
    let hello = HandshakeMessage::ClientHello(ClientHello {
        version,
        random,
        session_id: Vec::new(),
        cipher_suites: suites.to_vec(),
        compression_methods: vec![0],
        extensions: Vec::new(),
    });
    (random, hello.encode())
}

fn server_hello(flight: &ServerFlight) -> &ServerHello {
    match &flight.messages[0] {
        HandshakeMessage::ServerHello(hello) => hello,
        other => panic!("flight must open with ServerHello, got {other:?}"),
    }
}

fn pre_master_secret(version: ProtocolVersion) -> Vec<u8> {
    let mut pms = vec![0x17; 48];
    pms[..2].copy_from_slice(&version.0.to_be_bytes());
    pms
}

/// Client-side view of a handshake in progress.
struct ClientSide {
    transcript: Transcript,
    client_random: [u8; 32],
    server_random: [u8; 32],
    suite: CipherSuite,
    version: ProtocolVersion,
}

impl ClientSide {
    fn keys(&self, pms: &[u8]) -> Result<(MasterSecret, Box<dyn RecordProtector>, Box<dyn RecordProtector>)> {
        let master = derive_master_secret(self.suite, pms, &self.client_random, &self.server_random)?;
        let block = derive_key_block(self.suite, &master, &self.client_random, &self.server_random)?;
        let writer = ToyRecordProtection.protector(self.suite, &block.client_write)?;
        let reader = ToyRecordProtection.protector(self.suite, &block.server_write)?;
        Ok((master, writer, reader))
    }
}

/// Runs the hello exchange and returns the server awaiting ClientKeyExchange.
fn hello_exchange(
    classification: ProtocolClassification,
    version: ProtocolVersion,
    suites: &[u16],
) -> Result<(
    ClientSide,
    ServerFlight,
    HandshakeServer<AwaitingKeyExchange, ServerAwaitingKeyExchange>,
)> {
    let server = server_for(classification)?;
    assert_eq!(server.phase(), Phase::AwaitingClientHello);

    let (client_random, hello) = client_hello(version, suites);
    let mut transcript = Transcript::new();
    transcript.update(&hello);

    let (flight, server) = server.process_client_hello(&hello)?;
    assert_eq!(server.phase(), Phase::AwaitingClientKeyExchange);
    transcript.start(flight.suite.hash());
    transcript.update(flight.bytes());

    let client = ClientSide {
        transcript,
        client_random,
        server_random: server_hello(&flight).random,
        suite: flight.suite,
        version: flight.version,
    };
    Ok((client, flight, server))
}

/// Sends ClientKeyExchange and ChangeCipherSpec.
fn key_exchange(
    client: &mut ClientSide,
    server: HandshakeServer<AwaitingKeyExchange, ServerAwaitingKeyExchange>,
    encrypted_pre_master_secret: Vec<u8>,
) -> Result<HandshakeServer<AwaitingFinished, ServerAwaitingFinished>> {
    let exchange = HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
        encrypted_pre_master_secret,
    })
    .encode();
    client.transcript.update(&exchange);
    let mut server = server.process_client_key_exchange(&exchange)?;
    assert_eq!(server.phase(), Phase::AwaitingFinished);
    server.process_change_cipher_spec(&[1])?;
    Ok(server)
}

fn client_finished(client: &mut ClientSide, master: &MasterSecret) -> Result<Vec<u8>> {
    let hash = client.transcript.current_hash().expect("hash started");
    let verify_data = compute_verify_data(client.suite, master, FinishedSender::Client, &hash)?;
    let finished = HandshakeMessage::Finished(Finished {
        verify_data: verify_data.to_vec(),
    })
    .encode();
    client.transcript.update(&finished);
    Ok(finished)
}

fn sealed_record(
    writer: &mut Box<dyn RecordProtector>,
    version: ProtocolVersion,
    plaintext: &[u8],
) -> Result<(RecordHeader, Vec<u8>)> {
    let sealed = writer.seal(ContentType::Handshake, version, plaintext)?;
    let header = RecordHeader {
        content_type: ContentType::Handshake,
        version,
        length: sealed.len(),
    };
    Ok((header, sealed))
}

#[test]
fn test_national_crypto_handshake() -> Result<()> {
    // --- 1. Hello exchange ---
    println!("--- ClientHello (TLCP) ---");
    let (mut client, flight, server) = hello_exchange(
        ProtocolClassification::NationalCrypto,
        ProtocolVersion::TLCP,
        &[0xE013, 0xE053],
    )?;
    assert_eq!(flight.version, ProtocolVersion::TLCP);
    // Server preference wins: GCM first.
    assert_eq!(flight.suite, CipherSuite::EccSm4GcmSm3);

    // --- 2. Two certificates, signing first ---
    println!("--- Checking Certificate and ServerKeyExchange ---");
    let certificates: Vec<_> = flight.certificate_messages().collect();
    assert_eq!(certificates.len(), 1);
    let sign_cert = ToyKey::new(KeyScheme::Sm2, SM2_SIGN).certificate();
    let enc_cert = ToyKey::new(KeyScheme::Sm2, SM2_ENC).certificate();
    assert_eq!(certificates[0].certificates, vec![sign_cert, enc_cert.clone()]);

    let signature = flight
        .messages
        .iter()
        .find_map(|m| match m {
            HandshakeMessage::ServerKeyExchange(ske) => Some(ske.signature.clone()),
            _ => None,
        })
        .expect("GM flight carries ServerKeyExchange");
    let params =
        server_key_exchange_signed_params(&client.client_random, &client.server_random, &enc_cert);
    assert!(ToyKey::new(KeyScheme::Sm2, SM2_SIGN)
        .public_key()
        .verify(&params, &signature));
    assert!(matches!(
        flight.messages.last(),
        Some(HandshakeMessage::ServerHelloDone)
    ));

    // --- 3. Key exchange to the encryption certificate ---
    println!("--- ClientKeyExchange ---");
    let pms = pre_master_secret(ProtocolVersion::TLCP);
    let ciphertext = ToyKey::new(KeyScheme::Sm2, SM2_ENC).public_key().encrypt(&pms);
    let mut server = key_exchange(&mut client, server, ciphertext)?;
    let (master, mut writer, mut reader) = client.keys(&pms)?;

    // --- 4. Finished ---
    println!("--- Finished ---");
    let finished = client_finished(&mut client, &master)?;
    let (header, sealed) = sealed_record(&mut writer, client.version, &finished)?;
    let opened = server.open_handshake_record(&header, &sealed)?;
    let (records, established) = server.process_finished(&opened)?;
    assert_eq!(established.phase(), Phase::Established);
    assert_eq!(established.suite(), CipherSuite::EccSm4GcmSm3);

    // CCS record (6 bytes) followed by the sealed server Finished.
    assert_eq!(&records[..6], &[20, 0x01, 0x01, 0x00, 0x01, 0x01]);
    let plaintext = reader.open(ContentType::Handshake, client.version, &records[11..])?;
    let hash = client.transcript.current_hash().expect("hash started");
    let expected = compute_verify_data(client.suite, &master, FinishedSender::Server, &hash)?;
    assert_eq!(
        HandshakeMessage::decode(&plaintext)?,
        HandshakeMessage::Finished(Finished {
            verify_data: expected.to_vec()
        })
    );
    println!("--- Handshake established ---");
    Ok(())
}

#[test]
fn test_standard_handshake() -> Result<()> {
    let (mut client, flight, server) = hello_exchange(
        ProtocolClassification::Standard,
        ProtocolVersion::TLS12,
        &[0x003C, 0x009D],
    )?;
    assert_eq!(flight.version, ProtocolVersion::TLS12);
    assert_eq!(flight.suite, CipherSuite::RsaWithAes256GcmSha384);
    assert!(flight
        .messages
        .iter()
        .all(|m| !matches!(m, HandshakeMessage::ServerKeyExchange(_))));
    let certificates: Vec<_> = flight.certificate_messages().collect();
    assert_eq!(
        certificates[0].certificates[0],
        ToyKey::new(KeyScheme::Rsa, RSA).certificate()
    );

    let pms = pre_master_secret(ProtocolVersion::TLS12);
    let ciphertext = ToyKey::new(KeyScheme::Rsa, RSA).public_key().encrypt(&pms);
    let mut server = key_exchange(&mut client, server, ciphertext)?;
    let (master, mut writer, _reader) = client.keys(&pms)?;

    let finished = client_finished(&mut client, &master)?;
    let (header, sealed) = sealed_record(&mut writer, client.version, &finished)?;
    let opened = server.open_handshake_record(&header, &sealed)?;
    let (_records, established) = server.process_finished(&opened)?;
    assert_eq!(established.version(), ProtocolVersion::TLS12);

    // Only the record protectors are handed over; they carry on from the
    // client's Finished record.
    let mut parts = established.into_parts();
    assert_eq!(parts.classification, ProtocolClassification::Standard);
    let sealed = writer.seal(ContentType::ApplicationData, client.version, b"after finished")?;
    let opened = parts
        .reader
        .open(ContentType::ApplicationData, client.version, &sealed)?;
    assert_eq!(opened, b"after finished");
    Ok(())
}

#[test]
fn test_wrong_verify_data_fails() -> Result<()> {
    let (mut client, _flight, server) = hello_exchange(
        ProtocolClassification::NationalCrypto,
        ProtocolVersion::TLCP,
        &[0xE013],
    )?;
    let pms = pre_master_secret(ProtocolVersion::TLCP);
    let ciphertext = ToyKey::new(KeyScheme::Sm2, SM2_ENC).public_key().encrypt(&pms);
    let mut server = key_exchange(&mut client, server, ciphertext)?;
    let (master, mut writer, _reader) = client.keys(&pms)?;

    let mut finished = client_finished(&mut client, &master)?;
    let last = finished.len() - 1;
    finished[last] ^= 0x80;
    let (header, sealed) = sealed_record(&mut writer, client.version, &finished)?;
    let opened = server.open_handshake_record(&header, &sealed)?;
    assert!(matches!(
        server.process_finished(&opened),
        Err(HandshakeError::CryptoVerificationFailure(_))
    ));
    Ok(())
}

#[test]
fn test_encrypting_to_signing_certificate_is_a_role_mismatch() -> Result<()> {
    let (mut client, _flight, server) = hello_exchange(
        ProtocolClassification::NationalCrypto,
        ProtocolVersion::TLCP,
        &[0xE013],
    )?;
    let pms = pre_master_secret(ProtocolVersion::TLCP);
    let ciphertext = ToyKey::new(KeyScheme::Sm2, SM2_SIGN).public_key().encrypt(&pms);
    assert!(matches!(
        key_exchange(&mut client, server, ciphertext),
        Err(HandshakeError::CertificateRoleMismatch(_))
    ));
    Ok(())
}

#[test]
fn test_garbage_key_exchange_is_a_verification_failure() -> Result<()> {
    let (mut client, _flight, server) = hello_exchange(
        ProtocolClassification::NationalCrypto,
        ProtocolVersion::TLCP,
        &[0xE013],
    )?;
    assert!(matches!(
        key_exchange(&mut client, server, vec![0xAB; 64]),
        Err(HandshakeError::CryptoVerificationFailure(_))
    ));
    Ok(())
}

#[test]
fn test_pre_master_secret_must_echo_client_version() -> Result<()> {
    let (mut client, _flight, server) = hello_exchange(
        ProtocolClassification::Standard,
        ProtocolVersion::TLS12,
        &[0x009C],
    )?;
    let pms = pre_master_secret(ProtocolVersion::TLS10);
    let ciphertext = ToyKey::new(KeyScheme::Rsa, RSA).public_key().encrypt(&pms);
    assert!(matches!(
        key_exchange(&mut client, server, ciphertext),
        Err(HandshakeError::CryptoVerificationFailure(_))
    ));
    Ok(())
}

#[test]
fn test_hello_family_must_match_selected_bundles() -> Result<()> {
    let server = server_for(ProtocolClassification::Standard)?;
    let (_, hello) = client_hello(ProtocolVersion::TLCP, &[0xE013]);
    assert!(matches!(
        server.process_client_hello(&hello),
        Err(HandshakeError::ClassificationMismatch {
            sniffed: ProtocolClassification::Standard,
            parsed: ProtocolClassification::NationalCrypto,
        })
    ));
    Ok(())
}

#[test]
fn test_no_common_cipher_suite() -> Result<()> {
    let server = server_for(ProtocolClassification::Standard)?;
    // Only a CBC-SHA1 suite this server does not enable.
    let (_, hello) = client_hello(ProtocolVersion::TLS12, &[0x002F]);
    assert!(matches!(
        server.process_client_hello(&hello),
        Err(HandshakeError::NoCommonCipherSuite)
    ));
    Ok(())
}

#[test]
fn test_out_of_order_messages_are_rejected() -> Result<()> {
    let server = server_for(ProtocolClassification::Standard)?;
    let exchange = HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
        encrypted_pre_master_secret: vec![1; 32],
    })
    .encode();
    assert!(matches!(
        server.process_client_hello(&exchange),
        Err(HandshakeError::UnexpectedMessage)
    ));

    // Finished before ChangeCipherSpec.
    let (mut client, _flight, server) = hello_exchange(
        ProtocolClassification::Standard,
        ProtocolVersion::TLS12,
        &[0x009C],
    )?;
    let pms = pre_master_secret(ProtocolVersion::TLS12);
    let exchange = HandshakeMessage::ClientKeyExchange(ClientKeyExchange {
        encrypted_pre_master_secret: ToyKey::new(KeyScheme::Rsa, RSA).public_key().encrypt(&pms),
    })
    .encode();
    client.transcript.update(&exchange);
    let server = server.process_client_key_exchange(&exchange)?;
    assert!(!server.client_cipher_active());
    let (master, _writer, _reader) = client.keys(&pms)?;
    let finished = client_finished(&mut client, &master)?;
    assert!(matches!(
        server.process_finished(&finished),
        Err(HandshakeError::UnexpectedMessage)
    ));
    Ok(())
}
