//! End-to-end tests: sniffing, certificate selection and the full handshake
//! over in-memory pipes and real TCP connections.
//! 端到端测试：在内存管道和真实 TCP 连接上进行嗅探、证书选择和完整握手。

mod common;

use common::{handshake_pair, init_tracing};
use gm_autoswitch::crypto::keys::KeyScheme;
use gm_autoswitch::protocol::message::{
    Alert, ClientHello, ContentType, EXTENSION_SUPPORTED_VERSIONS, Extension, HandshakeMessage,
    MAX_FRAGMENT_LEN, ProtocolVersion, encode_record,
};
use gm_autoswitch::test_support::{
    ClientOptions, KeyTarget, TestClient, ToyKey, auto_switch_mode, gm_bundle_set, rsa_bundle_set,
    server_config,
};
use gm_autoswitch::{
    CipherSuite, ConfigError, HandshakeError, Listener, ListenerError, ProtocolClassification,
    ServerConfig, ServerMode, WireError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn expect_generic_alert(observed: &gm_autoswitch::test_support::Observed) {
    assert_eq!(observed.alert, Some(Alert::HANDSHAKE_FAILURE));
}

/// Formatted log output of the current thread, kept for assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    /// Routes INFO and above on this thread into the buffer until the guard drops.
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    /// Lines emitted under the handshake outcome target.
    fn outcome_events(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter(|line| line.contains("gm_autoswitch::handshake:"))
            .map(str::to_owned)
            .collect()
    }
}

#[tokio::test]
async fn standard_client_gets_rsa_certificate_and_a_working_channel() {
    let config = server_config(auto_switch_mode());
    let pair = handshake_pair(&config, ClientOptions::standard()).await;

    let mut client = pair.client.expect("client handshake");
    let mut server = pair.server.expect("server handshake");
    assert!(pair.observed.server_finished_verified);
    assert_eq!(server.classification(), ProtocolClassification::Standard);
    assert_eq!(server.suite(), CipherSuite::RsaWithAes128GcmSha256);
    assert_eq!(server.version(), ProtocolVersion::TLS12);
    assert!(pair.observed.server_key_exchange.is_none());
    assert_eq!(
        pair.observed.certificates().unwrap()[0],
        ToyKey::new(KeyScheme::Rsa, 3).certificate()
    );

    client.send(b"ping").await.unwrap();
    assert_eq!(server.recv().await.unwrap().as_deref(), Some(&b"ping"[..]));
    server.send(b"pong").await.unwrap();
    assert_eq!(client.recv().await.unwrap().as_deref(), Some(&b"pong"[..]));

    client.close().await.unwrap();
    assert_eq!(server.recv().await.unwrap(), None);
}

#[tokio::test]
async fn national_client_gets_exactly_two_certificates_in_role_order() {
    let config = server_config(auto_switch_mode());
    let pair = handshake_pair(&config, ClientOptions::national()).await;

    let mut client = pair.client.expect("client handshake");
    let mut server = pair.server.expect("server handshake");
    assert_eq!(server.classification(), ProtocolClassification::NationalCrypto);
    assert_eq!(server.version(), ProtocolVersion::TLCP);
    assert!(server.suite().is_national_crypto());

    assert_eq!(pair.observed.certificate_messages.len(), 1);
    assert_eq!(
        pair.observed.certificates().unwrap(),
        &[
            ToyKey::new(KeyScheme::Sm2, 1).certificate(),
            ToyKey::new(KeyScheme::Sm2, 2).certificate(),
        ][..]
    );
    assert!(pair.observed.server_key_exchange.is_some());

    let large = vec![0x5A; 40_000];
    server.send(&large).await.unwrap();
    let mut received = Vec::new();
    while received.len() < large.len() {
        received.extend(client.recv().await.unwrap().unwrap());
    }
    assert_eq!(received, large);
}

#[tokio::test]
async fn each_national_suite_negotiates() {
    for suite in [CipherSuite::EccSm4CbcSm3, CipherSuite::EccSm4GcmSm3] {
        let options = ClientOptions {
            cipher_suites: vec![suite.id()],
            ..ClientOptions::national()
        };
        let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
        assert_eq!(pair.server.expect("server handshake").suite(), suite);
    }
}

#[tokio::test]
async fn fragmented_client_hello_still_dispatches() {
    // Two-byte records: the first one ends before the client version.
    for fragment_len in [2, 16] {
        let options = ClientOptions {
            hello_fragment_len: Some(fragment_len),
            ..ClientOptions::national()
        };
        let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
        assert!(pair.client.is_ok(), "fragment length {fragment_len}");
        assert_eq!(
            pair.server.expect("server handshake").classification(),
            ProtocolClassification::NationalCrypto
        );
    }
}

#[tokio::test]
async fn fragmented_opportunistic_hello_is_classified_like_the_parsed_one() {
    // The GM suite only arrives in a later record.
    let options = ClientOptions {
        cipher_suites: vec![0x009C, 0xE013],
        hello_fragment_len: Some(16),
        ..ClientOptions::standard()
    };
    let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
    assert!(pair.client.is_ok());
    let server = pair.server.expect("server handshake");
    assert_eq!(server.classification(), ProtocolClassification::NationalCrypto);
    assert_eq!(server.suite(), CipherSuite::EccSm4CbcSm3);
}

#[tokio::test]
async fn gm_capability_in_standard_hello_follows_the_configured_bundles() {
    let options = ClientOptions {
        cipher_suites: vec![0x009C, 0xE013],
        ..ClientOptions::standard()
    };

    // With a GM bundle the opportunistic client is served national-crypto.
    let pair = handshake_pair(&server_config(auto_switch_mode()), options.clone()).await;
    let server = pair.server.expect("auto-switch handshake");
    assert_eq!(server.classification(), ProtocolClassification::NationalCrypto);
    assert_eq!(server.suite(), CipherSuite::EccSm4CbcSm3);
    assert_eq!(pair.observed.certificates().unwrap().len(), 2);

    // Without one it stays on RSA.
    let pair = handshake_pair(
        &server_config(ServerMode::Standard(rsa_bundle_set(3))),
        options,
    )
    .await;
    let server = pair.server.expect("rsa-only handshake");
    assert_eq!(server.classification(), ProtocolClassification::Standard);
    assert_eq!(server.suite(), CipherSuite::RsaWithAes128GcmSha256);
}

#[tokio::test]
async fn supported_versions_rescues_an_unknown_legacy_version() {
    let options = ClientOptions {
        hello_version: ProtocolVersion(0x0302),
        extensions: vec![Extension {
            extension_type: EXTENSION_SUPPORTED_VERSIONS,
            data: vec![2, 0x01, 0x01],
        }],
        ..ClientOptions::national()
    };
    let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
    assert!(pair.client.is_ok());
    assert_eq!(
        pair.server.unwrap().classification(),
        ProtocolClassification::NationalCrypto
    );
}

#[tokio::test]
async fn unrecognized_version_never_sees_a_certificate() {
    let options = ClientOptions {
        hello_version: ProtocolVersion(0x0200),
        ..ClientOptions::standard()
    };
    let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;

    assert!(matches!(
        pair.server,
        Err(HandshakeError::UnsupportedProtocol(_))
    ));
    assert!(matches!(
        pair.client,
        Err(HandshakeError::PeerAlert {
            level: 2,
            description: 40
        })
    ));
    assert!(pair.observed.certificate_messages.is_empty());
    assert!(pair.observed.server_hello.is_none());
}

#[tokio::test]
async fn national_client_is_refused_by_an_rsa_only_server() {
    let config = server_config(ServerMode::Standard(rsa_bundle_set(3)));
    let pair = handshake_pair(&config, ClientOptions::national()).await;

    assert!(matches!(
        pair.server,
        Err(HandshakeError::UnsupportedProtocol(_))
    ));
    assert!(pair.observed.certificate_messages.is_empty());
    expect_generic_alert(&pair.observed);
}

#[tokio::test]
async fn standard_client_is_refused_by_a_gm_only_server() {
    let config = server_config(ServerMode::NationalCrypto(gm_bundle_set(1, 2)));
    let pair = handshake_pair(&config, ClientOptions::standard()).await;
    assert!(matches!(
        pair.server,
        Err(HandshakeError::UnsupportedProtocol(_))
    ));
    assert!(pair.observed.certificate_messages.is_empty());
}

#[tokio::test]
async fn tampered_finished_fails_with_a_generic_alert() {
    let config = server_config(auto_switch_mode());
    // Every verify_data byte (the 4-byte header is followed by 12 bytes).
    for index in 4..16 {
        let options = ClientOptions {
            tamper_finished: Some(index),
            ..ClientOptions::national()
        };
        let pair = handshake_pair(&config, options).await;
        assert!(
            matches!(pair.server, Err(HandshakeError::CryptoVerificationFailure(_))),
            "byte {index}"
        );
        assert!(!pair.observed.server_finished_verified);
        expect_generic_alert(&pair.observed);
    }

    // A flipped ciphertext byte fails record authentication.
    let options = ClientOptions {
        tamper_finished_record: Some(0),
        ..ClientOptions::standard()
    };
    let pair = handshake_pair(&config, options).await;
    assert!(matches!(
        pair.server,
        Err(HandshakeError::CryptoVerificationFailure(_))
    ));
    expect_generic_alert(&pair.observed);
}

#[tokio::test]
async fn encrypting_to_the_signing_certificate_is_reported_as_role_mismatch() {
    let options = ClientOptions {
        key_target: KeyTarget::Authentication,
        ..ClientOptions::national()
    };
    let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
    assert!(matches!(
        pair.server,
        Err(HandshakeError::CertificateRoleMismatch(_))
    ));
    assert!(pair.client.is_err());
}

#[tokio::test]
async fn each_handshake_logs_exactly_one_outcome_event() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let options = ClientOptions {
        key_target: KeyTarget::Authentication,
        ..ClientOptions::national()
    };
    let pair = handshake_pair(&server_config(auto_switch_mode()), options).await;
    assert!(pair.server.is_err());
    let events = logs.outcome_events();
    assert_eq!(events.len(), 1, "{events:#?}");
    let failed = &events[0];
    assert!(failed.contains("handshake failed"), "{failed}");
    assert!(failed.contains("failure_reason="), "{failed}");
    assert!(failed.contains("certificate_role_mismatch"), "{failed}");
    assert!(failed.contains("classification="), "{failed}");
    assert!(failed.contains("national_crypto"), "{failed}");
    assert!(failed.contains("outcome="), "{failed}");

    let logs = CapturedLogs::default();
    let _guard = logs.install();
    let pair = handshake_pair(&server_config(auto_switch_mode()), ClientOptions::standard()).await;
    assert!(pair.server.is_ok());
    let events = logs.outcome_events();
    assert_eq!(events.len(), 1, "{events:#?}");
    let established = &events[0];
    assert!(established.contains("handshake established"), "{established}");
    assert!(established.contains("cipher_suite="), "{established}");
    assert!(established.contains(CipherSuite::RsaWithAes128GcmSha256.name()), "{established}");
    assert!(!established.contains("failure_reason"), "{established}");
    assert!(!established.to_lowercase().contains("secret"), "{established}");
}

#[tokio::test]
async fn plaintext_record_above_the_fragment_limit_is_malformed() {
    init_tracing();
    let acceptor = gm_autoswitch::Acceptor::new(&server_config(auto_switch_mode()));
    let (mut client_io, server_io) = tokio::io::duplex(1 << 16);
    let server = tokio::spawn(async move { acceptor.accept(server_io).await });

    let hello = HandshakeMessage::ClientHello(ClientHello {
        version: ProtocolVersion::TLS12,
        random: [7; 32],
        session_id: Vec::new(),
        cipher_suites: vec![0x009C],
        compression_methods: vec![0],
        extensions: Vec::new(),
    })
    .encode();
    client_io
        .write_all(&encode_record(ContentType::Handshake, ProtocolVersion::TLS12, &hello))
        .await
        .unwrap();
    // Fits a protected record, but not a plaintext one.
    let oversized = vec![0u8; MAX_FRAGMENT_LEN + 1];
    client_io
        .write_all(&encode_record(ContentType::Handshake, ProtocolVersion::TLS12, &oversized))
        .await
        .unwrap();

    assert!(matches!(
        server.await.unwrap(),
        Err(HandshakeError::MalformedRecord(WireError::LengthOverflow { .. }))
    ));
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    let config = ServerConfig::builder()
        .mode(auto_switch_mode())
        .record_protection(std::sync::Arc::new(
            gm_autoswitch::test_support::ToyRecordProtection,
        ))
        .handshake_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let options = ClientOptions {
        stall_after_hello: true,
        ..ClientOptions::standard()
    };
    let pair = handshake_pair(&config, options).await;
    assert!(matches!(pair.server, Err(HandshakeError::HandshakeTimeout)));
    expect_generic_alert(&pair.observed);
}

#[tokio::test]
async fn silent_client_times_out() {
    init_tracing();
    let config = ServerConfig::builder()
        .mode(auto_switch_mode())
        .record_protection(std::sync::Arc::new(
            gm_autoswitch::test_support::ToyRecordProtection,
        ))
        .handshake_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let acceptor = gm_autoswitch::Acceptor::new(&config);
    let (_client_io, server_io) = tokio::io::duplex(1024);
    assert!(matches!(
        acceptor.accept(server_io).await,
        Err(HandshakeError::HandshakeTimeout)
    ));
}

#[tokio::test]
async fn concurrent_handshakes_over_tcp_are_isolated() {
    init_tracing();
    let listener = Listener::bind("127.0.0.1:0", server_config(auto_switch_mode()))
        .await
        .unwrap();
    let handle = listener
        .spawn(|mut channel, _peer| async move {
            while let Ok(Some(data)) = channel.recv().await {
                if channel.send(&data).await.is_err() {
                    break;
                }
            }
        })
        .unwrap();
    let addr = handle.local_addr();

    let mut tasks = Vec::new();
    for i in 0..16usize {
        let options = match i % 4 {
            0 => ClientOptions::standard(),
            1 => ClientOptions::national(),
            2 => ClientOptions {
                tamper_finished: Some(8),
                ..ClientOptions::national()
            },
            _ => ClientOptions {
                tamper_finished_record: Some(1),
                ..ClientOptions::standard()
            },
        };
        tasks.push(tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut client = TestClient::new(options);
            match client.handshake(stream).await {
                Ok(mut channel) => {
                    let message = format!("hello from client {i}");
                    channel.send(message.as_bytes()).await.unwrap();
                    let echoed = channel.recv().await.unwrap();
                    assert_eq!(echoed.as_deref(), Some(message.as_bytes()));
                    channel.close().await.unwrap();
                    true
                }
                Err(_) => false,
            }
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let established = task.await.unwrap();
        assert_eq!(established, i % 4 < 2, "client {i}");
    }
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn bind_rejects_settings_that_bypass_the_builder() {
    for limit in [0, usize::MAX] {
        let mut config = server_config(auto_switch_mode());
        config.settings.max_concurrent_handshakes = limit;
        assert!(
            matches!(
                Listener::bind("127.0.0.1:0", config).await,
                Err(ListenerError::Config(ConfigError::InvalidSettings(_)))
            ),
            "limit {limit}"
        );
    }
}

#[tokio::test]
async fn listener_stops_accepting_after_shutdown() {
    init_tracing();
    let listener = Listener::bind("127.0.0.1:0", server_config(auto_switch_mode()))
        .await
        .unwrap();
    let handle = listener.spawn(|_channel, _peer| async {}).unwrap();
    let addr = handle.local_addr();

    let mut client = TestClient::new(ClientOptions::national());
    let stream = TcpStream::connect(addr).await.unwrap();
    assert!(client.handshake(stream).await.is_ok());

    handle.shutdown().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn non_tls_bytes_get_no_certificate() {
    init_tracing();
    let listener = Listener::bind("127.0.0.1:0", server_config(auto_switch_mode()))
        .await
        .unwrap();
    let handle = listener.spawn(|_channel, _peer| async {}).unwrap();

    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    // Exactly one record header's worth, so nothing is left unread on close.
    stream.write_all(b"GET /").await.unwrap();
    let mut reply = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut reply)
        .await
        .unwrap();
    // Only the generic alert: type 21, TLS 1.2, length 2, fatal handshake_failure.
    assert_eq!(reply, vec![21, 0x03, 0x03, 0x00, 0x02, 2, 40]);
    handle.shutdown().await.unwrap();
}
