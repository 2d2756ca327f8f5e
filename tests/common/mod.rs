#![allow(dead_code)]

use gm_autoswitch::error::Result;
use gm_autoswitch::test_support::{ClientOptions, Observed, TestClient};
use gm_autoswitch::{Acceptor, Rewind, SecureChannel, ServerConfig};
use tokio::io::{DuplexStream, duplex};

/// Installs a fmt subscriber once, honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Pair {
    pub client: Result<SecureChannel<DuplexStream>>,
    pub observed: Observed,
    pub server: Result<SecureChannel<Rewind<DuplexStream>>>,
}

/// Runs one handshake between a scripted client and the acceptor over an
/// in-memory pipe.
pub async fn handshake_pair(config: &ServerConfig, options: ClientOptions) -> Pair {
    init_tracing();
    let acceptor = Acceptor::new(config);
    let (client_io, server_io) = duplex(1 << 16);
    let server = tokio::spawn(async move { acceptor.accept(server_io).await });

    let mut client = TestClient::new(options);
    let client_result = client.handshake(client_io).await;
    let server_result = server.await.expect("acceptor task panicked");
    Pair {
        client: client_result,
        observed: client.observed().clone(),
        server: server_result,
    }
}
