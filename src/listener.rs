//! Accepts connections, dispatches each one to the family its ClientHello
//! asks for, and hands established channels to the application.
//!
//! Every connection runs in its own task. The only state shared between
//! tasks is the read-only [`Selector`] and the handshake concurrency limit.
//!
//! 接受连接，按 ClientHello 请求的协议族分派，并把建立好的通道交给应用。
//! 每个连接在独立任务中运行；任务之间共享的只有只读的 [`Selector`] 和
//! 握手并发上限。

use crate::channel::SecureChannel;
use crate::config::{HandshakeSettings, ServerConfig};
use crate::crypto::protection::RecordProtection;
use crate::error::{HandshakeError, Result};
use crate::handshake::driver::{Progress, drive};
use crate::handshake::server::HandshakeServer;
use crate::protocol::message::{Alert, ContentType, ProtocolVersion, encode_record};
use crate::protocol::state::Phase;
use crate::selector::Selector;
use crate::sniffer::{ProtocolClassification, Rewind, Sniffer};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "gm_autoswitch::handshake";
const ALERT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Errors from the listening socket itself (never from a single connection).
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Config(#[from] crate::error::ConfigError),
    #[error("listener task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs the full server side of one connection: sniff, select, handshake.
///
/// 执行单个连接的完整服务器端流程：嗅探、选择、握手。
#[derive(Debug)]
pub struct Acceptor {
    sniffer: Sniffer,
    selector: Selector,
    settings: HandshakeSettings,
    record_protection: Arc<dyn RecordProtection>,
}

impl Acceptor {
    pub fn new(config: &ServerConfig) -> Self {
        let selector = Selector::new(&config.mode, &config.settings);
        Self {
            sniffer: Sniffer::new(selector.policy())
                .with_max_hello_len(config.settings.max_handshake_message_len),
            selector,
            settings: config.settings.clone(),
            record_protection: Arc::clone(&config.record_protection),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn settings(&self) -> &HandshakeSettings {
        &self.settings
    }

    /// Accepts a connection whose peer address is unknown (e.g. an in-memory
    /// stream).
    pub async fn accept<S>(&self, stream: S) -> Result<SecureChannel<Rewind<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.accept_from(stream, None).await
    }

    /// Performs the handshake under the configured deadline.
    ///
    /// On failure the peer receives one generic fatal `handshake_failure`
    /// alert and the stream is shut down; the detailed reason is only logged.
    ///
    /// 在配置的期限内完成握手。失败时对端只会收到一个通用的致命
    /// `handshake_failure` 警报，随后关闭流；详细原因只记录在日志中。
    pub async fn accept_from<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
    ) -> Result<SecureChannel<Rewind<S>>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.settings.handshake_timeout();
        let mut outcome = Outcome {
            peer,
            classification: ProtocolClassification::Unrecognized,
            progress: Progress::default(),
        };

        let (classification, mut stream) =
            match timeout_at(deadline, self.sniffer.sniff(stream)).await {
                Ok(Ok(sniffed)) => sniffed,
                Ok(Err(err)) => return Err(outcome.failed(err)),
                // The stream moved into the cancelled future and is already closed.
                Err(_) => return Err(outcome.failed(HandshakeError::HandshakeTimeout)),
            };
        outcome.classification = classification;
        debug!(target: LOG_TARGET, peer = ?peer, classification = classification.as_str(), "client hello sniffed");

        let result = match self.selector.select(classification) {
            Ok(bundles) => {
                let server = HandshakeServer::builder()
                    .bundles(bundles)
                    .policy(self.sniffer.policy())
                    .record_protection(Arc::clone(&self.record_protection))
                    .build();
                let driving = drive(
                    server,
                    &mut stream,
                    self.settings.max_handshake_message_len,
                    &mut outcome.progress,
                );
                match timeout_at(deadline, driving).await {
                    Ok(result) => result,
                    Err(_) => Err(HandshakeError::HandshakeTimeout),
                }
            }
            Err(err) => Err(err.into()),
        };

        match result {
            Ok(established) => {
                outcome.progress.phase = established.phase();
                outcome.established();
                Ok(SecureChannel::from_parts(stream, established.into_parts()))
            }
            Err(err) => {
                if !matches!(err, HandshakeError::Io(_)) {
                    abort(&mut stream, classification).await;
                }
                Err(outcome.failed(err))
            }
        }
    }
}

/// Sends the generic fatal alert and shuts the stream down, best effort.
async fn abort<S>(stream: &mut S, classification: ProtocolClassification)
where
    S: AsyncWrite + Unpin,
{
    let version = classification
        .server_version()
        .unwrap_or(ProtocolVersion::TLS12);
    let record = encode_record(
        ContentType::Alert,
        version,
        &Alert::HANDSHAKE_FAILURE.encode(),
    );
    let closing = async {
        stream.write_all(&record).await?;
        stream.flush().await?;
        stream.shutdown().await
    };
    if let Ok(Err(err)) = timeout(ALERT_WRITE_TIMEOUT, closing).await {
        debug!(target: LOG_TARGET, error = %err, "failed to deliver handshake_failure alert");
    }
}

/// The per-connection outcome event.
struct Outcome {
    peer: Option<SocketAddr>,
    classification: ProtocolClassification,
    progress: Progress,
}

impl Outcome {
    fn suite_name(&self) -> &'static str {
        self.progress.suite.map(|suite| suite.name()).unwrap_or("none")
    }

    fn established(&self) {
        info!(
            target: LOG_TARGET,
            peer = ?self.peer,
            classification = self.classification.as_str(),
            cipher_suite = self.suite_name(),
            outcome = Phase::Established.as_str(),
            "handshake established"
        );
    }

    fn failed(&self, err: HandshakeError) -> HandshakeError {
        warn!(
            target: LOG_TARGET,
            peer = ?self.peer,
            classification = self.classification.as_str(),
            cipher_suite = self.suite_name(),
            outcome = Phase::Failed.as_str(),
            failed_in = self.progress.phase.as_str(),
            failure_reason = err.failure_reason(),
            error = %err,
            "handshake failed"
        );
        err
    }
}

/// A TCP listener that auto-switches between the configured families.
///
/// 在已配置协议族之间自动切换的 TCP 监听器。
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    acceptor: Arc<Acceptor>,
    limiter: Arc<Semaphore>,
}

/// Handle returned by [`Listener::spawn`] that allows triggering shutdown.
#[derive(Debug)]
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the accept loop to exit. Connections
    /// already handed to the handler keep running.
    pub async fn shutdown(self) -> std::result::Result<(), ListenerError> {
        let _ = self.shutdown.send(true);
        self.join.await?;
        Ok(())
    }
}

impl Listener {
    pub async fn bind<A>(addr: A, config: ServerConfig) -> std::result::Result<Self, ListenerError>
    where
        A: ToSocketAddrs,
    {
        config.settings.validate()?;
        let listener = TcpListener::bind(addr).await?;
        let limiter = Arc::new(Semaphore::new(config.settings.max_concurrent_handshakes));
        Ok(Self {
            listener,
            acceptor: Arc::new(Acceptor::new(&config)),
            limiter,
        })
    }

    pub fn local_addr(&self) -> std::result::Result<SocketAddr, ListenerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Spawns the accept loop on the current runtime.
    pub fn spawn<F, Fut>(self, handler: F) -> std::result::Result<ListenerHandle, ListenerError>
    where
        F: Fn(SecureChannel<Rewind<TcpStream>>, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(handler, shutdown_rx));
        Ok(ListenerHandle {
            local_addr,
            shutdown: shutdown_tx,
            join,
        })
    }

    /// Accepts until `shutdown` flips (or its sender is dropped).
    ///
    /// Each connection holds a handshake slot only until its handshake ends;
    /// the handler runs outside the limit.
    ///
    /// 持续接受连接，直到 `shutdown` 被置位（或其发送端被丢弃）。
    pub async fn run<F, Fut>(self, handler: F, mut shutdown: watch::Receiver<bool>)
    where
        F: Fn(SecureChannel<Rewind<TcpStream>>, SocketAddr) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let accept = async {
                let permit = Arc::clone(&self.limiter).acquire_owned().await;
                (permit, self.listener.accept().await)
            };
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(target: LOG_TARGET, "listener received shutdown signal");
                        break;
                    }
                }
                (permit, accepted) = accept => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    match accepted {
                        Ok((stream, peer)) => {
                            if let Err(err) = stream.set_nodelay(true) {
                                debug!(target: LOG_TARGET, %peer, error = %err, "set_nodelay failed");
                            }
                            let acceptor = Arc::clone(&self.acceptor);
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                let accepted = acceptor.accept_from(stream, Some(peer)).await;
                                drop(permit);
                                if let Ok(channel) = accepted {
                                    handler(channel, peer).await;
                                }
                            });
                        }
                        Err(err) => {
                            warn!(target: LOG_TARGET, error = %err, "tcp accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }
    }
}

/// Binds `addr` and serves until the process ends.
///
/// 绑定 `addr` 并持续服务，直到进程结束。
pub async fn serve<A, F, Fut>(
    addr: A,
    config: ServerConfig,
    handler: F,
) -> std::result::Result<(), ListenerError>
where
    A: ToSocketAddrs,
    F: Fn(SecureChannel<Rewind<TcpStream>>, SocketAddr) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = Listener::bind(addr, config).await?;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    listener.run(handler, shutdown_rx).await;
    Ok(())
}
