//! Listener coordination: binds UDP+TCP up front, serves them on demand.
//!
//! Binding happens in [`ListenerCoordinator::bind`] so a bad address or a
//! busy port fails server construction. [`ListenerCoordinator::start`] spawns
//! one serve loop per transport and returns only once both have handed their
//! socket to the protocol stack, so callers may send queries immediately.

use hickory_proto::ProtoError;
use hickory_server::server::ServerFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::error::Transport;
use crate::router::QueryRouter;
use crate::ServerError;

/// TCP connection timeout for DNS queries.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Sender half of the runtime failure channel.
pub type FailureSender = mpsc::UnboundedSender<ServerError>;

/// Receiver half of the runtime failure channel.
pub type FailureReceiver = mpsc::UnboundedReceiver<ServerError>;

enum State {
    Bound { udp: UdpSocket, tcp: TcpListener },
    Serving { tasks: Vec<JoinHandle<()>> },
    Stopped,
}

enum Socket {
    Udp(UdpSocket),
    Tcp(TcpListener),
}

impl Socket {
    const fn transport(&self) -> Transport {
        match self {
            Self::Udp(_) => Transport::Udp,
            Self::Tcp(_) => Transport::Tcp,
        }
    }
}

/// Owns the UDP socket and TCP listener of a server.
pub struct ListenerCoordinator {
    local_addr: SocketAddr,
    router: QueryRouter,
    state: Mutex<State>,
    shutdown: CancellationToken,
    failures: FailureSender,
    span: Span,
}

impl ListenerCoordinator {
    /// Resolve `bind` once and bind both transports to it.
    ///
    /// With port 0, TCP picks the port and UDP binds to the same one.
    pub async fn bind(
        bind: &str,
        router: QueryRouter,
        failures: FailureSender,
        span: Span,
    ) -> crate::Result<Self> {
        let bind_error = |reason: String| ServerError::Bind {
            addr: bind.to_string(),
            reason,
        };

        let addr = tokio::net::lookup_host(bind)
            .await
            .map_err(|e| bind_error(format!("resolve: {e}")))?
            .next()
            .ok_or_else(|| bind_error(String::from("resolved to no addresses")))?;

        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|e| bind_error(format!("TCP bind {addr}: {e}")))?;
        let local_addr = tcp
            .local_addr()
            .map_err(|e| bind_error(format!("TCP local address: {e}")))?;
        span.in_scope(|| info!(addr = %local_addr, "TCP listener bound"));

        let udp = UdpSocket::bind(local_addr)
            .await
            .map_err(|e| bind_error(format!("UDP bind {local_addr}: {e}")))?;
        span.in_scope(|| info!(addr = %local_addr, "UDP socket bound"));

        Ok(Self {
            local_addr,
            router,
            state: Mutex::new(State::Bound { udp, tcp }),
            shutdown: CancellationToken::new(),
            failures,
            span,
        })
    }

    /// The concrete address both transports are bound to.
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start both serve loops and wait until both are accepting.
    pub async fn start(&self) -> crate::Result<()> {
        let mut state = self.state.lock().await;
        let (udp, tcp) = match std::mem::replace(&mut *state, State::Stopped) {
            State::Bound { udp, tcp } => (udp, tcp),
            State::Serving { tasks } => {
                *state = State::Serving { tasks };
                return Err(ServerError::State(String::from("listeners already started")));
            }
            State::Stopped => {
                return Err(ServerError::State(String::from("listeners were stopped")));
            }
        };

        let (udp_task, udp_ready) = self.spawn_serve_loop(Socket::Udp(udp));
        let (tcp_task, tcp_ready) = self.spawn_serve_loop(Socket::Tcp(tcp));
        *state = State::Serving {
            tasks: vec![udp_task, tcp_task],
        };
        drop(state);

        await_ready(udp_ready, tcp_ready).await?;

        self.span
            .in_scope(|| info!(addr = %self.local_addr, "listeners started"));
        Ok(())
    }

    /// Stop serving and release both sockets. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let tasks = match std::mem::replace(&mut *self.state.lock().await, State::Stopped) {
            State::Serving { tasks } => tasks,
            State::Bound { .. } | State::Stopped => Vec::new(),
        };

        for task in tasks {
            if let Err(e) = task.await {
                self.span
                    .in_scope(|| warn!(error = %e, "serve task did not finish cleanly"));
            }
        }
    }

    fn spawn_serve_loop(&self, socket: Socket) -> (JoinHandle<()>, oneshot::Receiver<()>) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let transport = socket.transport();
        let span = info_span!(parent: &self.span, "listener", %transport);

        let task = tokio::spawn(
            serve(
                socket,
                self.router.clone(),
                ready_tx,
                self.shutdown.clone(),
                self.failures.clone(),
            )
            .instrument(span),
        );
        (task, ready_rx)
    }
}

impl Drop for ListenerCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Two-party rendezvous: each loop signals once its socket is live.
async fn await_ready(
    udp: oneshot::Receiver<()>,
    tcp: oneshot::Receiver<()>,
) -> crate::Result<()> {
    let (udp, tcp) = tokio::join!(udp, tcp);
    for (transport, ready) in [(Transport::Udp, udp), (Transport::Tcp, tcp)] {
        ready.map_err(|_| ServerError::Serve {
            transport,
            reason: String::from("serve loop exited before it was ready"),
        })?;
    }
    Ok(())
}

/// One transport's serve loop.
async fn serve(
    socket: Socket,
    router: QueryRouter,
    ready: oneshot::Sender<()>,
    shutdown: CancellationToken,
    failures: FailureSender,
) {
    let transport = socket.transport();
    let mut server = ServerFuture::new(router);
    match socket {
        Socket::Udp(udp) => server.register_socket(udp),
        Socket::Tcp(tcp) => server.register_listener(tcp, TCP_TIMEOUT),
    }

    // The socket's accept/receive task is now running on the runtime.
    if ready.send(()).is_err() {
        debug!("start() gave up waiting for readiness");
    }

    let outcome = tokio::select! {
        result = server.block_until_done() => Some(result),
        () = shutdown.cancelled() => None,
    };

    match outcome {
        None => {
            if let Err(e) = server.shutdown_gracefully().await {
                warn!(error = %e, "error during graceful shutdown");
            }
            debug!("serve loop stopped");
        }
        Some(result) => report_exit(transport, result, &failures),
    }
}

/// Report a serve loop that ended without being cancelled.
fn report_exit(transport: Transport, result: Result<(), ProtoError>, failures: &FailureSender) {
    let reason = match result {
        Ok(()) => String::from("serve loop exited unexpectedly"),
        Err(e) => e.to_string(),
    };

    error!(reason = %reason, "serve loop failed");
    // The receiver may be gone if nobody is watching; the error is logged above.
    let _ = failures.send(ServerError::Serve { transport, reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{ApexEngine, EngineConfig, EngineFactory};
    use crate::keys::SigningKeys;
    use crate::naming::NamingConnection;
    use tokio_test::{assert_err, assert_ok};

    fn router() -> QueryRouter {
        let config = Config::default().normalize().unwrap();
        let engine = ApexEngine
            .build(EngineConfig::new(
                &config,
                SigningKeys::default(),
                NamingConnection::from_config(&config),
                "test",
            ))
            .unwrap();
        QueryRouter::new(engine)
    }

    async fn bind(addr: &str) -> crate::Result<(ListenerCoordinator, FailureReceiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = ListenerCoordinator::bind(addr, router(), tx, Span::none()).await?;
        Ok((listeners, rx))
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port_shares_udp_and_tcp() {
        let (listeners, _rx) = bind("127.0.0.1:0").await.unwrap();
        let addr = listeners.local_addr();
        assert_ne!(addr.port(), 0);

        // Both transports hold the port.
        assert!(std::net::TcpListener::bind(addr).is_err());
        assert!(std::net::UdpSocket::bind(addr).is_err());
    }

    #[tokio::test]
    async fn test_bind_busy_port_fails() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let err = bind(&addr).await.err().unwrap();
        assert!(err.is_bind_error());
    }

    #[tokio::test]
    async fn test_bind_unresolvable_address() {
        let err = bind("not an address").await.err().unwrap();
        assert!(err.is_bind_error());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (listeners, _rx) = bind("127.0.0.1:0").await.unwrap();
        assert_ok!(listeners.start().await);
        let err = assert_err!(listeners.start().await);
        assert!(matches!(err, ServerError::State(_)));
        listeners.stop().await;
    }

    #[tokio::test]
    async fn test_stop_releases_port_and_reports_no_failure() {
        let (listeners, mut rx) = bind("127.0.0.1:0").await.unwrap();
        let addr = listeners.local_addr();
        listeners.start().await.unwrap();
        listeners.stop().await;
        listeners.stop().await;

        assert_ok!(std::net::TcpListener::bind(addr));
        assert_ok!(std::net::UdpSocket::bind(addr));
        assert_err!(rx.try_recv());
        assert!(matches!(
            listeners.start().await,
            Err(ServerError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_serve_exit_is_reported_with_transport() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        report_exit(Transport::Tcp, Err(ProtoError::from("accept failed")), &tx);
        report_exit(Transport::Udp, Ok(()), &tx);

        match rx.recv().await {
            Some(ServerError::Serve { transport, reason }) => {
                assert_eq!(transport, Transport::Tcp);
                assert!(reason.contains("accept failed"));
            }
            other => panic!("unexpected failure report: {other:?}"),
        }
        match rx.recv().await {
            Some(ServerError::Serve { transport, reason }) => {
                assert_eq!(transport, Transport::Udp);
                assert!(reason.contains("exited unexpectedly"));
            }
            other => panic!("unexpected failure report: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_report_exit_without_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        report_exit(Transport::Udp, Ok(()), &tx);
    }

    #[tokio::test]
    async fn test_loop_dying_before_ready_fails_start() {
        let (udp_tx, udp_rx) = oneshot::channel();
        let (tcp_tx, tcp_rx) = oneshot::channel::<()>();
        udp_tx.send(()).unwrap();
        drop(tcp_tx);

        let err = assert_err!(await_ready(udp_rx, tcp_rx).await);
        assert!(matches!(
            err,
            ServerError::Serve {
                transport: Transport::Tcp,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_ready_when_both_signal() {
        let (udp_tx, udp_rx) = oneshot::channel();
        let (tcp_tx, tcp_rx) = oneshot::channel();
        tcp_tx.send(()).unwrap();
        udp_tx.send(()).unwrap();
        assert_ok!(await_ready(udp_rx, tcp_rx).await);
    }

    #[tokio::test]
    async fn test_stop_before_start_releases_port() {
        let (listeners, _rx) = bind("127.0.0.1:0").await.unwrap();
        let addr = listeners.local_addr();
        listeners.stop().await;
        std::net::TcpListener::bind(addr).unwrap();
        std::net::UdpSocket::bind(addr).unwrap();
    }
}
