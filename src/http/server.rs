//! HTTP server: accept loop and per-connection workers.
//!
//! # Responsibilities
//! - Accept connections under the listener's connection limit
//! - Run each connection on a blocking worker: presentation chain → `HttpConnection` → servicer
//! - Apply transport timeouts from the current (hot-swappable) settings
//! - Stop accepting on shutdown and drain in-flight connections

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::TransportConfig;
use crate::dispatch::{ConnectionServicer, RoutingTable};
use crate::error::Result;
use crate::http::connection::{Connection, HttpConnection};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::Socket;
use crate::presentation::PresentationChain;

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP server for registered web services.
pub struct HttpServer {
    listener: Listener,
    chain: Arc<PresentationChain>,
    servicer: Arc<ConnectionServicer>,
    transport: Arc<ArcSwap<TransportConfig>>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    drain_timeout: Duration,
}

impl HttpServer {
    pub fn new(
        listener: Listener,
        chain: Arc<PresentationChain>,
        routes: Arc<RoutingTable>,
        transport: TransportConfig,
        shutdown: Shutdown,
    ) -> Self {
        let transport = Arc::new(ArcSwap::from_pointee(transport));
        let servicer = ConnectionServicer::new(routes, Arc::clone(&transport))
            .with_shutdown(shutdown.clone());
        Self {
            listener,
            chain,
            servicer: Arc::new(servicer),
            transport,
            tracker: ConnectionTracker::new(),
            shutdown,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// How long `run` waits for open connections after shutdown.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle for swapping transport settings while running.
    pub fn transport(&self) -> Arc<ArcSwap<TransportConfig>> {
        Arc::clone(&self.transport)
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Accept until shutdown, then wait for open connections to finish.
    pub async fn run(self) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(address = %addr, wrappers = self.chain.len(), "HTTP server starting");
        }

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_worker(stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
            }
        }

        tracing::info!(active = self.tracker.active_count(), "HTTP server draining connections");
        if !self.tracker.wait_idle(self.drain_timeout).await {
            tracing::warn!(active = self.tracker.active_count(), "Drain timeout elapsed with open connections");
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr, permit: ConnectionPermit) {
        let chain = Arc::clone(&self.chain);
        let servicer = Arc::clone(&self.servicer);
        let transport = self.transport.load_full();
        let tracker = self.tracker.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            serve_connection(stream, peer, &chain, &servicer, &transport, &tracker);
        });
    }
}

/// Present, wrap and serve one accepted connection. Runs on a blocking thread.
pub fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    chain: &PresentationChain,
    servicer: &ConnectionServicer,
    transport: &TransportConfig,
    tracker: &ConnectionTracker,
) {
    let mut guard = tracker.track();
    let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer = %peer);
    let _entered = span.enter();

    if let Err(e) = stream
        .set_read_timeout(Some(transport.read_timeout()))
        .and_then(|()| stream.set_write_timeout(Some(transport.write_timeout())))
    {
        tracing::debug!(error = %e, "Could not set socket timeouts");
    }
    // The clone shares the socket, so timeouts set on it reach TLS streams too.
    let control = stream.try_clone().ok();

    let presented = chain.create_wrapper(Box::new(stream));
    guard.mark_secure(presented.secure);
    tracing::debug!(wrapper = presented.wrapper, secure = presented.secure, "Connection presented");

    let mut conn = HttpConnection::new(presented.stream)
        .with_secure(presented.secure)
        .with_peer_addr(Some(peer));
    let served = servicer.serve(&mut conn, control.as_ref().map(|s| s as &dyn Socket));

    tracing::debug!(
        served,
        bytes_sent = conn.bytes_sent(),
        bytes_received = conn.bytes_received(),
        "Connection finished"
    );
}
