//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io::{self, Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use service_runtime::config::TransportConfig;
use service_runtime::http::HttpConnection;
use service_runtime::net::connection::ConnectionTracker;
use service_runtime::net::listener::Listener;
use service_runtime::net::Socket;
use service_runtime::{HttpServer, PresentationChain, ServiceRegistry, Shutdown};

/// In-memory socket: fixed input, shared output, peek without consuming.
pub struct MemorySocket {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
    timeout: Mutex<Option<Duration>>,
}

impl MemorySocket {
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: Cursor::new(input.into()),
            output: Arc::new(Mutex::new(Vec::new())),
            timeout: Mutex::new(None),
        }
    }

    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        *self.timeout.lock() = timeout;
        self
    }

    /// Handle on everything written so far.
    pub fn output(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.output)
    }
}

impl Read for MemorySocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemorySocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Socket for MemorySocket {
    fn peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.input.get_ref();
        let start = (self.input.position() as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn read_timeout(&self) -> io::Result<Option<Duration>> {
        Ok(*self.timeout.lock())
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        *self.timeout.lock() = timeout;
        Ok(())
    }
}

/// Server-side connection over `input`, with a handle on what it writes.
pub fn connection(input: impl Into<Vec<u8>>) -> (HttpConnection<MemorySocket>, Arc<Mutex<Vec<u8>>>) {
    let socket = MemorySocket::new(input);
    let output = socket.output();
    (HttpConnection::new(socket), output)
}

/// A running server on a loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub tracker: ConnectionTracker,
    pub handle: JoinHandle<service_runtime::Result<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Start a plain-HTTP server for `registry` on an ephemeral port.
pub async fn start_server(registry: &ServiceRegistry) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();

    let transport = TransportConfig {
        keep_alive_timeout_secs: 1,
        ..TransportConfig::default()
    };
    let server = HttpServer::new(
        Listener::from_tokio(listener, 64),
        Arc::new(PresentationChain::new()),
        registry.routes(),
        transport,
        shutdown.clone(),
    )
    .with_drain_timeout(Duration::from_secs(2));

    let tracker = server.tracker();
    let handle = tokio::spawn(server.run());
    TestServer {
        addr,
        shutdown,
        tracker,
        handle,
    }
}

/// `Write` sink whose contents stay inspectable after it is moved into a message.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
