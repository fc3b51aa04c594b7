//! Per-connection request loop.
//!
//! # Responsibilities
//! - Receive request headers until the peer closes or keep-alive ends
//! - Answer unsupported versions (505), malformed headers (400) and unknown paths (404)
//! - Route by host, normalized path and connection security, then run the service
//! - Turn service failures into structured json error responses
//!
//! # Design Decisions
//! - Synchronous: one worker thread owns the connection for its lifetime
//! - Keep-alive only survives when both sides allow it and the request body was read
//! - Idle time between requests is bounded by the keep-alive timeout, not the read timeout

use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, SERVER, TRANSFER_ENCODING};
use http::{StatusCode, Version};

use crate::config::TransportConfig;
use crate::dispatch::exchange::Exchange;
use crate::dispatch::routes::{normalize_path, RoutingTable};
use crate::error::{Error, Result};
use crate::http::{Connection, Header};
use crate::lifecycle::Shutdown;
use crate::message::content_type::CONTENT_TYPE_JSON;
use crate::message::Message;
use crate::net::Socket;
use crate::observability::metrics;

const FORWARDED_HOST: &str = "X-Forwarded-Host";
const HOST: &str = "Host";
const MAX_DISCARD_BYTES: u64 = 64 * 1024;

/// Serves HTTP requests on presented connections.
pub struct ConnectionServicer {
    routes: Arc<RoutingTable>,
    transport: Arc<ArcSwap<TransportConfig>>,
    shutdown: Option<Shutdown>,
}

impl ConnectionServicer {
    pub fn new(routes: Arc<RoutingTable>, transport: Arc<ArcSwap<TransportConfig>>) -> Self {
        Self {
            routes,
            transport,
            shutdown: None,
        }
    }

    /// Stop keep-alive loops once `shutdown` triggers.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn routes(&self) -> &Arc<RoutingTable> {
        &self.routes
    }

    /// Serve requests until the connection should close.
    ///
    /// `socket` is the raw socket under `conn` (or a clone of it), used to
    /// switch between read and keep-alive timeouts. Returns the number of
    /// requests served.
    pub fn serve<C: Connection>(&self, conn: &mut C, socket: Option<&dyn Socket>) -> usize {
        let mut served = 0;
        loop {
            let config = self.transport.load_full();
            if served > 0 {
                set_timeout(socket, &config, config.keep_alive_timeout());
            }

            let request = match conn.receive_header() {
                Ok(Some(request)) => request,
                Ok(None) => {
                    tracing::debug!(served, "Peer closed connection");
                    break;
                }
                Err(Error::BadHeader(reason)) => {
                    tracing::warn!(peer = ?conn.peer_addr(), reason = %reason, "Malformed request header");
                    self.reply_html(conn, Version::HTTP_11, StatusCode::BAD_REQUEST, &config);
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, served, "Connection read ended");
                    break;
                }
            };
            if served > 0 {
                set_timeout(socket, &config, config.read_timeout());
            }
            served += 1;

            let keep_alive = self.service_request(conn, request, &config);
            if !keep_alive {
                break;
            }
            if self.shutdown.as_ref().map(Shutdown::is_triggered).unwrap_or(false) {
                tracing::debug!("Closing keep-alive connection for shutdown");
                break;
            }
        }
        served
    }

    /// Handle one request. Returns whether the connection may be reused.
    fn service_request<C: Connection>(&self, conn: &mut C, request: Header, config: &TransportConfig) -> bool {
        let started = Instant::now();
        if !request.is_request() {
            tracing::warn!(header = ?request.start_line(), "Expected a request line");
            self.reply_html(conn, Version::HTTP_11, StatusCode::BAD_REQUEST, config);
            return false;
        }

        let version = request.version();
        if version != Version::HTTP_10 && version != Version::HTTP_11 {
            tracing::warn!(version = ?version, "Unsupported HTTP version");
            self.reply_html(conn, Version::HTTP_11, StatusCode::HTTP_VERSION_NOT_SUPPORTED, config);
            return false;
        }

        let method = request.method().map(|m| m.to_string()).unwrap_or_default();
        let target = request.path().unwrap_or("/").to_string();
        let path = normalize_path(&target);
        let host = request
            .field(FORWARDED_HOST)
            .or_else(|| request.field(HOST))
            .map(str::to_string);
        let mut keep_alive = wants_keep_alive(&request);

        let Some(route) = self.routes.find(host.as_deref(), &path, conn.is_secure()) else {
            tracing::info!(method = %method, path = %path, host = ?host, secure = conn.is_secure(), "No service for request");
            self.reply_html(conn, version, StatusCode::NOT_FOUND, config);
            return false;
        };

        let mut response = Header::response(StatusCode::OK);
        response.set_version(version);
        if let Err(e) = prepare_response(&mut response, config, keep_alive) {
            tracing::warn!(error = %e, "Could not build response header");
            return false;
        }

        let domain = route.domain.clone();
        let mut exchange = Exchange::new(conn, request, response, route.domain, route.mount, path.clone());
        let result = route.service.service(&mut exchange);

        match result {
            Ok(()) if !exchange.response_sent() => {
                if let Err(e) = exchange.send_status(StatusCode::NO_CONTENT) {
                    tracing::debug!(error = %e, "Could not send empty response");
                    keep_alive = false;
                }
            }
            Ok(()) => {}
            Err(e) if !exchange.response_sent() => {
                tracing::warn!(method = %method, path = %path, error = %e, "Service failed");
                keep_alive = false;
                if let Err(send_error) = send_error_response(&mut exchange, &e) {
                    tracing::debug!(error = %send_error, "Could not send error response");
                }
            }
            Err(e) => {
                tracing::warn!(method = %method, path = %path, error = %e, "Service failed after responding");
                keep_alive = false;
            }
        }

        if !exchange.body_consumed() {
            tracing::debug!(path = %path, "Request body left unread; closing");
            keep_alive = false;
            discard_body(&mut exchange);
        }

        let response = exchange.into_response();
        if !response_allows_reuse(&response) {
            keep_alive = false;
        }

        let status = response.status().map(|s| s.as_u16()).unwrap_or(0);
        metrics::record_dispatch(status);
        tracing::info!(
            method = %method,
            path = %path,
            status,
            domain = %domain,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request served"
        );
        keep_alive
    }

    /// Small html error page; always closes the connection.
    fn reply_html<C: Connection>(&self, conn: &mut C, version: Version, status: StatusCode, config: &TransportConfig) {
        let body = format!(
            "<html><body><h2>{} {}</h2></body></html>",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Error")
        );

        let mut response = Header::response(status);
        response.set_version(version);
        let built = prepare_response(&mut response, config, false)
            .and_then(|()| response.set_field(CONTENT_TYPE.as_str(), "text/html"))
            .and_then(|()| response.set_field(CONTENT_LENGTH.as_str(), body.len().to_string()));
        if let Err(e) = built {
            tracing::warn!(error = %e, "Could not build error response");
            return;
        }

        let mut message = Message::with_source(Cursor::new(body.into_bytes()));
        match message.send(conn, &mut response) {
            Ok(_) => metrics::record_dispatch(status.as_u16()),
            Err(e) => tracing::debug!(status = status.as_u16(), error = %e, "Could not send error page"),
        }
    }
}

fn set_timeout(socket: Option<&dyn Socket>, config: &TransportConfig, read: std::time::Duration) {
    let Some(socket) = socket else {
        return;
    };
    let applied = socket
        .set_read_timeout(Some(read))
        .and_then(|()| socket.set_write_timeout(Some(config.write_timeout())));
    if let Err(e) = applied {
        tracing::debug!(error = %e, "Could not set socket timeouts");
    }
}

/// Drop what is left of the request body, up to a bound, so closing the
/// socket does not reset a peer that is still sending.
fn discard_body(exchange: &mut Exchange<'_>) {
    let drained = exchange.request_body().and_then(|body| {
        io::copy(&mut body.take(MAX_DISCARD_BYTES), &mut io::sink()).map_err(Error::from)
    });
    if let Err(e) = drained {
        tracing::debug!(error = %e, "Could not discard request body");
    }
}

fn prepare_response(response: &mut Header, config: &TransportConfig, keep_alive: bool) -> Result<()> {
    response.set_field(SERVER.as_str(), &config.server_name)?;
    if !keep_alive {
        response.set_field(CONNECTION.as_str(), "close")?;
    }
    Ok(())
}

fn send_error_response(exchange: &mut Exchange<'_>, error: &Error) -> Result<u64> {
    exchange.close_after_response()?;
    let response = exchange.response_mut();
    // framing left over from the failed attempt would not describe the error body
    for name in [CONTENT_LENGTH, TRANSFER_ENCODING, CONTENT_ENCODING] {
        response.remove_field(name.as_str());
    }
    response.set_field(CONTENT_TYPE.as_str(), CONTENT_TYPE_JSON)?;
    exchange.send_value(error.status_code(), error.to_value())
}

/// `Connection: close` ends keep-alive; HTTP/1.0 needs an explicit `keep-alive`.
fn wants_keep_alive(request: &Header) -> bool {
    let tokens: Vec<String> = request
        .field_values(CONNECTION.as_str())
        .iter()
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();
    if tokens.iter().any(|t| t == "close") {
        return false;
    }
    if tokens.iter().any(|t| t == "keep-alive") {
        return true;
    }
    request.version() != Version::HTTP_10
}

/// A response delimited by connection close, or one that asked to close,
/// cannot be followed by another request.
fn response_allows_reuse(response: &Header) -> bool {
    let closing = response
        .field_values(CONNECTION.as_str())
        .iter()
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case("close"));
    let framed = response.is_chunked() || response.content_length().is_some() || !response.has_content();
    !closing && framed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpConnection;
    use crate::registry::{FnService, SecurityType, ServiceRegistry};
    use crate::value::Value;
    use std::io::Write;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn servicer(registry: &ServiceRegistry) -> ConnectionServicer {
        ConnectionServicer::new(
            registry.routes(),
            Arc::new(ArcSwap::from_pointee(TransportConfig::default())),
        )
    }

    fn run(registry: &ServiceRegistry, input: &str, secure: bool) -> (usize, String) {
        let mut conn = HttpConnection::new(Duplex {
            input: Cursor::new(input.as_bytes().to_vec()),
            output: Vec::new(),
        })
        .with_secure(secure);
        let served = servicer(registry).serve(&mut conn, None);
        let output = String::from_utf8_lossy(&conn.get_ref().output).into_owned();
        (served, output)
    }

    fn echo_registry() -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        registry
            .add_service(
                FnService::shared("/echo", |ex| {
                    let value = ex.receive_value()?;
                    ex.send_value(StatusCode::OK, value).map(|_| ())
                }),
                SecurityType::Both,
                false,
                None,
            )
            .unwrap();
        registry
    }

    #[test]
    fn unknown_path_is_404_and_closes() {
        let registry = ServiceRegistry::new();
        let (served, out) = run(&registry, "GET /missing HTTP/1.1\r\nHost: x\r\n\r\nGET / HTTP/1.1\r\n\r\n", false);
        assert_eq!(served, 1);
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"), "{out}");
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.ends_with("<html><body><h2>404 Not Found</h2></body></html>"));
    }

    #[test]
    fn unsupported_version_is_505() {
        let registry = echo_registry();
        let (_, out) = run(&registry, "GET /echo HTTP/2.0\r\n\r\n", false);
        assert!(out.starts_with("HTTP/1.1 505 HTTP Version Not Supported\r\n"), "{out}");
    }

    #[test]
    fn malformed_header_is_400() {
        let registry = echo_registry();
        let (served, out) = run(&registry, "GARBAGE\r\n\r\n", false);
        assert_eq!(served, 0);
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{out}");
    }

    #[test]
    fn keep_alive_serves_pipelined_requests() {
        let registry = echo_registry();
        let body = r#"{"a":1}"#;
        let request = format!(
            "POST /echo HTTP/1.1\r\nHost: h\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        let input = format!("{request}{request}");
        let (served, out) = run(&registry, &input, false);
        assert_eq!(served, 2);
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(out.contains("Server: service-runtime/"));
        assert!(out.contains("Transfer-Encoding: chunked\r\n"));
        assert!(out.contains(r#"{"a":1}"#));
    }

    #[test]
    fn http10_defaults_to_close() {
        let registry = ServiceRegistry::new();
        registry
            .add_service(
                FnService::shared("/", |ex| ex.send_status(StatusCode::OK)),
                SecurityType::NonSecure,
                false,
                None,
            )
            .unwrap();
        let (served, out) = run(&registry, "GET / HTTP/1.0\r\n\r\nGET / HTTP/1.0\r\n\r\n", false);
        assert_eq!(served, 1);
        assert!(out.starts_with("HTTP/1.0 200 OK\r\n"), "{out}");
        assert!(out.contains("Connection: close\r\n"));
    }

    #[test]
    fn security_selects_table() {
        let registry = ServiceRegistry::new();
        registry
            .add_service(
                FnService::shared("/secure", |ex| ex.send_status(StatusCode::OK)),
                SecurityType::Secure,
                false,
                None,
            )
            .unwrap();
        let (_, plain) = run(&registry, "GET /secure HTTP/1.1\r\n\r\n", false);
        assert!(plain.starts_with("HTTP/1.1 404"));
        let (_, tls) = run(&registry, "GET /secure/deeper?q=1 HTTP/1.1\r\nConnection: close\r\n\r\n", true);
        assert!(tls.starts_with("HTTP/1.1 200 OK"), "{tls}");
    }

    #[test]
    fn failed_service_gets_structured_error() {
        let registry = echo_registry();
        let (served, out) = run(
            &registry,
            "POST /echo HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi",
            false,
        );
        assert_eq!(served, 1);
        assert!(out.starts_with("HTTP/1.1 415 Unsupported Media Type\r\n"), "{out}");
        assert!(out.contains("Connection: close\r\n"));
        assert!(out.contains(r#""type":"InvalidContentType""#));
    }

    #[test]
    fn send_rejected_before_io_still_gets_error_reply() {
        let registry = ServiceRegistry::new();
        registry
            .add_service(
                FnService::shared("/plain", |ex| {
                    ex.response_mut().set_field("Content-Type", "text/plain")?;
                    ex.response_mut().set_field("Content-Length", "1")?;
                    ex.send_value(StatusCode::OK, Value::from(1)).map(|_| ())
                }),
                SecurityType::NonSecure,
                false,
                None,
            )
            .unwrap();
        let (served, out) = run(&registry, "GET /plain HTTP/1.1\r\n\r\n", false);
        assert_eq!(served, 1);
        assert!(out.starts_with("HTTP/1.1 415 Unsupported Media Type\r\n"), "{out}");
        assert!(out.contains("Content-Type: application/json\r\n"), "{out}");
        assert!(!out.contains("Content-Length: 1\r\n"), "{out}");
        assert!(out.contains(r#""type":"InvalidContentType""#), "{out}");
        assert_eq!(out.matches("HTTP/1.1 ").count(), 1);
    }

    #[test]
    fn silent_service_answers_no_content() {
        let registry = ServiceRegistry::new();
        registry
            .add_service(FnService::shared("/quiet", |_| Ok(())), SecurityType::NonSecure, false, None)
            .unwrap();
        let (served, out) = run(&registry, "GET /quiet HTTP/1.1\r\n\r\nGET /quiet HTTP/1.1\r\n\r\n", false);
        assert_eq!(served, 2);
        assert_eq!(out.matches("HTTP/1.1 204 No Content\r\n").count(), 2);
    }

    #[test]
    fn unread_body_closes_connection() {
        let registry = ServiceRegistry::new();
        registry
            .add_service(
                FnService::shared("/ignore", |ex| ex.send_value(StatusCode::OK, Value::from("ok")).map(|_| ())),
                SecurityType::NonSecure,
                false,
                None,
            )
            .unwrap();
        let input = "POST /ignore HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /ignore HTTP/1.1\r\n\r\n";
        let (served, _) = run(&registry, input, false);
        assert_eq!(served, 1);
    }

    #[test]
    fn keep_alive_rules() {
        let mut request = Header::request(http::Method::GET, "/");
        assert!(wants_keep_alive(&request));
        request.set_field("Connection", "Close").unwrap();
        assert!(!wants_keep_alive(&request));
        request.set_version(Version::HTTP_10);
        request.set_field("Connection", "keep-alive").unwrap();
        assert!(wants_keep_alive(&request));
        request.remove_field("Connection");
        assert!(!wants_keep_alive(&request));
    }
}
