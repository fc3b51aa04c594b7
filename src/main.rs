//! Service runtime
//!
//! Serves registered web services over plain HTTP and TLS on one port.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ presentation chain ──▶ http::connection
//!                (backpressure)     (TLS sniff / Null)     (header codec, framing)
//!                                                                │
//!                                                                ▼
//!     Client ◀── message transport ◀── WebService ◀── dispatch (routing table)
//!                (json/xml/form,                        ▲
//!                 gzip/deflate)                         │
//!                                              registry (add/remove/rollback)
//!
//!     Cross-cutting: config (TOML + hot reload), observability (tracing,
//!     Prometheus), lifecycle (signals, graceful shutdown)
//! ```

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::StatusCode;

use service_runtime::config::{load_config, ConfigWatcher, RuntimeConfig};
use service_runtime::lifecycle::signals::shutdown_on_signal;
use service_runtime::message::ContentKind;
use service_runtime::net::listener::Listener;
use service_runtime::net::tls::load_server_config;
use service_runtime::observability::{logging, metrics};
use service_runtime::presentation::TlsSniffWrapper;
use service_runtime::{
    Exchange, FnService, HttpServer, Message, PresentationChain, SecurityType, ServiceRegistry, Shutdown,
};

#[derive(Debug, Parser)]
#[command(name = "service-runtime", version, about = "HTTP/TLS service runtime")]
struct Cli {
    /// Path to the TOML configuration file (defaults are used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    if cli.check {
        println!("Configuration OK");
        return Ok(());
    }

    logging::init_tracing(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-runtime starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tls = config.listener.tls.is_some(),
        default_domains = ?config.registry.default_domains,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let chain = Arc::new(PresentationChain::new());
    if let Some(tls) = &config.listener.tls {
        let server_config = load_server_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))?;
        chain.add(Arc::new(
            TlsSniffWrapper::with_rustls(server_config, config.detection.timeout())
                .with_peek_interval(config.detection.peek_interval()),
        ));
    }

    let registry = Arc::new(ServiceRegistry::with_default_domains(
        config.registry.default_domains.clone(),
    ));
    registry.add_service(FnService::shared("/echo", echo), SecurityType::Both, true, None)?;

    let shutdown = Shutdown::new();
    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(
        listener,
        chain,
        registry.routes(),
        config.transport.clone(),
        shutdown.clone(),
    );

    // Keep the watcher alive for the lifetime of the server.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let registry = Arc::clone(&registry);
            let transport = server.transport();
            tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    registry.set_default_domains(update.registry.default_domains.clone());
                    transport.store(Arc::new(update.transport));
                    tracing::info!("Configuration reloaded");
                }
            });
            Some(handle)
        }
        None => None,
    };

    tokio::spawn(shutdown_on_signal(shutdown.clone()));
    server.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Echo structured values back as json; echo anything else byte for byte.
fn echo(exchange: &mut Exchange<'_>) -> service_runtime::Result<()> {
    if ContentKind::from_header(exchange.request()).is_ok() {
        let value = exchange.receive_value()?;
        exchange.send_value(StatusCode::OK, value)?;
        return Ok(());
    }

    let mut body = Vec::new();
    exchange.request_body()?.read_to_end(&mut body)?;
    if let Some(content_type) = exchange.request().field(CONTENT_TYPE.as_str()).map(str::to_string) {
        exchange.response_mut().set_field(CONTENT_TYPE.as_str(), content_type)?;
    }
    exchange
        .response_mut()
        .set_field(CONTENT_LENGTH.as_str(), body.len().to_string())?;
    exchange.send(&mut Message::with_source(Cursor::new(body)))?;
    Ok(())
}
