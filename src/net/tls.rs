//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::error::{Error, Result};

/// Load a server-mode TLS context from PEM certificate chain and key files.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>> {
    if !cert_path.exists() {
        return Err(Error::Tls(format!("Certificate file not found: {:?}", cert_path)));
    }
    if !key_path.exists() {
        return Err(Error::Tls(format!("Private key file not found: {:?}", key_path)));
    }

    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("No certificates in {:?}", cert_path)));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| Error::Tls(format!("No private key in {:?}", key_path)))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(e.to_string()))?;

    tracing::info!(cert = ?cert_path, "TLS context loaded");
    Ok(Arc::new(config))
}
