//! Configuration loading, validation and hot reload.

use std::io::Write;
use std::time::Duration;

use service_runtime::config::{load_config, ConfigError, ConfigWatcher, LogFormat};

const FULL: &str = r#"
[listener]
bind_address = "127.0.0.1:9443"
max_connections = 256

[listener.tls]
cert_path = "certs/server.pem"
key_path = "certs/server.key"

[detection]
timeout_ms = 500
peek_interval_ms = 5

[transport]
server_name = "edge/1"
read_timeout_secs = 10
keep_alive_timeout_secs = 60

[registry]
default_domains = ["api.example.com", "*"]

[observability]
log_level = "debug"
log_format = "json"
metrics_enabled = true
metrics_address = "127.0.0.1:9100"
"#;

#[test]
fn full_file_loads() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL.as_bytes()).unwrap();

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.listener.bind_address, "127.0.0.1:9443");
    assert_eq!(config.listener.tls.as_ref().map(|t| t.key_path.as_str()), Some("certs/server.key"));
    assert_eq!(config.detection.timeout(), Duration::from_millis(500));
    assert_eq!(config.transport.server_name, "edge/1");
    assert_eq!(config.transport.write_timeout_secs, 30);
    assert_eq!(config.registry.default_domains, vec!["api.example.com", "*"]);
    assert_eq!(config.observability.log_format, LogFormat::Json);
}

#[test]
fn every_problem_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[listener]\nbind_address = \"nope\"\nmax_connections = 0\n[registry]\ndefault_domains = []"
    )
    .unwrap();

    match load_config(file.path()) {
        Err(ConfigError::Validation(errors)) => {
            let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
            assert!(fields.contains(&"listener.bind_address"));
            assert!(fields.contains(&"listener.max_connections"));
            assert!(fields.contains(&"registry.default_domains"));
        }
        other => panic!("expected validation errors, got {:?}", other),
    }
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        load_config(&dir.path().join("absent.toml")),
        Err(ConfigError::Io(_))
    ));
}

#[tokio::test]
async fn watcher_publishes_reloaded_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.toml");
    std::fs::write(&path, "[registry]\ndefault_domains = [\"*\"]\n").unwrap();

    let (watcher, mut updates) = ConfigWatcher::new(&path);
    let _handle = watcher.run().unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&path, "[registry]\ndefault_domains = [\"reloaded.local\"]\n").unwrap();

    let update = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match updates.recv().await {
                Some(config) if config.registry.default_domains == vec!["reloaded.local"] => {
                    return Some(config)
                }
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .unwrap();
    assert!(update.is_some());
}
