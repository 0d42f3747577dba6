use std::path::Path;
use std::time::Duration;

use stdio_exchange::{config::EndpointConfig, AppError};

fn sample_toml() -> &'static str {
    r#"
name = "agent-bridge"
max_frame_bytes = 4096
inbound_queue = 8
drain_timeout_ms = 250
env_file = "/run/secrets/bridge.env"
"#
}

#[test]
fn parses_valid_config() {
    let config = EndpointConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.name, "agent-bridge");
    assert_eq!(config.max_frame_bytes, 4096);
    assert_eq!(config.inbound_queue, 8);
    assert_eq!(config.drain_timeout(), Duration::from_millis(250));
    assert_eq!(
        config.env_file.as_deref(),
        Some(Path::new("/run/secrets/bridge.env"))
    );
}

#[test]
fn empty_file_yields_defaults() {
    let config = EndpointConfig::from_toml_str("").expect("empty config parses");
    assert_eq!(config, EndpointConfig::default());
    assert_eq!(config.name, "stdio");
    assert_eq!(config.max_frame_bytes, 1024 * 1024);
    assert_eq!(config.inbound_queue, 64);
    assert_eq!(config.drain_timeout(), Duration::from_secs(1));
    assert!(config.env_file.is_none());
}

#[test]
fn rejects_empty_name() {
    let result = EndpointConfig::from_toml_str("name = \"  \"");
    assert!(matches!(result, Err(AppError::Config(ref m)) if m.contains("name")));
}

#[test]
fn rejects_zero_frame_limit() {
    let result = EndpointConfig::from_toml_str("max_frame_bytes = 0");
    assert!(matches!(result, Err(AppError::Config(ref m)) if m.contains("max_frame_bytes")));
}

#[test]
fn rejects_zero_inbound_queue() {
    let result = EndpointConfig::from_toml_str("inbound_queue = 0");
    assert!(matches!(result, Err(AppError::Config(ref m)) if m.contains("inbound_queue")));
}

#[test]
fn rejects_unknown_fields() {
    let result = EndpointConfig::from_toml_str("http_port = 3000");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_wrong_types() {
    let result = EndpointConfig::from_toml_str("inbound_queue = \"many\"");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn loads_from_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = EndpointConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.name, "agent-bridge");
}

#[test]
fn missing_file_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = EndpointConfig::load_from_path(temp.path().join("absent.toml"));
    assert!(matches!(result, Err(AppError::Config(ref m)) if m.contains("failed to read config")));
}
