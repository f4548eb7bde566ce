use std::fs;
use std::time::Duration;

use supercoin::config::{AuthConfig, Config, ModelsConfig, RouterConfig, ServerConfig};
use tempfile::TempDir;

#[test]
fn test_config_default_has_expected_values() {
    let config = Config::default();

    assert!(config.config_dir.is_none());

    // Server defaults
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.server.port, 3100);

    // Model defaults
    assert_eq!(config.models.default_model, "anthropic/claude-sonnet-4-5");
    assert_eq!(
        config.models.fallback_models,
        vec!["openai/gpt-5.2", "google/gemini-3-flash"]
    );

    // Router defaults
    assert_eq!(config.router.retries, 3);
    assert_eq!(config.router.timeout_ms, 60_000);
    assert!(config.router.fallback);
    assert_eq!(config.router.max_backoff_ms, 30_000);

    // Auth defaults
    assert_eq!(config.auth.callback_timeout_secs, 120);
    assert_eq!(config.auth.state_sweep_interval_secs, 60);
}

#[test]
fn test_server_bind_addr() {
    let server = ServerConfig::default();
    assert_eq!(server.bind_addr().unwrap().to_string(), "127.0.0.1:3100");

    let bad = ServerConfig {
        host: "not a host".to_string(),
        port: 1,
    };
    assert!(bad.bind_addr().is_err());
}

#[test]
fn test_router_config_to_route_options() {
    let router = RouterConfig {
        retries: 5,
        timeout_ms: 1_500,
        fallback: false,
        max_backoff_ms: 4_000,
    };
    let options = router.route_options();

    assert_eq!(options.retries, 5);
    assert_eq!(options.timeout, Duration::from_millis(1_500));
    assert!(!options.fallback);
    assert_eq!(options.backoff_base, Duration::from_secs(1));
    assert_eq!(options.max_backoff, Duration::from_millis(4_000));
}

#[test]
fn test_auth_config_durations() {
    let auth = AuthConfig::default();
    assert_eq!(auth.callback_timeout(), Duration::from_secs(120));
    assert_eq!(auth.state_sweep_interval(), Duration::from_secs(60));

    let zero = AuthConfig {
        state_sweep_interval_secs: 0,
        ..AuthConfig::default()
    };
    assert_eq!(zero.state_sweep_interval(), Duration::from_secs(1));
}

#[test]
fn test_config_save_and_load_roundtrip() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");

    let mut config = Config::default();
    config.server.port = 4100;
    config.models.default_model = "openai/gpt-4o".to_string();
    config.models.fallback_models = vec!["google/gemini-3-pro".to_string()];
    config.router.retries = 1;

    config
        .save_to_path(&config_path)
        .expect("Failed to save config");
    assert!(config_path.exists());

    let loaded = Config::load_from_path(&config_path).expect("Failed to load config");
    assert_eq!(loaded, config);
}

#[test]
fn test_config_load_from_path_with_partial_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");

    let toml_content = r#"
[models]
default_model = "sonnet"

[router]
fallback = false
"#;

    fs::write(&config_path, toml_content).expect("Failed to write test config");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config.models.default_model, "sonnet");
    assert_eq!(config.models.fallback_models, ModelsConfig::default().fallback_models);
    assert!(!config.router.fallback);
    assert_eq!(config.router.retries, 3);
    assert_eq!(config.server, ServerConfig::default());
}

#[test]
fn test_config_load_from_path_missing_file() {
    let result = Config::load_from_path("/nonexistent/path/config.toml");
    assert!(result.is_err());
}

#[test]
fn test_config_load_from_path_invalid_toml() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[router\nretries = ").unwrap();

    assert!(Config::load_from_path(&config_path).is_err());
}

#[test]
fn test_load_from_dir_without_file_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::load_from_dir(temp_dir.path()).unwrap();

    assert_eq!(config.config_dir.as_deref(), Some(temp_dir.path()));
    assert_eq!(config.resolve_dir().unwrap(), temp_dir.path());
    assert_eq!(config.models, ModelsConfig::default());
}

#[test]
fn test_save_writes_into_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::load_from_dir(temp_dir.path()).unwrap();
    config.models.default_model = "google/gemini-3-flash".to_string();
    config.save().unwrap();

    let reloaded = Config::load_from_dir(temp_dir.path()).unwrap();
    assert_eq!(reloaded.models.default_model, "google/gemini-3-flash");
}
