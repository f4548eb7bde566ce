use std::sync::Arc;

use supercoin::app::App;
use supercoin::auth::{AuthProviderName, BrowserLauncher, TokenData};
use supercoin::config::Config;
use supercoin::error::HubError;
use tempfile::TempDir;

struct NoBrowser;

impl BrowserLauncher for NoBrowser {
    fn open(&self, _url: &str) -> anyhow::Result<()> {
        anyhow::bail!("no browser in tests")
    }
}

fn app_in(dir: &TempDir, config: Config) -> App {
    let config = Config {
        config_dir: Some(dir.path().to_path_buf()),
        ..config
    };
    App::with_browser(config, Arc::new(NoBrowser)).unwrap()
}

#[tokio::test]
async fn test_app_uses_configured_model() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.models.default_model = "flash".to_string();
    config.models.temperature = Some(0.2);
    config.router.retries = 5;

    let app = app_in(&dir, config);
    let current = app.router().current_model();
    assert_eq!(current.id(), "google/gemini-3-flash");
    assert_eq!(current.temperature, Some(0.2));
    assert_eq!(app.router().options().retries, 5);
    assert_eq!(app.config_dir(), dir.path());
}

#[test]
fn test_app_rejects_invalid_default_model() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.models.default_model = "mistral/large".to_string();
    config.config_dir = Some(dir.path().to_path_buf());

    let err = App::with_browser(config, Arc::new(NoBrowser)).unwrap_err();
    assert!(err.to_string().contains("mistral/large"));
}

#[tokio::test]
async fn test_set_default_model_persists() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir, Config::default());

    let err = app.set_default_model("gpt").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HubError>(),
        Some(HubError::Auth { .. })
    ));
    assert!(!dir.path().join("config.toml").exists());

    app.tokens()
        .store(
            AuthProviderName::Codex,
            &TokenData::api_key(AuthProviderName::Codex, "sk-test", None),
        )
        .unwrap();
    let selected = app.set_default_model("gpt").await.unwrap();
    assert_eq!(selected.id(), "openai/gpt-5.2");

    let reloaded = Config::load_from_dir(dir.path()).unwrap();
    assert_eq!(reloaded.models.default_model, "openai/gpt-5.2");
}

#[tokio::test]
async fn test_set_default_model_keeps_router_when_save_fails() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir, Config::default());
    app.tokens()
        .store(
            AuthProviderName::Codex,
            &TokenData::api_key(AuthProviderName::Codex, "sk-test", None),
        )
        .unwrap();
    // A directory where the config file should go makes the write fail.
    std::fs::create_dir(dir.path().join("config.toml")).unwrap();

    let err = app.set_default_model("gpt").await.unwrap_err();
    assert!(err.to_string().contains("Failed to save config"));
    assert_eq!(
        app.router().current_model().id(),
        "anthropic/claude-sonnet-4-5"
    );
    assert_eq!(
        app.config().models.default_model,
        "anthropic/claude-sonnet-4-5"
    );
}

#[tokio::test]
async fn test_select_model_does_not_touch_config() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir, Config::default());
    app.tokens()
        .store(
            AuthProviderName::Claude,
            &TokenData::api_key(AuthProviderName::Claude, "sk-ant-test", None),
        )
        .unwrap();

    let selected = app.select_model("opus").await.unwrap();
    assert_eq!(selected.provider.auth_provider(), AuthProviderName::Claude);
    assert!(!dir.path().join("config.toml").exists());
    assert_eq!(
        app.config().models.default_model,
        "anthropic/claude-sonnet-4-5"
    );
}

#[tokio::test]
async fn test_shutdown_stops_background_work() {
    let dir = TempDir::new().unwrap();
    let mut app = app_in(&dir, Config::default());
    app.spawn_state_sweep();
    app.shutdown().await;
    assert!(!app.callbacks().status().await.running);
}
