//! Command-line surface.
//!
//! Parsing is clap derive; every command runs against one [`App`].

use std::fmt::Write as _;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use crate::app::App;
use crate::auth::{
    AuthProviderName, AuthResult, AuthStatus, BrowserLauncher, CredentialKind, LoginOptions,
    SecretPrompt, SystemBrowser, NEVER_EXPIRES,
};
use crate::config::Config;
use crate::llm::{CompletionRequest, ModelInfo, ModelProviderName};

#[derive(Debug, Parser)]
#[command(
    name = "supercoin",
    about = "Local hub for AI provider credentials and model routing",
    version
)]
pub struct Cli {
    /// Directory holding config.toml and credentials
    #[arg(long, global = true, env = "SUPERCOIN_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage provider credentials
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Inspect and select models
    #[command(subcommand)]
    Models(ModelsCommand),
    /// Run the local OAuth callback server
    #[command(subcommand)]
    Server(ServerCommand),
    /// Send one prompt through the model router
    Ask {
        /// Prompt text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
        /// Model id or alias for this request only
        #[arg(long, short)]
        model: Option<String>,
        #[arg(long)]
        system: Option<String>,
    },
}

/// At most one provider flag; none means every provider.
#[derive(Debug, Clone, Copy, Default, Args)]
#[group(multiple = false)]
pub struct ProviderFlags {
    /// Anthropic (Claude)
    #[arg(long)]
    pub claude: bool,
    /// OpenAI (Codex)
    #[arg(long)]
    pub codex: bool,
    /// Google (Gemini)
    #[arg(long)]
    pub gemini: bool,
}

impl ProviderFlags {
    pub fn selected(&self) -> Option<AuthProviderName> {
        if self.claude {
            Some(AuthProviderName::Claude)
        } else if self.codex {
            Some(AuthProviderName::Codex)
        } else if self.gemini {
            Some(AuthProviderName::Gemini)
        } else {
            None
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Log in to one provider, or to each provider in turn
    Login {
        #[command(flatten)]
        provider: ProviderFlags,
        /// API key to store (requires a provider flag)
        #[arg(long)]
        api_key: Option<String>,
        /// Store the credential under this account
        #[arg(long)]
        account: Option<String>,
        /// Use the browser OAuth flow where supported
        #[arg(long)]
        oauth: bool,
        /// Never prompt; keys must come from --api-key or the environment
        #[arg(long)]
        no_tui: bool,
    },
    /// Show stored credentials
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Refresh OAuth credentials
    Refresh {
        #[command(flatten)]
        provider: ProviderFlags,
        #[arg(long)]
        account: Option<String>,
    },
    /// Remove stored credentials
    Logout {
        #[command(flatten)]
        provider: ProviderFlags,
        /// Log out of every provider
        #[arg(long, conflicts_with_all = ["claude", "codex", "gemini"])]
        all: bool,
        /// Only remove this account
        #[arg(long)]
        account: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    /// List every known model
    List {
        /// Only models from this provider (anthropic, openai, google)
        #[arg(long)]
        provider: Option<ModelProviderName>,
        #[arg(long)]
        json: bool,
    },
    /// Show details for one model
    Info { model: String },
    /// Switch the default model and save it to config.toml
    SetDefault { model: String },
    /// Print the current model
    Current,
}

#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    /// Serve OAuth callbacks in the foreground until Ctrl-C
    Start,
    /// Check whether a callback server answers on the configured address
    Status,
}

/// Reads keys with a hidden terminal prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn prompt_secret(&self, message: &str) -> anyhow::Result<Option<String>> {
        let value = dialoguer::Password::new()
            .with_prompt(message)
            .allow_empty_password(true)
            .interact()?;
        let value = value.trim().to_string();
        Ok((!value.is_empty()).then_some(value))
    }
}

/// Prints the authorization URL before trying the system browser, so
/// headless sessions can still complete the login.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalBrowser;

impl BrowserLauncher for TerminalBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        eprintln!("Opening your browser to sign in. If it does not open, visit:\n\n  {url}\n");
        SystemBrowser.open(url)
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config_dir {
        Some(dir) => Config::load_from_dir(dir)?,
        None => Config::load(),
    };
    let mut app = App::with_browser(config, Arc::new(TerminalBrowser))?;

    let result = match cli.command {
        Command::Auth(command) => run_auth(&mut app, command).await,
        Command::Models(command) => run_models(&mut app, command).await,
        Command::Server(command) => run_server(&mut app, command).await,
        Command::Ask {
            prompt,
            model,
            system,
        } => run_ask(&mut app, prompt.join(" "), model, system).await,
    };

    app.shutdown().await;
    result
}

async fn run_auth(app: &mut App, command: AuthCommand) -> anyhow::Result<()> {
    match command {
        AuthCommand::Login {
            provider,
            api_key,
            account,
            oauth,
            no_tui,
        } => {
            let provider = provider.selected();
            if api_key.is_some() && provider.is_none() {
                bail!("--api-key needs a provider flag: --claude, --codex or --gemini");
            }

            let interactive = !no_tui && std::io::stdin().is_terminal();
            let options = LoginOptions {
                api_key,
                interactive,
                account_id: account,
                use_oauth: oauth,
                prompt: interactive.then(|| Arc::new(TerminalPrompt) as Arc<dyn SecretPrompt>),
            };

            app.spawn_state_sweep();
            let results = app.auth().login(provider, &options).await?;
            print!("{}", format_results("Logged in", &results));
            ensure_any_succeeded(&results)
        }
        AuthCommand::Status { json } => {
            let rows = app.auth().status().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print!("{}", format_status_table(&rows));
            }
            Ok(())
        }
        AuthCommand::Refresh { provider, account } => {
            let results = app
                .auth()
                .refresh(provider.selected(), account.as_deref())
                .await?;
            print!("{}", format_results("Refreshed", &results));
            ensure_any_succeeded(&results)
        }
        AuthCommand::Logout {
            provider,
            all,
            account,
        } => {
            let target = if all { None } else { provider.selected() };
            let results = app.auth().logout(target, account.as_deref()).await?;
            print!("{}", format_results("Logged out", &results));
            ensure_any_succeeded(&results)
        }
    }
}

async fn run_models(app: &mut App, command: ModelsCommand) -> anyhow::Result<()> {
    match command {
        ModelsCommand::List { provider, json } => {
            let models: Vec<ModelInfo> = app
                .router()
                .list_models()
                .into_iter()
                .filter(|m| provider.map_or(true, |p| m.provider == p))
                .collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else {
                let current = app.router().current_model().id();
                print!("{}", format_model_list(&models, &current));
            }
            Ok(())
        }
        ModelsCommand::Info { model } => {
            let info = app
                .router()
                .model_info(&model)
                .with_context(|| format!("Unknown model: {}", model))?;
            print!("{}", format_model_info(&info));
            Ok(())
        }
        ModelsCommand::SetDefault { model } => {
            let selected = app.set_default_model(&model).await?;
            println!("Default model set to {}", selected.id());
            Ok(())
        }
        ModelsCommand::Current => {
            println!("{}", app.router().current_model().id());
            Ok(())
        }
    }
}

async fn run_server(app: &mut App, command: ServerCommand) -> anyhow::Result<()> {
    match command {
        ServerCommand::Start => {
            app.spawn_state_sweep();
            let addr = app.callbacks().ensure_running().await?;
            println!("Callback server listening on http://{}", addr);
            println!("Press Ctrl-C to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            app.callbacks().stop().await;
            println!("Callback server stopped");
            Ok(())
        }
        ServerCommand::Status => {
            let addr = app.config().server.bind_addr()?;
            let url = format!("http://{}/", addr);
            match reqwest::get(&url).await {
                Ok(response) if response.status().is_success() => {
                    println!("Callback server running at {}", url);
                }
                _ => println!("Callback server not running on {}", addr),
            }
            Ok(())
        }
    }
}

async fn run_ask(
    app: &mut App,
    prompt: String,
    model: Option<String>,
    system: Option<String>,
) -> anyhow::Result<()> {
    if let Some(model) = model {
        app.select_model(&model).await?;
    }

    let mut request = CompletionRequest::from_prompt(prompt);
    if let Some(system) = system {
        request = request.with_system_prompt(system);
    }

    let response = app.router().route(&request).await?;
    println!("{}", response.content);
    if let Some(usage) = response.usage {
        tracing::info!(
            model = %response.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion finished"
        );
    }
    Ok(())
}

fn ensure_any_succeeded(results: &[AuthResult]) -> anyhow::Result<()> {
    if results.iter().any(|r| r.success) {
        Ok(())
    } else {
        bail!("No provider succeeded")
    }
}

/// One line per provider result, with the fix for each failure.
pub fn format_results(verb: &str, results: &[AuthResult]) -> String {
    let mut out = String::new();
    for result in results {
        let who = match &result.account_id {
            Some(account) => format!("{} ({})", result.provider.display_name(), account),
            None => result.provider.display_name().to_string(),
        };
        if result.success {
            let _ = writeln!(out, "✓ {} {}", verb, who);
        } else {
            let _ = writeln!(
                out,
                "✗ {}: {}",
                who,
                result.error.as_deref().unwrap_or("failed")
            );
            if let Some(hint) = &result.hint {
                let _ = writeln!(out, "  → {}", hint);
            }
        }
    }
    out
}

fn format_expiry(expires_at: Option<i64>) -> String {
    match expires_at {
        None => "-".to_string(),
        Some(NEVER_EXPIRES) => "never".to_string(),
        Some(ms) => chrono::DateTime::from_timestamp_millis(ms)
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".to_string()),
    }
}

pub fn format_status_table(rows: &[AuthStatus]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12} {:<16} {:<8} {:<12} {}",
        "PROVIDER", "STATUS", "TYPE", "ACCOUNT", "EXPIRES"
    );
    for row in rows {
        let status = match (row.authenticated, row.needs_refresh, row.account_count) {
            (_, _, 0) => "not logged in",
            (true, true, _) => "refresh soon",
            (true, false, _) => "authenticated",
            (false, _, _) => "expired",
        };
        let kind = match row.kind {
            Some(CredentialKind::ApiKey) => "api_key",
            Some(CredentialKind::OAuth) => "oauth",
            None => "-",
        };
        let _ = writeln!(
            out,
            "{:<12} {:<16} {:<8} {:<12} {}",
            row.provider.as_str(),
            status,
            kind,
            row.account_id.as_deref().unwrap_or("default"),
            format_expiry(row.expires_at)
        );
    }
    out
}

pub fn format_model_list(models: &[ModelInfo], current: &str) -> String {
    let mut out = String::new();
    for model in models {
        let marker = if model.id == current { "*" } else { " " };
        let _ = writeln!(
            out,
            "{} {:<30} {:<18} {:>9}",
            marker,
            model.id,
            model.name,
            model.context_window
        );
    }
    out
}

pub fn format_model_info(info: &ModelInfo) -> String {
    let capabilities: Vec<String> = info
        .capabilities
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", info.name, info.id);
    let _ = writeln!(out, "  Provider:       {}", info.provider.display_name());
    let _ = writeln!(out, "  Context window: {} tokens", info.context_window);
    let _ = writeln!(out, "  Capabilities:   {}", capabilities.join(", "));
    let _ = writeln!(
        out,
        "  Pricing:        ${:.2} in / ${:.2} out per 1M tokens",
        info.pricing.input, info.pricing.output
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;

    #[test]
    fn test_provider_flags_selection() {
        let cli = Cli::try_parse_from(["supercoin", "auth", "login", "--gemini", "--oauth"]).unwrap();
        match cli.command {
            Command::Auth(AuthCommand::Login {
                provider, oauth, ..
            }) => {
                assert_eq!(provider.selected(), Some(AuthProviderName::Gemini));
                assert!(oauth);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_provider_flags_are_exclusive() {
        assert!(Cli::try_parse_from(["supercoin", "auth", "login", "--claude", "--codex"]).is_err());
        assert!(
            Cli::try_parse_from(["supercoin", "auth", "logout", "--all", "--gemini"]).is_err()
        );
    }

    #[test]
    fn test_models_list_provider_filter_parses() {
        let cli =
            Cli::try_parse_from(["supercoin", "models", "list", "--provider", "google"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Models(ModelsCommand::List {
                provider: Some(ModelProviderName::Google),
                json: false
            })
        ));
        assert!(Cli::try_parse_from(["supercoin", "models", "list", "--provider", "mistral"]).is_err());
    }

    #[test]
    fn test_ask_joins_prompt_words() {
        let cli = Cli::try_parse_from(["supercoin", "ask", "-m", "flash", "hello", "there"]).unwrap();
        match cli.command {
            Command::Ask { prompt, model, .. } => {
                assert_eq!(prompt.join(" "), "hello there");
                assert_eq!(model.as_deref(), Some("flash"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_format_results_includes_hint() {
        let err = HubError::login_required("Invalid API key", AuthProviderName::Claude);
        let results = vec![
            AuthResult::ok(AuthProviderName::Codex, None),
            AuthResult::failed(AuthProviderName::Claude, None, &err),
        ];
        let out = format_results("Logged in", &results);
        assert!(out.contains(&format!("✓ Logged in {}", AuthProviderName::Codex.display_name())));
        assert!(out.contains(&format!(
            "✗ {}: Invalid API key",
            AuthProviderName::Claude.display_name()
        )));
        assert!(out.contains("→ supercoin auth login --claude"));
    }

    #[test]
    fn test_format_expiry() {
        assert_eq!(format_expiry(None), "-");
        assert_eq!(format_expiry(Some(NEVER_EXPIRES)), "never");
        assert_eq!(format_expiry(Some(0)), "1970-01-01 00:00 UTC");
    }
}
