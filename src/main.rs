//! supercoin - local hub for AI provider credentials and model routing.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use supercoin::cli::{self, Cli};
use supercoin::error::HubError;

/// `SUPERCOIN_DEBUG` or `DEBUG` set to anything but empty, `0` or `false`.
fn debug_enabled() -> bool {
    ["SUPERCOIN_DEBUG", "DEBUG"].iter().any(|var| {
        std::env::var(var)
            .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false)
    })
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &anyhow::Error, debug: bool) {
    eprintln!("Error: {:#}", err);
    let hint = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<HubError>())
        .and_then(HubError::remediation);
    if let Some(hint) = hint {
        eprintln!("  → {}", hint);
    }
    if debug {
        eprintln!("\n{:?}", err);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let debug = debug_enabled();
    init_tracing(debug);

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, debug);
            ExitCode::FAILURE
        }
    }
}
