//! credvault - operator CLI over the local credential vault.
//!
//! Loads configuration, selects the vault backend once, and runs a single
//! session command. Secret values are never printed.

mod cli;

use std::io;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use credvault_core::api::{self, AuthFlowError, HttpAuthApi};
use credvault_core::{vault, Config, SessionError, SessionManager};

use cli::{Cli, Command};

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the log directory
const LOG_FILE_PREFIX: &str = "credvault";

/// Log file name suffix
const LOG_FILE_SUFFIX: &str = "log";

/// Initialize the tracing subscriber for logging.
///
/// stderr always; a daily rolling file as well when `log_dir` is given.
/// The returned guard must stay alive until exit to flush the file writer.
fn init_tracing(log_dir: Option<&Path>, max_files: usize) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(max_files.max(1))
                .build(dir)
                .context("Failed to open rolling log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    Ok(guard)
}

/// Log the cause, hand back only the generic message.
fn session_failure(e: SessionError) -> anyhow::Error {
    error!(error = %e, "Session operation failed");
    anyhow!(e.user_message())
}

fn flow_failure(e: AuthFlowError) -> anyhow::Error {
    error!(error = %e, "Auth flow failed");
    anyhow!(e.user_message())
}

fn auth_api(config: &Config) -> Result<HttpAuthApi> {
    let base_url = config
        .api_base_url
        .as_deref()
        .context("No auth API configured (set api_base_url or CREDVAULT_API_URL)")?;
    HttpAuthApi::new(base_url).context("Failed to build auth API client")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(dir) = &args.base_dir {
        config.base_dir = Some(dir.clone());
    }
    if let Some(backend) = args.backend {
        config.backend = backend.into();
    }

    let log_dir = if args.log_file {
        Some(config.log_dir().context("Failed to resolve log directory")?)
    } else {
        None
    };
    let _guard = init_tracing(log_dir.as_deref(), config.max_log_files)?;
    info!(command = ?args.command, "credvault starting");

    if let Command::SaveConfig = args.command {
        config.vault_config().context("Refusing to save invalid configuration")?;
        config.save().context("Failed to save configuration")?;
        println!("{}", Config::config_path()?.display());
        return Ok(());
    }

    let vault_config = config.vault_config().context("Invalid vault configuration")?;
    let vault = vault::init(&vault_config).context("Failed to open secret vault")?;
    let manager = SessionManager::new(vault.clone());

    match args.command {
        Command::Status => {
            println!("backend: {}", vault.backend_kind());
            println!("base_dir: {}", vault_config.base_dir.display());
            let state = if manager.is_valid_session() {
                "valid"
            } else {
                "none"
            };
            println!("session: {}", state);
        }
        Command::Stats => match manager.session_stats().map_err(session_failure)? {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("No active session"),
        },
        Command::ShowKeys => {
            for key in vault.list_known_keys().context("Failed to list stored keys")? {
                println!("{}", key);
            }
        }
        Command::Clear => {
            manager.clear_session().map_err(session_failure)?;
            println!("Session cleared");
        }
        Command::Refresh => {
            let client = auth_api(&config)?;
            api::refresh_session(&client, &manager)
                .await
                .map_err(flow_failure)?;
            println!("Access token refreshed");
        }
        Command::Validate => {
            let client = auth_api(&config)?;
            let valid = api::validate_session(&client, &manager)
                .await
                .map_err(flow_failure)?;
            println!("{}", if valid { "valid" } else { "invalid" });
        }
        Command::Logout => {
            let client = auth_api(&config)?;
            let acknowledged = api::logout(&client, &manager).await.map_err(flow_failure)?;
            if acknowledged {
                println!("Logged out");
            } else {
                println!("Local session cleared (server did not confirm logout)");
            }
        }
        // Handled before the vault is opened.
        Command::SaveConfig => {}
    }

    Ok(())
}
