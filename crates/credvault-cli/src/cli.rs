//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use credvault_core::BackendPreference;

#[derive(Debug, Parser)]
#[command(name = "credvault")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Inspect and manage the locally stored credential session")]
pub struct Cli {
    /// Vault directory (overrides config and CREDVAULT_BASE_DIR)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,

    /// Backend selection (overrides config and CREDVAULT_BACKEND)
    #[arg(long, value_enum, global = true)]
    pub backend: Option<BackendArg>,

    /// Also write logs to daily rolling files in the configured log directory
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BackendArg {
    Auto,
    File,
}

impl From<BackendArg> for BackendPreference {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => BackendPreference::Auto,
            BackendArg::File => BackendPreference::File,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the active backend and whether a valid session is stored
    Status,
    /// Print session statistics as JSON
    Stats,
    /// List the keys currently stored (never their values)
    ShowKeys,
    /// Remove the stored session
    Clear,
    /// Exchange the refresh token for a new access token
    Refresh,
    /// Ask the auth server whether the stored tokens are still valid
    Validate,
    /// Revoke the session remotely and clear it locally
    Logout,
    /// Write the effective settings (file, environment, flags) to the config file
    SaveConfig,
}
