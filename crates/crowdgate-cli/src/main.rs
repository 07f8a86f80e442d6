//! crowdgate - command-line client for the crowdfunding accounts API.
//!
//! Credentials obtained by `login` are kept between runs; every other
//! command sends them through the refreshing gateway.

mod commands;
mod config;

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Config, StoreBackend};

#[derive(Debug, Parser)]
#[command(name = "crowdgate", version, about = "Client for the crowdfunding accounts API")]
pub struct Cli {
    /// Accounts API root, e.g. http://localhost:8000/api/accounts/
    #[arg(long, env = "CROWDGATE_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Where tokens are kept between runs
    #[arg(long, value_enum, env = "CROWDGATE_STORE", global = true)]
    pub store: Option<StoreBackend>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
        /// Prompted for when omitted
        #[arg(long, env = "CROWDGATE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Log in with a Google or Facebook token
    SocialLogin {
        #[arg(long, value_enum)]
        provider: commands::Provider,
        #[arg(long)]
        token: String,
    },
    /// Create an account; an activation link is emailed
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        mobile_phone: String,
        /// Profile picture to upload
        #[arg(long)]
        picture: Option<PathBuf>,
    },
    /// Confirm an activation link
    Activate { uid: String, token: String },
    /// Show the claims of the stored access token
    Whoami,
    /// Show the signed-in user's profile
    Profile,
    /// Change profile fields
    UpdateProfile {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        mobile_phone: Option<String>,
        #[arg(long)]
        birthdate: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long)]
        picture: Option<PathBuf>,
    },
    /// Delete the signed-in account (asks for the password)
    DeleteAccount,
    /// Forget the stored tokens
    Logout,
    /// Request or confirm a password reset
    ResetPassword {
        #[command(subcommand)]
        step: commands::ResetStep,
    },
    /// Change the password of the signed-in account
    ChangePassword,
    /// Check whether an email address is registered
    CheckEmail { email: String },
    /// Send an arbitrary authenticated request
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        json: Option<String>,
    },
    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("--log-file must name a file"))?;
            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_ref())?;

    let mut config = Config::load()?;
    if let Some(base_url) = &cli.base_url {
        config.gateway.base_url = base_url.clone();
    }
    if let Some(store) = cli.store {
        config.store = store;
    }
    info!(base_url = %config.gateway.base_url, store = ?config.store, "crowdgate starting");

    let result = commands::run(cli.command, &config).await;
    if let Err(e) = &result {
        info!(error = %e, "Command failed");
    }
    result
}
