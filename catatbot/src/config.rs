use std::path::PathBuf;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 1234;

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY_SECONDS: u64 = 5;
pub const LOGOUT_WAIT_SECONDS: u64 = 5;

/// A WhatsApp bot that records personal expenses from chat messages
#[derive(Parser, Debug, Clone)]
#[command(name = "catatbot")]
#[command(about = "A chat bot that records personal expenses", long_about = None)]
pub struct Args {
    /// HTTP port for the pairing/status server (falls back to the PORT
    /// environment variable, then 1234)
    #[arg(long)]
    pub port: Option<u16>,

    /// Base URL advertised in download links (defaults to http://localhost:<port>)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Directory for public assets
    #[arg(long, default_value = "public")]
    pub public_dir: PathBuf,

    /// Directory where generated export files are written
    #[arg(long, default_value = "download")]
    pub download_dir: PathBuf,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,

    /// Directory holding the persisted messaging-session credentials
    #[arg(long, default_value = "session")]
    pub credentials_dir: PathBuf,

    /// SQLite database file
    #[arg(long, default_value = "expenses.db")]
    pub database: PathBuf,

    /// Command line that starts the messaging bridge process; the
    /// credentials directory is appended as its last argument
    #[arg(long, default_value = "catatbot-bridge")]
    pub bridge_command: String,

    /// YAML file overriding the built-in category keyword table
    #[arg(long)]
    pub categories: Option<PathBuf>,

    /// Environment variable name containing the Telegram bot token used
    /// for pairing-code notifications
    #[arg(long)]
    pub notify_token_env: Option<String>,

    /// Telegram chat id that receives pairing-code notifications
    #[arg(long)]
    pub notify_chat_id: Option<i64>,
}

impl Args {
    pub fn get_port(&self) -> u16 {
        self.port
            .or_else(|| std::env::var("PORT").ok().and_then(|value| value.parse().ok()))
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn get_base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.get_port()))
    }

    /// Telegram token for the pairing notifier, if configured and present.
    pub fn get_notify_token(&self) -> Option<String> {
        let env_name = self.notify_token_env.as_ref()?;
        match std::env::var(env_name) {
            Ok(token) => Some(token),
            Err(_) => {
                log::warn!(
                    "Environment variable {} not set, pairing notifications disabled",
                    env_name
                );
                None
            }
        }
    }
}
