//! Environment-driven configuration.
//!
//! Everything the binary needs comes from environment variables, collected
//! into one [`Config`] at startup.  Transport credentials are optional: with
//! none set the relay runs in test mode and logs outbound sends instead of
//! calling the carrier API.

use std::env;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => {
                write!(f, "invalid value for {var}: {value:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Carrier transport credentials (Twilio-shaped).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    /// Where the transport should post delivery status callbacks.
    pub status_callback_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: PathBuf,
    pub media_dir: PathBuf,
    pub media_base_url: String,
    pub media_max_bytes: u64,
    pub fanout_concurrency: usize,
    pub default_group: i64,
    pub transport: Option<TransportConfig>,
}

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_MAX_MEDIA_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_FANOUT: usize = 8;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = parse_var("PORT", DEFAULT_PORT)?;
        let media_base_url = env::var("CHORUS_MEDIA_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}/media"));

        let transport = match (
            env::var("TWILIO_ACCOUNT_SID"),
            env::var("TWILIO_AUTH_TOKEN"),
            env::var("TWILIO_PHONE_NUMBER"),
        ) {
            (Ok(account_sid), Ok(auth_token), Ok(from_number)) => Some(TransportConfig {
                account_sid,
                auth_token,
                from_number,
                status_callback_url: env::var("CHORUS_STATUS_CALLBACK_URL").ok(),
            }),
            _ => None,
        };

        Ok(Self {
            port,
            db_path: env::var("CHORUS_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("chorus.db")),
            media_dir: env::var("CHORUS_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("media")),
            media_base_url,
            media_max_bytes: parse_var("CHORUS_MEDIA_MAX_BYTES", DEFAULT_MAX_MEDIA_BYTES)?,
            fanout_concurrency: parse_var("CHORUS_FANOUT_CONCURRENCY", DEFAULT_FANOUT)?,
            default_group: parse_var("CHORUS_DEFAULT_GROUP", 1)?,
            transport,
        })
    }
}

fn parse_var<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}
