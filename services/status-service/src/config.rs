use status_common::{env_flag, env_non_empty, env_or, LogOptions};
use std::{fmt, path::PathBuf};

const DEFAULT_PORT: u16 = 8081;
const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MAX_HISTORY: usize = 100;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct StatusConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_history: usize,
    pub api_key: Option<String>,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    pub max_body_bytes: usize,
}

impl StatusConfig {
    pub fn from_env() -> Self {
        let data_dir = env_non_empty("STATUS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        Self {
            port: env_or("STATUS_PORT", DEFAULT_PORT),
            data_dir,
            // At least one entry is always retained.
            max_history: env_or("STATUS_MAX_HISTORICOS", DEFAULT_MAX_HISTORY).max(1),
            api_key: env_non_empty("STATUS_API_KEY"),
            debug: env_flag("STATUS_DEBUG"),
            log_file: env_non_empty("STATUS_LOG_FILE").map(PathBuf::from),
            max_body_bytes: env_or("STATUS_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES),
        }
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            debug: self.debug,
            file: self.log_file.clone(),
        }
    }

    /// True when no key is configured or `presented` equals it.
    pub fn api_key_matches(&self, presented: Option<&str>) -> bool {
        match self.api_key.as_deref() {
            None => true,
            Some(expected) => presented.is_some_and(|value| constant_time_eq(value, expected)),
        }
    }
}

impl fmt::Debug for StatusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusConfig")
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("max_history", &self.max_history)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("debug", &self.debug)
            .field("log_file", &self.log_file)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let (left, right) = (left.as_bytes(), right.as_bytes());
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
