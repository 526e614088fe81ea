use std::env;
use std::path::PathBuf;

pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_ms: u64,
}

impl Config {
    /// Reads the process config from the environment. A `.env` next to the
    /// working directory is loaded first if present; real env vars win.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let log_level = env::var("EDUWHISPER_LOG").unwrap_or_else(|_| "info".into());
        let log_file = env::var("EDUWHISPER_LOG_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        let api_url = env::var("EDUWHISPER_API_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty());
        let api_token = env::var("EDUWHISPER_API_TOKEN")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let timeout_ms = env::var("EDUWHISPER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Config {
            log_level,
            log_file,
            api_url,
            api_token,
            timeout_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".into(),
            log_file: None,
            api_url: None,
            api_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}
