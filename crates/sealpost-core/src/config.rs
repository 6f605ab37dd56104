use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{cron::CronExpr, Result};

pub const DEFAULT_DELIVERY_CRON: &str = "0 9 * * *";
pub const DEFAULT_RESEND_API_BASE: &str = "https://api.resend.com";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_APP_URL: &str = "https://sealpost.app";

/// Typed configuration, passed explicitly into the transports and the scheduler.
///
/// Provider credentials are optional here: they are checked lazily by each
/// transport on every send, never at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Storage
    pub database_path: PathBuf,

    // Email (Resend)
    pub resend_api_key: Option<String>,
    pub email_from: Option<String>,
    pub resend_api_base: String,

    // Telegram
    pub telegram_bot_token: Option<String>,
    pub telegram_api_base: String,

    // Rendering
    pub app_url: String,

    // Scheduling
    pub delivery_cron: String,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sealpost.db"),
            resend_api_key: None,
            email_from: None,
            resend_api_base: DEFAULT_RESEND_API_BASE.to_string(),
            telegram_bot_token: None,
            telegram_api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            delivery_cron: DEFAULT_DELIVERY_CRON.to_string(),
            http_timeout: Duration::from_millis(15_000),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env in production, a map in tests).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get_non_empty = |key: &str| get(key).and_then(non_empty);

        let delivery_cron = get_non_empty("DELIVERY_CRON").unwrap_or(defaults.delivery_cron);
        // Fail fast on a bad trigger; credentials stay lazy.
        CronExpr::parse(&delivery_cron)?;

        let http_timeout = get("HTTP_TIMEOUT_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.http_timeout);

        Ok(Self {
            database_path: get_non_empty("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            resend_api_key: get_non_empty("RESEND_API_KEY"),
            email_from: get_non_empty("EMAIL_FROM"),
            resend_api_base: get_non_empty("RESEND_API_BASE")
                .map(|s| trim_slash(&s))
                .unwrap_or(defaults.resend_api_base),
            telegram_bot_token: get_non_empty("TELEGRAM_BOT_TOKEN"),
            telegram_api_base: get_non_empty("TELEGRAM_API_BASE")
                .map(|s| trim_slash(&s))
                .unwrap_or(defaults.telegram_api_base),
            app_url: get_non_empty("APP_URL")
                .map(|s| trim_slash(&s))
                .unwrap_or(defaults.app_url),
            delivery_cron,
            http_timeout,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s.trim().to_string())
    }
}

fn trim_slash(s: &str) -> String {
    s.trim_end_matches('/').to_string()
}
