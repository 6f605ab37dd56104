//! Telegram adapter.
//!
//! - `TelegramTransport` implements the `sealpost-core` Transport port over the
//!   Bot API `sendMessage` endpoint.
//! - `bot` runs a small teloxide bot that tells users which chat id to put on
//!   their letters.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sealpost_core::{
    config::{Config, DEFAULT_APP_URL, DEFAULT_TELEGRAM_API_BASE},
    domain::{Channel, Letter},
    errors::Error,
    ports::Transport,
    Result,
};

pub mod bot;
pub mod message;

pub use message::compose_message;

#[derive(Clone, Debug)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    pub app_url: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            app_url: DEFAULT_APP_URL.to_string(),
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for TelegramSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            bot_token: cfg.telegram_bot_token.clone(),
            app_url: cfg.app_url.clone(),
            api_base: cfg.telegram_api_base.clone(),
            timeout: cfg.http_timeout,
        }
    }
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

/// The part of every Bot API response we care about.
#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    description: Option<String>,
}

#[derive(Clone, Debug)]
pub struct TelegramTransport {
    settings: TelegramSettings,
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(settings: TelegramSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::External(format!("telegram http client build failed: {e}")))?;
        Ok(Self { settings, http })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn channel(&self) -> Channel {
        Channel::Telegram
    }

    async fn send(&self, letter: &Letter) -> Result<()> {
        let token = self
            .settings
            .bot_token
            .as_deref()
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is not configured".to_string()))?;
        let Some(chat) = letter.recipient_for(Channel::Telegram) else {
            return Err(Error::Validation(format!(
                "letter {} has no Telegram chat id",
                letter.id
            )));
        };

        let text = compose_message(letter, &self.settings.app_url);
        let req = SendMessageRequest {
            chat_id: chat,
            text: &text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };

        let resp = self
            .http
            .post(format!("{}/bot{}/sendMessage", self.settings.api_base, token))
            .json(&req)
            .send()
            .await
            // reqwest errors include the URL, which includes the token.
            .map_err(|e| Error::External(format!("telegram request error: {}", e.without_url())))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiResponse>(&body).ok();

        match parsed {
            Some(r) if r.ok => {
                tracing::debug!(letter = %letter.id, "telegram message accepted");
                Ok(())
            }
            Some(r) => Err(Error::Provider {
                status: status.as_u16(),
                message: r
                    .description
                    .unwrap_or_else(|| "telegram returned ok=false".to_string()),
            }),
            None => Err(Error::Provider {
                status: status.as_u16(),
                message: "telegram returned an unreadable response".to_string(),
            }),
        }
    }
}
