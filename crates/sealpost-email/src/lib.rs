//! Email adapter (Resend transactional-send API).
//!
//! Implements the `sealpost-core` Transport port for `Channel::Email`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use sealpost_core::{
    config::{Config, DEFAULT_APP_URL, DEFAULT_RESEND_API_BASE},
    domain::{Channel, Letter},
    errors::Error,
    formatting::truncate_text,
    ports::Transport,
    Result,
};

pub mod template;

pub use template::render_letter_html;

pub const SUBJECT: &str = "A letter from your past self";

#[derive(Clone, Debug)]
pub struct EmailSettings {
    pub api_key: Option<String>,
    pub from: Option<String>,
    pub subject: String,
    pub app_url: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            from: None,
            subject: SUBJECT.to_string(),
            app_url: DEFAULT_APP_URL.to_string(),
            api_base: DEFAULT_RESEND_API_BASE.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for EmailSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            api_key: cfg.resend_api_key.clone(),
            from: cfg.email_from.clone(),
            subject: SUBJECT.to_string(),
            app_url: cfg.app_url.clone(),
            api_base: cfg.resend_api_base.clone(),
            timeout: cfg.http_timeout,
        }
    }
}

#[derive(Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Clone, Debug)]
pub struct ResendTransport {
    settings: EmailSettings,
    http: reqwest::Client,
}

impl ResendTransport {
    pub fn new(settings: EmailSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::External(format!("email http client build failed: {e}")))?;
        Ok(Self { settings, http })
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Config("RESEND_API_KEY is not configured".to_string()))?;
        let from = self
            .settings
            .from
            .as_deref()
            .ok_or_else(|| Error::Config("EMAIL_FROM is not configured".to_string()))?;
        Ok((key, from))
    }
}

#[async_trait]
impl Transport for ResendTransport {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, letter: &Letter) -> Result<()> {
        let (api_key, from) = self.credentials()?;
        let Some(to) = letter.recipient_for(Channel::Email) else {
            return Err(Error::Validation(format!(
                "letter {} has no recipient email address",
                letter.id
            )));
        };

        let html = render_letter_html(letter, &self.settings.app_url);
        let req = SendEmailRequest {
            from,
            to: [to],
            subject: &self.settings.subject,
            html: &html,
        };

        let resp = self
            .http
            .post(format!("{}/emails", self.settings.api_base))
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::External(format!("email request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                status: status.as_u16(),
                message: provider_message(&body),
            });
        }

        tracing::debug!(letter = %letter.id, "email accepted by provider");
        Ok(())
    }
}

/// Resend error bodies look like `{"statusCode":422,"name":"...","message":"..."}`.
fn provider_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    match message {
        Some(m) if !m.trim().is_empty() => m,
        _ if body.trim().is_empty() => "no response body".to_string(),
        _ => truncate_text(body.trim(), 200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{NaiveDate, Utc};
    use sealpost_core::domain::{LetterId, LetterState, UserId};
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn letter(recipient: Option<&str>) -> Letter {
        Letter {
            id: LetterId("l1".into()),
            owner: UserId("u1".into()),
            state: LetterState::Sealed,
            salutation: "Dear me,".into(),
            body: "Hello <there> & welcome".into(),
            sign_off: "Me".into(),
            channel: "email".into(),
            recipient_email: recipient.map(str::to_string),
            telegram_chat: None,
            deliver_on: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            created_at: Utc::now(),
            sealed_at: Some(Utc::now()),
            delivered_at: None,
        }
    }

    fn transport(base: &str) -> ResendTransport {
        ResendTransport::new(EmailSettings {
            api_key: Some("re_test".into()),
            from: Some("Sealpost <letters@sealpost.app>".into()),
            api_base: base.to_string(),
            ..EmailSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn sends_rendered_letter_to_provider() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .and(bearer_token("re_test"))
            .and(body_partial_json(serde_json::json!({
                "from": "Sealpost <letters@sealpost.app>",
                "to": ["me@example.com"],
                "subject": SUBJECT,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "em_1"})))
            .expect(1)
            .mount(&server)
            .await;

        transport(&server.uri())
            .send(&letter(Some("me@example.com")))
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        let html = sent["html"].as_str().unwrap();
        assert!(html.contains("Hello &lt;there&gt; &amp; welcome"));
    }

    #[tokio::test]
    async fn provider_rejection_carries_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/emails"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "statusCode": 422,
                "name": "validation_error",
                "message": "Invalid `to` field."
            })))
            .mount(&server)
            .await;

        let err = transport(&server.uri())
            .send(&letter(Some("me@example.com")))
            .await
            .unwrap_err();
        match err {
            Error::Provider { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Invalid `to` field.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_credentials_fail_without_calling_provider() {
        let server = MockServer::start().await;
        let t = ResendTransport::new(EmailSettings {
            api_key: None,
            from: Some("letters@sealpost.app".into()),
            api_base: server.uri(),
            ..EmailSettings::default()
        })
        .unwrap();
        let err = t.send(&letter(Some("me@example.com"))).await.unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("RESEND_API_KEY")));

        let t = ResendTransport::new(EmailSettings {
            api_key: Some("re_test".into()),
            from: None,
            api_base: server.uri(),
            ..EmailSettings::default()
        })
        .unwrap();
        let err = t.send(&letter(Some("me@example.com"))).await.unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("EMAIL_FROM")));

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_recipient_is_a_validation_error() {
        let server = MockServer::start().await;
        let err = transport(&server.uri())
            .send(&letter(Some("  ")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn provider_message_falls_back_to_raw_body() {
        assert_eq!(provider_message("upstream exploded"), "upstream exploded");
        assert_eq!(provider_message(""), "no response body");
        assert_eq!(provider_message(r#"{"message":"bad key"}"#), "bad key");
    }
}
