use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Opaque letter id (UUID v4 string).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LetterId(pub String);

impl LetterId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for LetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Owner reference (opaque; user management lives outside this system).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Letter lifecycle. Strictly forward-only: draft → sealed → delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LetterState {
    Draft,
    Sealed,
    Delivered,
}

impl LetterState {
    pub fn as_str(self) -> &'static str {
        match self {
            LetterState::Draft => "draft",
            LetterState::Sealed => "sealed",
            LetterState::Delivered => "delivered",
        }
    }
}

impl fmt::Display for LetterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(LetterState::Draft),
            "sealed" => Ok(LetterState::Sealed),
            "delivered" => Ok(LetterState::Delivered),
            other => Err(Error::Storage(format!("unknown letter state: {other}"))),
        }
    }
}

/// Delivery channel. Persisted as a raw tag on the letter and parsed at
/// dispatch time, so an unrecognized tag fails that letter only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Telegram,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Telegram => "telegram",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(Channel::Email),
            "telegram" => Ok(Channel::Telegram),
            _ => Err(Error::UnknownChannel(s.to_string())),
        }
    }
}

/// A unit of deferred correspondence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letter {
    pub id: LetterId,
    pub owner: UserId,
    pub state: LetterState,

    pub salutation: String,
    pub body: String,
    pub sign_off: String,

    /// Raw channel tag as stored. See [`Letter::channel`].
    pub channel: String,
    pub recipient_email: Option<String>,
    pub telegram_chat: Option<String>,
    pub deliver_on: NaiveDate,

    pub created_at: DateTime<Utc>,
    pub sealed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Letter {
    pub fn channel(&self) -> Result<Channel> {
        self.channel.parse()
    }

    /// Recipient identifier for `channel`, if present and non-blank.
    pub fn recipient_for(&self, channel: Channel) -> Option<&str> {
        let raw = match channel {
            Channel::Email => self.recipient_email.as_deref(),
            Channel::Telegram => self.telegram_chat.as_deref(),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.state == LetterState::Sealed && self.deliver_on <= today
    }
}

/// One row per transport invocation. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: i64,
    pub letter_id: LetterId,
    pub channel: String,
    pub attempted_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

/// Input to [`crate::ports::DeliveryLog::record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewDeliveryAttempt {
    pub letter_id: LetterId,
    pub channel: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterStats {
    pub drafts: u64,
    pub sealed: u64,
    pub delivered: u64,
    pub attempts_succeeded: u64,
    pub attempts_failed: u64,
}
