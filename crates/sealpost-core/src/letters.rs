//! Draft lifecycle over a [`LetterStore`]: create, edit, delete, seal.
//!
//! Sealed letters are locked: they can no longer be edited or deleted, only
//! delivered by the scheduler.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::{
    domain::{Channel, Letter, LetterId, LetterState, UserId},
    errors::Error,
    ports::LetterStore,
    Result,
};

pub const MAX_BODY_LENGTH: usize = 50_000;

/// Editable fields of a letter.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LetterInput {
    #[serde(default)]
    pub salutation: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub sign_off: String,
    pub channel: String,
    pub recipient_email: Option<String>,
    pub telegram_chat: Option<String>,
    pub deliver_on: NaiveDate,
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"))
}

fn validate_input(input: &LetterInput) -> Result<()> {
    if input.body.chars().count() > MAX_BODY_LENGTH {
        return Err(Error::Validation(format!(
            "body is too long (max {MAX_BODY_LENGTH} characters)"
        )));
    }
    // Drafts may use any channel known to us; the recipient can come later.
    input.channel.parse::<Channel>().map_err(|_| {
        Error::Validation(format!("unsupported delivery channel: {:?}", input.channel))
    })?;
    Ok(())
}

async fn load(store: &dyn LetterStore, id: &LetterId) -> Result<Letter> {
    store
        .get(id)
        .await?
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

fn ensure_draft(letter: &Letter) -> Result<()> {
    if letter.state != LetterState::Draft {
        return Err(Error::InvalidState(format!(
            "letter {} is {} and can no longer be changed",
            letter.id, letter.state
        )));
    }
    Ok(())
}

pub async fn create_draft(
    store: &dyn LetterStore,
    owner: UserId,
    input: LetterInput,
) -> Result<Letter> {
    validate_input(&input)?;

    let letter = Letter {
        id: LetterId::generate(),
        owner,
        state: LetterState::Draft,
        salutation: input.salutation,
        body: input.body,
        sign_off: input.sign_off,
        channel: input.channel.trim().to_lowercase(),
        recipient_email: input.recipient_email,
        telegram_chat: input.telegram_chat,
        deliver_on: input.deliver_on,
        created_at: Utc::now(),
        sealed_at: None,
        delivered_at: None,
    };
    store.insert(&letter).await?;
    tracing::debug!(letter = %letter.id, "draft created");
    Ok(letter)
}

pub async fn update_draft(
    store: &dyn LetterStore,
    id: &LetterId,
    input: LetterInput,
) -> Result<Letter> {
    validate_input(&input)?;
    let mut letter = load(store, id).await?;
    ensure_draft(&letter)?;

    letter.salutation = input.salutation;
    letter.body = input.body;
    letter.sign_off = input.sign_off;
    letter.channel = input.channel.trim().to_lowercase();
    letter.recipient_email = input.recipient_email;
    letter.telegram_chat = input.telegram_chat;
    letter.deliver_on = input.deliver_on;

    store.update(&letter).await?;
    Ok(letter)
}

pub async fn delete_draft(store: &dyn LetterStore, id: &LetterId) -> Result<()> {
    let letter = load(store, id).await?;
    ensure_draft(&letter)?;
    store.delete(id).await?;
    Ok(())
}

/// Lock a draft for delivery on its `deliver_on` date.
///
/// Requires a non-empty body, a recognized channel with its recipient
/// present, and a delivery date after `now`'s date.
pub async fn seal(store: &dyn LetterStore, id: &LetterId, now: DateTime<Utc>) -> Result<Letter> {
    let mut letter = load(store, id).await?;
    ensure_draft(&letter)?;

    if letter.body.trim().is_empty() {
        return Err(Error::Validation("cannot seal an empty letter".to_string()));
    }

    let channel = letter.channel().map_err(|_| {
        Error::Validation(format!("unsupported delivery channel: {:?}", letter.channel))
    })?;

    let Some(recipient) = letter.recipient_for(channel) else {
        return Err(Error::Validation(match channel {
            Channel::Email => "a recipient email address is required to seal".to_string(),
            Channel::Telegram => "a Telegram chat id or username is required to seal".to_string(),
        }));
    };
    if channel == Channel::Email && !email_re().is_match(recipient) {
        return Err(Error::Validation(format!(
            "invalid recipient email address: {recipient:?}"
        )));
    }

    if letter.deliver_on <= now.date_naive() {
        return Err(Error::Validation(
            "delivery date must be in the future".to_string(),
        ));
    }

    letter.state = LetterState::Sealed;
    letter.sealed_at = Some(now);
    store.update(&letter).await?;
    tracing::info!(letter = %letter.id, deliver_on = %letter.deliver_on, %channel, "letter sealed");
    Ok(letter)
}
