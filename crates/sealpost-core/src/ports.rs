use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::{
    domain::{Channel, DeliveryAttempt, Letter, LetterId, LetterStats, NewDeliveryAttempt, UserId},
    errors::Error,
    Result,
};

/// Hexagonal port for letter persistence.
///
/// The store exclusively owns letter rows; callers never hold letters across
/// runs. `due_letters` must be a pure read.
#[async_trait]
pub trait LetterStore: Send + Sync {
    async fn insert(&self, letter: &Letter) -> Result<()>;
    async fn get(&self, id: &LetterId) -> Result<Option<Letter>>;
    /// Overwrites an existing row. Returns `Error::NotFound` if missing.
    async fn update(&self, letter: &Letter) -> Result<()>;
    /// Returns `true` if a row was removed.
    async fn delete(&self, id: &LetterId) -> Result<bool>;
    async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Letter>>;

    /// All `sealed` letters with `deliver_on <= today`, in no particular order.
    async fn due_letters(&self, today: NaiveDate) -> Result<Vec<Letter>>;

    /// Transition a `sealed` letter to `delivered`, stamping `at`.
    ///
    /// Returns `false` (and changes nothing) if the letter is not `sealed`.
    async fn mark_delivered(&self, id: &LetterId, at: DateTime<Utc>) -> Result<bool>;

    async fn stats(&self) -> Result<LetterStats>;
}

/// Append-only record of every delivery attempt.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn record(&self, attempt: NewDeliveryAttempt) -> Result<DeliveryAttempt>;

    /// Attempts for one letter, oldest first.
    async fn attempts_for(&self, letter_id: &LetterId) -> Result<Vec<DeliveryAttempt>>;
}

/// A channel-specific delivery mechanism.
///
/// Implementations validate their own configuration lazily on each `send`:
/// a missing credential is an `Err`, never a panic.
#[async_trait]
pub trait Transport: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, letter: &Letter) -> Result<()>;
}

/// One transport per [`Channel`] variant.
#[derive(Clone)]
pub struct Transports {
    pub email: Arc<dyn Transport>,
    pub telegram: Arc<dyn Transport>,
}

impl Transports {
    /// Fails with `Error::Config` if a transport serves a different channel
    /// than the slot it is wired into.
    pub fn new(email: Arc<dyn Transport>, telegram: Arc<dyn Transport>) -> Result<Self> {
        for (slot, transport) in [(Channel::Email, &email), (Channel::Telegram, &telegram)] {
            if transport.channel() != slot {
                return Err(Error::Config(format!(
                    "{} transport wired into the {slot} slot",
                    transport.channel()
                )));
            }
        }
        Ok(Self { email, telegram })
    }

    pub fn for_channel(&self, channel: Channel) -> &Arc<dyn Transport> {
        match channel {
            Channel::Email => &self.email,
            Channel::Telegram => &self.telegram,
        }
    }
}
