//! In-memory letter store + delivery log.
//!
//! Used by tests. Not persistent.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::{
    domain::{
        DeliveryAttempt, Letter, LetterId, LetterState, LetterStats, NewDeliveryAttempt, UserId,
    },
    errors::Error,
    ports::{DeliveryLog, LetterStore},
    Result,
};

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    letters: HashMap<LetterId, Letter>,
    attempts: Vec<DeliveryAttempt>,
    next_attempt_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every attempt recorded so far, in insertion order.
    pub async fn all_attempts(&self) -> Vec<DeliveryAttempt> {
        self.state.lock().await.attempts.clone()
    }
}

#[async_trait]
impl LetterStore for MemoryStore {
    async fn insert(&self, letter: &Letter) -> Result<()> {
        let mut st = self.state.lock().await;
        if st.letters.contains_key(&letter.id) {
            return Err(Error::Storage(format!("duplicate letter id: {}", letter.id)));
        }
        st.letters.insert(letter.id.clone(), letter.clone());
        Ok(())
    }

    async fn get(&self, id: &LetterId) -> Result<Option<Letter>> {
        Ok(self.state.lock().await.letters.get(id).cloned())
    }

    async fn update(&self, letter: &Letter) -> Result<()> {
        let mut st = self.state.lock().await;
        let Some(slot) = st.letters.get_mut(&letter.id) else {
            return Err(Error::NotFound(letter.id.to_string()));
        };
        *slot = letter.clone();
        Ok(())
    }

    async fn delete(&self, id: &LetterId) -> Result<bool> {
        Ok(self.state.lock().await.letters.remove(id).is_some())
    }

    async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Letter>> {
        let st = self.state.lock().await;
        let mut out: Vec<Letter> = st
            .letters
            .values()
            .filter(|l| &l.owner == owner)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn due_letters(&self, today: NaiveDate) -> Result<Vec<Letter>> {
        let st = self.state.lock().await;
        Ok(st
            .letters
            .values()
            .filter(|l| l.is_due(today))
            .cloned()
            .collect())
    }

    async fn mark_delivered(&self, id: &LetterId, at: DateTime<Utc>) -> Result<bool> {
        let mut st = self.state.lock().await;
        let Some(letter) = st.letters.get_mut(id) else {
            return Ok(false);
        };
        if letter.state != LetterState::Sealed {
            return Ok(false);
        }
        letter.state = LetterState::Delivered;
        letter.delivered_at = Some(at);
        Ok(true)
    }

    async fn stats(&self) -> Result<LetterStats> {
        let st = self.state.lock().await;
        let mut stats = LetterStats::default();
        for l in st.letters.values() {
            match l.state {
                LetterState::Draft => stats.drafts += 1,
                LetterState::Sealed => stats.sealed += 1,
                LetterState::Delivered => stats.delivered += 1,
            }
        }
        for a in st.attempts.iter() {
            if a.success {
                stats.attempts_succeeded += 1;
            } else {
                stats.attempts_failed += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn record(&self, attempt: NewDeliveryAttempt) -> Result<DeliveryAttempt> {
        let mut st = self.state.lock().await;
        st.next_attempt_id += 1;
        let row = DeliveryAttempt {
            id: st.next_attempt_id,
            letter_id: attempt.letter_id,
            channel: attempt.channel,
            attempted_at: Utc::now(),
            success: attempt.success,
            error: attempt.error,
        };
        st.attempts.push(row.clone());
        Ok(row)
    }

    async fn attempts_for(&self, letter_id: &LetterId) -> Result<Vec<DeliveryAttempt>> {
        let st = self.state.lock().await;
        Ok(st
            .attempts
            .iter()
            .filter(|a| &a.letter_id == letter_id)
            .cloned()
            .collect())
    }
}
