//! Daily delivery sweep.
//!
//! One run:
//! - selects every `sealed` letter with `deliver_on <= today` (pure read)
//! - sends each through the transport for its channel
//! - marks successes `delivered`, leaves failures `sealed`
//! - appends exactly one delivery-log row per letter, whatever the outcome
//!
//! Failures never leave the per-letter iteration. A letter that fails stays
//! due and is retried on every later run, with no backoff and no cap.
//!
//! Ordering is send-then-persist. If the state update fails after the
//! provider accepted the letter, the send is not undone and the letter will
//! go out again on the next run: delivery is at-least-once.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::{
    domain::{Letter, NewDeliveryAttempt},
    errors::Error,
    formatting::truncate_text,
    ports::{DeliveryLog, LetterStore, Transport, Transports},
    Result,
};

const MAX_LOGGED_ERROR_CHARS: usize = 1000;

/// Outcome counts for one run. The only thing a run reports to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub date: NaiveDate,
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Attempts whose delivery-log row could not be written.
    pub unrecorded: usize,
}

#[derive(Clone)]
pub struct DeliveryScheduler {
    store: Arc<dyn LetterStore>,
    log: Arc<dyn DeliveryLog>,
    transports: Transports,
}

/// Result of dispatching a single letter, before bookkeeping.
enum Dispatch {
    Delivered { note: Option<String> },
    Failed { error: Error },
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn LetterStore>,
        log: Arc<dyn DeliveryLog>,
        transports: Transports,
    ) -> Self {
        Self {
            store,
            log,
            transports,
        }
    }

    /// Run one sweep for `today`.
    ///
    /// Only a failure to read the due set is returned as `Err`.
    pub async fn run_daily_delivery(&self, today: NaiveDate) -> Result<DeliveryReport> {
        let due = self.store.due_letters(today).await?;

        let mut report = DeliveryReport {
            date: today,
            due: due.len(),
            delivered: 0,
            failed: 0,
            unrecorded: 0,
        };

        if due.is_empty() {
            tracing::info!(%today, "no letters due");
            return Ok(report);
        }
        tracing::info!(%today, count = due.len(), "delivering due letters");

        for letter in due.iter() {
            let outcome = self.dispatch(letter).await;

            let attempt = match &outcome {
                Dispatch::Delivered { note } => {
                    report.delivered += 1;
                    NewDeliveryAttempt {
                        letter_id: letter.id.clone(),
                        channel: letter.channel.clone(),
                        success: true,
                        error: note.clone(),
                    }
                }
                Dispatch::Failed { error } => {
                    report.failed += 1;
                    tracing::warn!(letter = %letter.id, channel = %letter.channel, "delivery failed: {error}");
                    NewDeliveryAttempt {
                        letter_id: letter.id.clone(),
                        channel: letter.channel.clone(),
                        success: false,
                        error: Some(truncate_text(&error.to_string(), MAX_LOGGED_ERROR_CHARS)),
                    }
                }
            };

            if let Err(e) = self.log.record(attempt).await {
                report.unrecorded += 1;
                tracing::error!(letter = %letter.id, "failed to record delivery attempt: {e}");
            }
        }

        tracing::info!(
            %today,
            due = report.due,
            delivered = report.delivered,
            failed = report.failed,
            unrecorded = report.unrecorded,
            "delivery run finished"
        );
        Ok(report)
    }

    async fn dispatch(&self, letter: &Letter) -> Dispatch {
        let channel = match letter.channel() {
            Ok(c) => c,
            Err(error) => return Dispatch::Failed { error },
        };

        let transport = self.transports.for_channel(channel);
        if let Err(error) = transport.send(letter).await {
            return Dispatch::Failed { error };
        }

        // Accepted by the provider: the attempt counts as a success from here on.
        let note = match self.store.mark_delivered(&letter.id, Utc::now()).await {
            Ok(true) => None,
            Ok(false) => Some("sent, but letter was no longer sealed".to_string()),
            Err(e) => {
                tracing::error!(letter = %letter.id, "sent but failed to mark delivered: {e}");
                Some(format!("sent, but failed to mark delivered: {e}"))
            }
        };
        tracing::info!(letter = %letter.id, %channel, "letter delivered");
        Dispatch::Delivered { note }
    }
}
