//! Daily trigger for the delivery sweep.
//!
//! - The trigger is a standard 5-field cron expression (min hour dom mon dow),
//!   evaluated in local time
//! - Each fire runs [`DeliveryScheduler::run_daily_delivery`] for the local date
//! - A fire that arrives while a run is still in progress is skipped
//! - `stop` never interrupts a run: it waits for the in-flight sweep to record
//!   its attempts

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone, Timelike};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{errors::Error, scheduler::DeliveryScheduler, Result};

#[derive(Clone)]
pub struct DailyTrigger {
    inner: Arc<TriggerInner>,
}

struct TriggerInner {
    expr: CronExpr,
    cron: String,
    scheduler: DeliveryScheduler,
    job: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    running: AtomicBool,
}

/// Releases the execution lock when dropped, including when the run is aborted.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DailyTrigger {
    pub fn new(cron: &str, scheduler: DeliveryScheduler) -> Result<Self> {
        let expr = CronExpr::parse(cron)?;
        Ok(Self {
            inner: Arc::new(TriggerInner {
                expr,
                cron: cron.to_string(),
                scheduler,
                job: tokio::sync::Mutex::new(None),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Spawn the trigger loop. Calling `start` again restarts it.
    pub async fn start(&self) {
        self.stop().await;

        let cancel = CancellationToken::new();
        let trigger = self.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            trigger.job_loop(loop_cancel).await;
        });

        *self.inner.job.lock().await = Some((cancel, handle));
        tracing::info!(cron = %self.inner.cron, next = ?self.next_fire(), "delivery trigger started");
    }

    /// Stop the loop, waiting for a sweep that is already running to finish.
    pub async fn stop(&self) {
        let job = self.inner.job.lock().await.take();
        let Some((cancel, handle)) = job else {
            return;
        };

        cancel.cancel();
        if self.inner.running.load(Ordering::Acquire) {
            tracing::info!("waiting for the in-flight delivery run to finish");
        }
        if let Err(e) = handle.await {
            tracing::error!("delivery trigger task failed: {e}");
        }
        tracing::info!("delivery trigger stopped");
    }

    pub fn next_fire(&self) -> Option<DateTime<Local>> {
        self.inner.expr.next_after(Local::now())
    }

    async fn job_loop(&self, cancel: CancellationToken) {
        loop {
            let Some(next) = self.inner.expr.next_after(Local::now()) else {
                tracing::error!(cron = %self.inner.cron, "trigger has no next run (stopping)");
                break;
            };

            let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);

            // Only the wait is cancellable; a started run always completes.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {}
            }
            self.fire().await;
        }
    }

    /// Run one sweep for today's local date unless one is already running.
    pub async fn fire(&self) {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("previous delivery run still in progress, skipping this fire");
            return;
        }
        let _guard = RunGuard(&self.inner.running);

        let today = Local::now().date_naive();
        if let Err(e) = self.inner.scheduler.run_daily_delivery(today).await {
            tracing::error!(%today, "delivery run aborted: {e}");
        }
    }
}

// === Cron expressions ===

/// Days searched ahead by `next_after`; covers Feb 29 in every leap cycle.
const SEARCH_DAYS: u64 = 366 * 5;

#[derive(Clone, Debug)]
pub struct CronExpr {
    minutes: Field,
    hours: Field,
    days: Field,
    months: Field,
    weekdays: Field,
}

/// Allowed values as a bitmask (bit n set = value n allowed).
#[derive(Clone, Copy, Debug)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts = expr.split_whitespace().collect::<Vec<_>>();
        let [min, hour, dom, mon, dow] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "cron expression {expr:?}: expected 5 fields, got {}",
                parts.len()
            )));
        };

        // Day-of-week accepts 0-7; 7 is folded onto Sunday.
        let mut dow_bits = parse_bits(dow, 0, 7)?;
        if dow_bits & (1 << 7) != 0 {
            dow_bits = (dow_bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: Field::new(parse_bits(min, 0, 59)?, 0, 59),
            hours: Field::new(parse_bits(hour, 0, 23)?, 0, 23),
            days: Field::new(parse_bits(dom, 1, 31)?, 1, 31),
            months: Field::new(parse_bits(mon, 1, 12)?, 1, 12),
            weekdays: Field::new(dow_bits, 0, 6),
        })
    }

    pub fn matches(&self, dt: DateTime<Local>) -> bool {
        self.minutes.has(dt.minute()) && self.hours.has(dt.hour()) && self.matches_day(dt.date_naive())
    }

    /// Day-of-month and day-of-week combine with OR when both are restricted.
    fn matches_day(&self, day: NaiveDate) -> bool {
        if !self.months.has(day.month()) {
            return false;
        }
        let dom = self.days.has(day.day());
        let dow = self.weekdays.has(day.weekday().num_days_from_sunday());
        match (self.days.restricted, self.weekdays.restricted) {
            (false, false) => true,
            (false, true) => dow,
            (true, false) => dom,
            (true, true) => dom || dow,
        }
    }

    /// First matching minute strictly after `now`.
    ///
    /// Local times skipped by a DST jump never match.
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let start = now.date_naive();
        for offset in 0..SEARCH_DAYS {
            let day = start.checked_add_days(Days::new(offset))?;
            if !self.matches_day(day) {
                continue;
            }
            for hour in self.hours.values(0, 23) {
                for minute in self.minutes.values(0, 59) {
                    let Some(naive) = day.and_hms_opt(hour, minute, 0) else {
                        continue;
                    };
                    let Some(at) = Local.from_local_datetime(&naive).earliest() else {
                        continue;
                    };
                    if at > now {
                        return Some(at);
                    }
                }
            }
        }
        None
    }
}

impl Field {
    fn new(bits: u64, lo: u32, hi: u32) -> Self {
        let full = (lo..=hi).fold(0u64, |acc, v| acc | 1 << v);
        Self {
            bits,
            restricted: bits != full,
        }
    }

    fn has(&self, v: u32) -> bool {
        v < 64 && self.bits & (1 << v) != 0
    }

    fn values(self, lo: u32, hi: u32) -> impl Iterator<Item = u32> {
        (lo..=hi).filter(move |v| self.has(*v))
    }
}

/// Parse one field: `*`, `n`, `a-b`, any of those with `/step`, comma-separated.
fn parse_bits(raw: &str, lo: u32, hi: u32) -> Result<u64> {
    let invalid = || Error::Config(format!("invalid cron field {raw:?}"));
    let number = |s: &str| s.trim().parse::<u32>().map_err(|_| invalid());

    let mut bits = 0u64;
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, number(step)?),
            None => (item, 1),
        };
        if step == 0 {
            return Err(invalid());
        }

        let (from, to) = if range == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let v = number(range)?;
            // `n/step` runs from n to the top of the range.
            (v, if item.contains('/') { hi } else { v })
        };

        if from < lo || to > hi || from > to {
            return Err(invalid());
        }
        for v in (from..=to).step_by(step as usize) {
            bits |= 1 << v;
        }
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use crate::{
        domain::{Channel, Letter, LetterId, LetterState, UserId},
        memory::MemoryStore,
        ports::{DeliveryLog, LetterStore, Transport, Transports},
    };

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_expression_matches_once_a_day() {
        let expr = CronExpr::parse("0 9 * * *").unwrap();
        assert!(expr.matches(at(2026, 1, 1, 9, 0)));
        assert!(!expr.matches(at(2026, 1, 1, 9, 1)));
        assert!(!expr.matches(at(2026, 1, 1, 10, 0)));
    }

    #[test]
    fn next_after_rolls_over_to_tomorrow() {
        let expr = CronExpr::parse("30 8 * * *").unwrap();
        let next = expr.next_after(at(2026, 1, 1, 9, 0)).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (2, 8, 30));
        assert_eq!(next.second(), 0);

        // Exactly on the fire time is not "after".
        let next = expr.next_after(at(2026, 1, 2, 8, 30)).unwrap();
        assert_eq!(next.day(), 3);
    }

    #[test]
    fn step_and_list_fields_parse() {
        let expr = CronExpr::parse("*/15 6,18 * * 1-5").unwrap();
        // 2026-01-05 is a Monday, 2026-01-04 a Sunday.
        assert!(expr.matches(at(2026, 1, 5, 18, 45)));
        assert!(!expr.matches(at(2026, 1, 5, 18, 40)));
        assert!(!expr.matches(at(2026, 1, 4, 18, 45)));
    }

    #[test]
    fn sunday_may_be_written_as_seven() {
        let expr = CronExpr::parse("0 0 * * 7").unwrap();
        assert!(expr.matches(at(2026, 1, 4, 0, 0)));

        let expr = CronExpr::parse("0 0 * * 5-7").unwrap();
        assert!(expr.matches(at(2026, 1, 4, 0, 0)));
        assert!(expr.matches(at(2026, 1, 3, 0, 0)));
        assert!(!expr.matches(at(2026, 1, 5, 0, 0)));
    }

    #[test]
    fn leap_day_is_found_and_impossible_dates_are_not() {
        let expr = CronExpr::parse("0 9 29 2 *").unwrap();
        let next = expr.next_after(at(2026, 3, 1, 0, 0)).unwrap();
        assert_eq!((next.year(), next.month(), next.day()), (2028, 2, 29));

        let never = CronExpr::parse("0 9 30 2 *").unwrap();
        assert!(never.next_after(at(2026, 1, 1, 0, 0)).is_none());
    }

    #[test]
    fn invalid_expressions_are_config_errors() {
        for bad in ["", "* * * *", "61 * * * *", "*/0 * * * *", "a b c d e", "5-1 * * * *", "0 0 0 * *"] {
            let err = CronExpr::parse(bad).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad:?}");
        }
    }

    /// Counts sends; optionally holds the first one until released.
    #[derive(Default)]
    struct GatedTransport {
        hold_first: bool,
        sends: AtomicUsize,
        entered: Notify,
        release: Notify,
    }

    #[async_trait::async_trait]
    impl Transport for GatedTransport {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        async fn send(&self, _letter: &Letter) -> Result<()> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            if self.hold_first && n == 0 {
                self.release.notified().await;
            }
            Ok(())
        }
    }

    struct Idle;

    #[async_trait::async_trait]
    impl Transport for Idle {
        fn channel(&self) -> Channel {
            Channel::Telegram
        }

        async fn send(&self, _letter: &Letter) -> Result<()> {
            Ok(())
        }
    }

    fn letter_id() -> LetterId {
        LetterId("a".into())
    }

    async fn gated_trigger(
        cron: &str,
        hold_first: bool,
    ) -> (Arc<MemoryStore>, Arc<GatedTransport>, DailyTrigger) {
        let store = Arc::new(MemoryStore::new());
        let now = chrono::Utc::now();
        store
            .insert(&Letter {
                id: letter_id(),
                owner: UserId("u".into()),
                state: LetterState::Sealed,
                salutation: String::new(),
                body: "hi".into(),
                sign_off: String::new(),
                channel: "email".into(),
                recipient_email: Some("me@example.com".into()),
                telegram_chat: None,
                deliver_on: Local::now().date_naive(),
                created_at: now,
                sealed_at: Some(now),
                delivered_at: None,
            })
            .await
            .unwrap();

        let email = Arc::new(GatedTransport {
            hold_first,
            ..GatedTransport::default()
        });
        let sched = DeliveryScheduler::new(
            store.clone(),
            store.clone(),
            Transports::new(email.clone(), Arc::new(Idle)).unwrap(),
        );
        let trigger = DailyTrigger::new(cron, sched).unwrap();
        (store, email, trigger)
    }

    #[tokio::test]
    async fn fire_runs_a_sweep_for_today() {
        let (store, email, trigger) = gated_trigger("0 9 * * *", false).await;

        trigger.fire().await;
        trigger.fire().await;

        assert_eq!(email.sends.load(Ordering::SeqCst), 1);
        assert_eq!(store.attempts_for(&letter_id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn overlapping_fire_is_skipped() {
        let (_store, email, trigger) = gated_trigger("0 9 * * *", true).await;

        let t = trigger.clone();
        let first = tokio::spawn(async move { t.fire().await });
        email.entered.notified().await;

        trigger.fire().await;
        assert_eq!(email.sends.load(Ordering::SeqCst), 1);

        email.release.notify_one();
        first.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_run_releases_the_execution_lock() {
        let (store, email, trigger) = gated_trigger("0 9 * * *", true).await;

        let t = trigger.clone();
        let run = tokio::spawn(async move { t.fire().await });
        email.entered.notified().await;
        run.abort();
        let _ = run.await;

        trigger.fire().await;
        assert_eq!(email.sends.load(Ordering::SeqCst), 2);
        assert_eq!(store.attempts_for(&letter_id()).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_the_in_flight_run_to_record_its_attempt() {
        let (store, email, trigger) = gated_trigger("* * * * *", true).await;
        trigger.start().await;
        email.entered.notified().await;

        let t = trigger.clone();
        let stopping = tokio::spawn(async move { t.stop().await });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!stopping.is_finished());
        assert!(store.attempts_for(&letter_id()).await.unwrap().is_empty());

        email.release.notify_one();
        stopping.await.unwrap();

        let rows = store.attempts_for(&letter_id()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].success);
        let letter = store.get(&letter_id()).await.unwrap().unwrap();
        assert_eq!(letter.state, LetterState::Delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn restarted_trigger_fires_again() {
        let (store, email, trigger) = gated_trigger("* * * * *", false).await;
        trigger.start().await;
        email.entered.notified().await;
        trigger.stop().await;

        // Lock is free after stop: a manual fire still runs a sweep.
        let mut later = store.get(&letter_id()).await.unwrap().unwrap();
        later.id = LetterId("b".into());
        later.state = LetterState::Sealed;
        later.delivered_at = None;
        store.insert(&later).await.unwrap();

        trigger.start().await;
        trigger.fire().await;
        trigger.stop().await;
        assert_eq!(store.attempts_for(&LetterId("b".into())).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (_store, _email, trigger) = gated_trigger("0 9 * * *", false).await;
        assert!(trigger.next_fire().is_some());
        trigger.start().await;
        trigger.start().await;
        trigger.stop().await;
        trigger.stop().await;
    }
}
