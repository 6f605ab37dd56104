//! SQLite persistence for letters and the delivery log.
//!
//! All statements run on `tokio-rusqlite`'s single background thread, so the
//! store is the single writer. Do NOT open extra connections for writes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row};

use sealpost_core::{
    domain::{
        DeliveryAttempt, Letter, LetterId, LetterState, LetterStats, NewDeliveryAttempt, UserId,
    },
    errors::Error,
    ports::{DeliveryLog, LetterStore},
    Result,
};

pub mod schema;

const LETTER_COLUMNS: &str = "id, owner_id, state, salutation, body, sign_off, channel, \
     recipient_email, telegram_chat, deliver_on, created_at, sealed_at, delivered_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

fn map_tr_err(e: tokio_rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

impl SqliteStore {
    /// Open (or create) the database file, configure it and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio_rusqlite::Connection::open(&path)
            .await
            .map_err(map_tr_err)?;
        let store = Self { conn };
        store.init(true).await?;
        tracing::info!(path = %path.display(), "sqlite store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(map_tr_err)?;
        let store = Self { conn };
        store.init(false).await?;
        Ok(store)
    }

    async fn init(&self, wal: bool) -> Result<()> {
        self.conn
            .call(move |conn| {
                if wal {
                    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                        row.get::<_, String>(0)
                    })?;
                }
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.pragma_update(None, "busy_timeout", 5000)?;
                schema::migrate(conn)?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

fn letter_from_row(row: &Row<'_>) -> rusqlite::Result<Letter> {
    let state: String = row.get(2)?;
    let deliver_on: String = row.get(9)?;
    Ok(Letter {
        id: LetterId(row.get(0)?),
        owner: UserId(row.get(1)?),
        state: state.parse::<LetterState>().map_err(|e| conversion_err(2, e))?,
        salutation: row.get(3)?,
        body: row.get(4)?,
        sign_off: row.get(5)?,
        channel: row.get(6)?,
        recipient_email: row.get(7)?,
        telegram_chat: row.get(8)?,
        deliver_on: NaiveDate::parse_from_str(&deliver_on, "%Y-%m-%d")
            .map_err(|e| conversion_err(9, e))?,
        created_at: parse_ts(row, 10)?,
        sealed_at: parse_opt_ts(row, 11)?,
        delivered_at: parse_opt_ts(row, 12)?,
    })
}

fn attempt_from_row(row: &Row<'_>) -> rusqlite::Result<DeliveryAttempt> {
    Ok(DeliveryAttempt {
        id: row.get(0)?,
        letter_id: LetterId(row.get(1)?),
        channel: row.get(2)?,
        attempted_at: parse_ts(row, 3)?,
        success: row.get(4)?,
        error: row.get(5)?,
    })
}

#[async_trait]
impl LetterStore for SqliteStore {
    async fn insert(&self, letter: &Letter) -> Result<()> {
        let l = letter.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO letters ({LETTER_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                    ),
                    params![
                        l.id.0,
                        l.owner.0,
                        l.state.as_str(),
                        l.salutation,
                        l.body,
                        l.sign_off,
                        l.channel,
                        l.recipient_email,
                        l.telegram_chat,
                        date(l.deliver_on),
                        ts(l.created_at),
                        l.sealed_at.map(ts),
                        l.delivered_at.map(ts),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn get(&self, id: &LetterId) -> Result<Option<Letter>> {
        let id = id.0.clone();
        self.conn
            .call(move |conn| {
                let letter = conn
                    .query_row(
                        &format!("SELECT {LETTER_COLUMNS} FROM letters WHERE id = ?1"),
                        params![id],
                        letter_from_row,
                    )
                    .optional()?;
                Ok(letter)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn update(&self, letter: &Letter) -> Result<()> {
        let l = letter.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE letters SET
                        owner_id = ?2, state = ?3, salutation = ?4, body = ?5, sign_off = ?6,
                        channel = ?7, recipient_email = ?8, telegram_chat = ?9, deliver_on = ?10,
                        sealed_at = ?11, delivered_at = ?12
                     WHERE id = ?1",
                    params![
                        l.id.0,
                        l.owner.0,
                        l.state.as_str(),
                        l.salutation,
                        l.body,
                        l.sign_off,
                        l.channel,
                        l.recipient_email,
                        l.telegram_chat,
                        date(l.deliver_on),
                        l.sealed_at.map(ts),
                        l.delivered_at.map(ts),
                    ],
                )?;
                Ok(n)
            })
            .await
            .map_err(map_tr_err)?;

        if changed == 0 {
            return Err(Error::NotFound(letter.id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &LetterId) -> Result<bool> {
        let id = id.0.clone();
        self.conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM letters WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn list_by_owner(&self, owner: &UserId) -> Result<Vec<Letter>> {
        let owner = owner.0.clone();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LETTER_COLUMNS} FROM letters
                     WHERE owner_id = ?1 ORDER BY created_at DESC"
                ))?;
                let rows = stmt
                    .query_map(params![owner], letter_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn due_letters(&self, today: NaiveDate) -> Result<Vec<Letter>> {
        let today = date(today);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LETTER_COLUMNS} FROM letters
                     WHERE state = 'sealed' AND deliver_on <= ?1"
                ))?;
                let rows = stmt
                    .query_map(params![today], letter_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn mark_delivered(&self, id: &LetterId, at: DateTime<Utc>) -> Result<bool> {
        let id = id.0.clone();
        let at = ts(at);
        self.conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE letters SET state = 'delivered', delivered_at = ?2
                     WHERE id = ?1 AND state = 'sealed'",
                    params![id, at],
                )?;
                Ok(n > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn stats(&self) -> Result<LetterStats> {
        self.conn
            .call(|conn| {
                let mut stats = LetterStats::default();

                let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM letters GROUP BY state")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let state: String = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    let count = count.max(0) as u64;
                    match state.as_str() {
                        "draft" => stats.drafts = count,
                        "sealed" => stats.sealed = count,
                        "delivered" => stats.delivered = count,
                        _ => {}
                    }
                }

                let mut stmt =
                    conn.prepare("SELECT success, COUNT(*) FROM delivery_attempts GROUP BY success")?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let success: bool = row.get(0)?;
                    let count: i64 = row.get(1)?;
                    if success {
                        stats.attempts_succeeded = count.max(0) as u64;
                    } else {
                        stats.attempts_failed = count.max(0) as u64;
                    }
                }

                Ok(stats)
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl DeliveryLog for SqliteStore {
    async fn record(&self, attempt: NewDeliveryAttempt) -> Result<DeliveryAttempt> {
        let attempted_at = Utc::now();
        let at = ts(attempted_at);
        let row = attempt.clone();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO delivery_attempts (letter_id, channel, attempted_at, success, error)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.letter_id.0, row.channel, at, row.success, row.error],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(map_tr_err)?;

        Ok(DeliveryAttempt {
            id,
            letter_id: attempt.letter_id,
            channel: attempt.channel,
            attempted_at,
            success: attempt.success,
            error: attempt.error,
        })
    }

    async fn attempts_for(&self, letter_id: &LetterId) -> Result<Vec<DeliveryAttempt>> {
        let letter_id = letter_id.0.clone();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, letter_id, channel, attempted_at, success, error
                     FROM delivery_attempts WHERE letter_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(params![letter_id], attempt_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)
    }
}
