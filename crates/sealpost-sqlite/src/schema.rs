//! Embedded schema, versioned with `PRAGMA user_version`.
//!
//! The triggers enforce the two storage invariants the core relies on:
//! letter state only moves forward, and delivery attempts are append-only.

const V1: &str = r#"
CREATE TABLE IF NOT EXISTS letters (
    id              TEXT PRIMARY KEY,
    owner_id        TEXT NOT NULL,
    state           TEXT NOT NULL CHECK (state IN ('draft', 'sealed', 'delivered')),
    salutation      TEXT NOT NULL DEFAULT '',
    body            TEXT NOT NULL DEFAULT '',
    sign_off        TEXT NOT NULL DEFAULT '',
    channel         TEXT NOT NULL,
    recipient_email TEXT,
    telegram_chat   TEXT,
    deliver_on      TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    sealed_at       TEXT,
    delivered_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_letters_due ON letters (state, deliver_on);
CREATE INDEX IF NOT EXISTS idx_letters_owner ON letters (owner_id, created_at);

CREATE TABLE IF NOT EXISTS delivery_attempts (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    letter_id    TEXT NOT NULL REFERENCES letters (id),
    channel      TEXT NOT NULL,
    attempted_at TEXT NOT NULL,
    success      INTEGER NOT NULL CHECK (success IN (0, 1)),
    error        TEXT
);

CREATE INDEX IF NOT EXISTS idx_attempts_letter ON delivery_attempts (letter_id, id);

CREATE TRIGGER IF NOT EXISTS letters_forward_only
BEFORE UPDATE OF state ON letters
WHEN (OLD.state = 'sealed' AND NEW.state = 'draft')
  OR (OLD.state = 'delivered' AND NEW.state <> 'delivered')
BEGIN
    SELECT RAISE(ABORT, 'letter state can only move forward');
END;

CREATE TRIGGER IF NOT EXISTS letters_stamps_set_once
BEFORE UPDATE OF sealed_at, delivered_at ON letters
WHEN (OLD.sealed_at IS NOT NULL AND NEW.sealed_at IS NOT OLD.sealed_at)
  OR (OLD.delivered_at IS NOT NULL AND NEW.delivered_at IS NOT OLD.delivered_at)
BEGIN
    SELECT RAISE(ABORT, 'sealed_at/delivered_at are set once');
END;

CREATE TRIGGER IF NOT EXISTS delivery_attempts_no_update
BEFORE UPDATE ON delivery_attempts
BEGIN
    SELECT RAISE(ABORT, 'delivery_attempts is append-only');
END;

CREATE TRIGGER IF NOT EXISTS delivery_attempts_no_delete
BEFORE DELETE ON delivery_attempts
BEGIN
    SELECT RAISE(ABORT, 'delivery_attempts is append-only');
END;
"#;

const MIGRATIONS: &[&str] = &[V1];

/// Apply every migration newer than the database's `user_version`.
pub fn migrate(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
    }
    Ok(())
}
