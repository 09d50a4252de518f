use rusqlite::Connection;
use tracing::info;

use crate::Result;

/// Columns added after the first release. Older databases get them through
/// `ALTER TABLE`; fresh ones already have them from `CREATE TABLE`.
const LATE_COLUMNS: &[(&str, &str, &str)] = &[
    ("messages", "own", "INTEGER NOT NULL DEFAULT 0"),
    ("messages", "amount", "INTEGER NOT NULL DEFAULT 0"),
    ("messages", "custom_id", "INTEGER"),
    ("messages", "read_flag", "INTEGER NOT NULL DEFAULT 0"),
    ("transactions", "approval_queue_id", "TEXT"),
    ("transactions", "notify_state", "TEXT NOT NULL DEFAULT 'none'"),
    ("transactions", "claimed_at", "INTEGER"),
];

/// Create-if-absent schema setup. Both host contexts run this on startup,
/// so every statement must be safe to repeat.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            room        TEXT NOT NULL,
            counterparty TEXT NOT NULL,
            username    TEXT NOT NULL,
            own         INTEGER NOT NULL DEFAULT 0,
            type        TEXT NOT NULL,
            message     TEXT NOT NULL,
            filedata    TEXT,
            custom_id   INTEGER,
            state       TEXT NOT NULL,
            read_flag   INTEGER NOT NULL DEFAULT 0,
            amount      INTEGER NOT NULL DEFAULT 0,
            date        INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            ledger_op_id        TEXT,
            approval_queue_id   TEXT,
            type                TEXT NOT NULL,
            counterparty        TEXT NOT NULL,
            correlation_id      INTEGER NOT NULL UNIQUE,
            metadata_json       TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'pending',
            notify_state        TEXT NOT NULL DEFAULT 'none',
            claimed_at          INTEGER,
            created_at          INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_meta (
            counterparty    TEXT PRIMARY KEY,
            archived        INTEGER NOT NULL DEFAULT 0,
            archived_date   INTEGER,
            last_opened     INTEGER
        );
        ",
    )?;

    for (table, column, decl) in LATE_COLUMNS {
        ensure_column(conn, table, column, decl)?;
    }

    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_messages_peer_state
            ON messages(counterparty, own, state);

        CREATE INDEX IF NOT EXISTS idx_messages_custom_id
            ON messages(custom_id);

        CREATE INDEX IF NOT EXISTS idx_transactions_status
            ON transactions(status, notify_state);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

/// Add `column` to `table` unless it is already there.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let present: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;

    if present == 0 {
        // Identifiers come from LATE_COLUMNS, never from peers.
        conn.execute(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl), [])?;
        info!("Added column {}.{}", table, column);
    }
    Ok(())
}
