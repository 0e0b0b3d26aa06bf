//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: persisted call index snapshot
    r#"
    -- ============================================
    -- Snapshot header (at most one row)
    -- ============================================

    CREATE TABLE IF NOT EXISTS index_snapshot (
        id               INTEGER PRIMARY KEY CHECK (id = 1),
        built_at         DATETIME NOT NULL,
        source_capture   TEXT NOT NULL,
        source_digest    TEXT,
        privacy_masked   INTEGER NOT NULL,
        rtp_stream_count INTEGER NOT NULL
    );

    -- ============================================
    -- Dialogs and their signaling
    -- ============================================

    CREATE TABLE IF NOT EXISTS dialogs (
        dialog_id         TEXT PRIMARY KEY,
        first_seen        DATETIME,
        last_seen         DATETIME,
        peer_a_identity   TEXT NOT NULL,
        peer_b_identity   TEXT NOT NULL,
        from_header       TEXT NOT NULL,
        to_header         TEXT NOT NULL,
        method_of_origin  TEXT,
        final_status_code INTEGER,
        state             TEXT NOT NULL,
        duration_s        REAL
    );

    CREATE TABLE IF NOT EXISTS dialog_messages (
        dialog_id    TEXT NOT NULL REFERENCES dialogs(dialog_id) ON DELETE CASCADE,
        seq          INTEGER NOT NULL,
        ts           DATETIME,
        source_addr  TEXT NOT NULL,
        dest_addr    TEXT NOT NULL,
        method       TEXT,
        status_code  INTEGER,
        cseq_method  TEXT,

        PRIMARY KEY (dialog_id, seq)
    );

    -- ============================================
    -- Raw stream-summary rows
    -- ============================================

    CREATE TABLE IF NOT EXISTS rtp_stream_rows (
        seq     INTEGER PRIMARY KEY,
        tokens  JSON NOT NULL
    );

    -- ============================================
    -- Indexes
    -- ============================================

    CREATE INDEX IF NOT EXISTS idx_dialogs_last_seen ON dialogs(last_seen DESC);
    CREATE INDEX IF NOT EXISTS idx_dialogs_state ON dialogs(state);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
