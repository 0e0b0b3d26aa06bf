//! Database repository layer
//!
//! Persists the current [`CallIndex`] snapshot and loads it back. A snapshot
//! is always written whole: the previous one is deleted and the new one
//! inserted inside a single transaction.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn ts_from_sql(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Header row of a persisted snapshot.
struct SnapshotHeader {
    built_at: DateTime<Utc>,
    source_capture: String,
    source_digest: Option<String>,
    privacy_masked: bool,
    rtp_stream_count: usize,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    // ============================================
    // Snapshot operations
    // ============================================

    /// Replace the persisted snapshot with `index`.
    pub fn replace_index(&self, index: &CallIndex) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute_batch(
            "
            DELETE FROM dialog_messages;
            DELETE FROM dialogs;
            DELETE FROM rtp_stream_rows;
            DELETE FROM index_snapshot;
            ",
        )?;

        tx.execute(
            r#"
            INSERT INTO index_snapshot (id, built_at, source_capture, source_digest,
                                        privacy_masked, rtp_stream_count)
            VALUES (1, ?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                ts_to_sql(index.built_at),
                index.source_capture,
                index.source_digest,
                index.privacy_masked,
                index.rtp_stream_count as i64,
            ],
        )?;

        {
            let mut insert_dialog = tx.prepare(
                r#"
                INSERT INTO dialogs (dialog_id, first_seen, last_seen, peer_a_identity,
                                     peer_b_identity, from_header, to_header, method_of_origin,
                                     final_status_code, state, duration_s)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            let mut insert_message = tx.prepare(
                r#"
                INSERT INTO dialog_messages (dialog_id, seq, ts, source_addr, dest_addr,
                                             method, status_code, cseq_method)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;

            for dialog in index.dialogs.values() {
                insert_dialog.execute(params![
                    dialog.dialog_id,
                    dialog.first_seen.map(ts_to_sql),
                    dialog.last_seen.map(ts_to_sql),
                    dialog.peer_a_identity,
                    dialog.peer_b_identity,
                    dialog.from_header,
                    dialog.to_header,
                    dialog.method_of_origin,
                    dialog.final_status_code,
                    dialog.state.as_str(),
                    dialog.duration_s,
                ])?;

                for (seq, message) in dialog.messages.iter().enumerate() {
                    insert_message.execute(params![
                        dialog.dialog_id,
                        seq as i64,
                        message.ts.map(ts_to_sql),
                        message.source_addr,
                        message.dest_addr,
                        message.method,
                        message.status_code,
                        message.cseq_method,
                    ])?;
                }
            }

            let mut insert_stream =
                tx.prepare("INSERT INTO rtp_stream_rows (seq, tokens) VALUES (?1, ?2)")?;
            for (seq, tokens) in index.rtp_streams.iter().enumerate() {
                insert_stream.execute(params![seq as i64, serde_json::to_string(tokens)?])?;
            }
        }

        tx.commit()?;

        tracing::debug!(
            dialogs = index.dialogs.len(),
            rtp_streams = index.rtp_streams.len(),
            "Persisted index snapshot"
        );
        Ok(())
    }

    /// Load the persisted snapshot, if one was ever written.
    pub fn load_index(&self) -> Result<Option<CallIndex>> {
        let conn = self.conn.lock().unwrap();

        let header = conn
            .query_row(
                "SELECT * FROM index_snapshot WHERE id = 1",
                [],
                Self::row_to_header,
            )
            .optional()?;
        let Some(header) = header else {
            return Ok(None);
        };

        let mut dialogs: BTreeMap<String, DialogRecord> = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT * FROM dialogs ORDER BY dialog_id")?;
            let rows = stmt
                .query_map([], Self::row_to_dialog)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for dialog in rows {
                dialogs.insert(dialog.dialog_id.clone(), dialog);
            }
        }

        {
            let mut stmt = conn
                .prepare("SELECT * FROM dialog_messages ORDER BY dialog_id, seq")?;
            let rows = stmt
                .query_map([], |row| {
                    let dialog_id: String = row.get("dialog_id")?;
                    Ok((dialog_id, Self::row_to_message(row)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (dialog_id, message) in rows {
                match dialogs.get_mut(&dialog_id) {
                    Some(dialog) => dialog.messages.push(message),
                    None => {
                        return Err(Error::Parse {
                            profile: "index".to_string(),
                            message: format!("message for unknown dialog {}", dialog_id),
                        })
                    }
                }
            }
        }

        let mut rtp_streams = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT tokens FROM rtp_stream_rows ORDER BY seq")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for tokens in rows {
                rtp_streams.push(serde_json::from_str::<Vec<String>>(&tokens)?);
            }
        }

        Ok(Some(CallIndex {
            dialogs,
            rtp_streams,
            rtp_stream_count: header.rtp_stream_count,
            built_at: header.built_at,
            source_capture: header.source_capture,
            source_digest: header.source_digest,
            privacy_masked: header.privacy_masked,
        }))
    }

    /// Number of persisted dialogs.
    pub fn count_dialogs(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dialogs", [], |r| r.get(0))?;
        Ok(count)
    }

    fn row_to_header(row: &Row) -> rusqlite::Result<SnapshotHeader> {
        let built_at: String = row.get("built_at")?;
        let rtp_stream_count: i64 = row.get("rtp_stream_count")?;

        Ok(SnapshotHeader {
            built_at: ts_from_sql(Some(built_at)).unwrap_or_default(),
            source_capture: row.get("source_capture")?,
            source_digest: row.get("source_digest")?,
            privacy_masked: row.get("privacy_masked")?,
            rtp_stream_count: rtp_stream_count.max(0) as usize,
        })
    }

    fn row_to_dialog(row: &Row) -> rusqlite::Result<DialogRecord> {
        let state_str: String = row.get("state")?;
        let state = state_str.parse::<DialogState>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(DialogRecord {
            dialog_id: row.get("dialog_id")?,
            first_seen: ts_from_sql(row.get("first_seen")?),
            last_seen: ts_from_sql(row.get("last_seen")?),
            peer_a_identity: row.get("peer_a_identity")?,
            peer_b_identity: row.get("peer_b_identity")?,
            from_header: row.get("from_header")?,
            to_header: row.get("to_header")?,
            messages: Vec::new(),
            method_of_origin: row.get("method_of_origin")?,
            final_status_code: row.get("final_status_code")?,
            state,
            duration_s: row.get("duration_s")?,
        })
    }

    fn row_to_message(row: &Row) -> rusqlite::Result<DialogMessage> {
        Ok(DialogMessage {
            ts: ts_from_sql(row.get("ts")?),
            source_addr: row.get("source_addr")?,
            dest_addr: row.get("dest_addr")?,
            method: row.get("method")?,
            status_code: row.get("status_code")?,
            cseq_method: row.get("cseq_method")?,
        })
    }
}
