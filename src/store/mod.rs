//! The historization pipeline (spec §4.7): a dedicated writer thread for the
//! `history`/`current`/`state` tables, and a separate `r2d2` pool for
//! concurrent reads (HTTP queries, forwarder, consumer).

mod queries;
pub(crate) mod schema;
mod writer;

pub use queries::{build_pool, get_current, get_history, get_state, CurrentRow, DbPool, HistoryRow, StateRow};

use crate::config::RtdsConfig;
use crate::metrics::MetricsHandle;
use crate::model::{TagData, TagType, TagValue};
use rusqlite::Connection;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, Receiver, Sender};

/// Handle to the running writer thread. `join()` must only be called after
/// every `Sender<TagValue>` clone handed out at `spawn()` time has been
/// dropped — channel closure is this worker's cancellation signal.
pub struct Store {
    thread: JoinHandle<()>,
}

impl Store {
    /// Open the database, apply schema, and start the writer thread, which
    /// takes ownership of `rx`. Returns the handle plus the channel the
    /// scan loop's `Snapshot` should be constructed with as `store_tx`.
    pub fn spawn(
        db_url: &str,
        batch_size: usize,
        history_hours: i64,
        channel_buffer: usize,
        metrics: MetricsHandle,
    ) -> anyhow::Result<(Self, Sender<TagValue>)> {
        if let Some(parent) = std::path::Path::new(db_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_url)
            .map_err(|e| anyhow::anyhow!("failed to open store db {db_url}: {e}"))?;
        schema::init(&conn).map_err(|e| anyhow::anyhow!("failed to initialize schema: {e}"))?;

        let (tx, rx): (Sender<TagValue>, Receiver<TagValue>) = mpsc::channel(channel_buffer);
        let writer_config = writer::WriterConfig {
            batch_size,
            history_hours,
        };
        let thread = std::thread::Builder::new()
            .name("rtds-store-writer".to_string())
            .spawn(move || writer::run(conn, rx, writer_config, metrics))
            .map_err(|e| anyhow::anyhow!("failed to spawn store writer thread: {e}"))?;

        Ok((Self { thread }, tx))
    }

    pub fn join(self) -> anyhow::Result<()> {
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("store writer thread panicked"))
    }
}

/// Upsert `connectors`/`tags`/`scripts` config rows (called at startup and
/// on RELOAD). Per the Open Question resolution in DESIGN.md, this migrates
/// config tables in place rather than dropping and recreating them, so
/// `history`/`current` survive a reload.
pub fn sync_config(db_url: &str, config: &RtdsConfig) -> anyhow::Result<()> {
    let mut conn = Connection::open(db_url)
        .map_err(|e| anyhow::anyhow!("failed to open store db {db_url}: {e}"))?;
    schema::init(&conn)?;

    let tx = conn.transaction()?;
    {
        let mut upsert_connector = tx.prepare(
            "INSERT INTO connectors (name, connection_string, cycle_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET connection_string = excluded.connection_string, cycle_ms = excluded.cycle_ms",
        )?;
        for c in &config.connectors {
            upsert_connector.execute(rusqlite::params![c.name, c.connection_string, c.cycle_ms])?;
        }

        let mut upsert_tag = tx.prepare(
            "INSERT INTO tags (name, type, source, min, max, is_log, connector_name, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO UPDATE SET
                type = excluded.type, source = excluded.source, min = excluded.min, max = excluded.max,
                is_log = excluded.is_log, connector_name = excluded.connector_name, description = excluded.description",
        )?;
        for t in &config.tags {
            upsert_tag.execute(rusqlite::params![
                t.name,
                t.tag_type,
                t.source,
                t.min,
                t.max,
                t.is_log,
                t.connector,
                t.description
            ])?;
        }

        let mut upsert_script = tx.prepare(
            "INSERT INTO scripts (name, cycle_ms, is_active, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET cycle_ms = excluded.cycle_ms, is_active = excluded.is_active, body = excluded.body",
        )?;
        for s in &config.scripts {
            upsert_script.execute(rusqlite::params![s.name, s.cycle_ms, s.is_active, s.body])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Project a `TagData` into the four nullable value slots the `history`/
/// `current` tables share (spec §4.7 type projection).
pub(crate) fn to_slots(value: &TagData) -> (Option<i64>, Option<i64>, Option<f64>, Option<String>) {
    match value {
        TagData::Bool(b) => (Some(*b as i64), None, None, None),
        TagData::Int(i) => (None, Some(*i), None, None),
        TagData::Float(f) => (None, None, Some(*f), None),
        TagData::Array(_) => (None, None, None, Some(value.join_csv())),
    }
}

/// Inverse of `to_slots`, dispatching on the tag's declared type.
pub(crate) fn from_slots(
    tag_type: TagType,
    bv: Option<i64>,
    iv: Option<i64>,
    fv: Option<f64>,
    sv: Option<String>,
) -> Option<TagData> {
    match tag_type {
        TagType::Bool => bv.map(|b| TagData::Bool(b != 0)),
        TagType::Int => iv.map(TagData::Int),
        TagType::Float => fv.map(TagData::Float),
        TagType::Array => sv.map(|s| TagData::parse_csv(&s)),
    }
}
