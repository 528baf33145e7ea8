//! The dedicated writer thread (spec §4.7), grounded directly on the
//! writer-thread shape the teacher used for its own usage-ledger database:
//! one OS thread owns the `rusqlite::Connection`, batches writes, and flushes
//! on batch-size-or-channel-empty rather than a fixed tick.

use super::to_slots;
use crate::metrics::{Metric, MetricName, MetricsHandle};
use crate::model::TagValue;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::Receiver;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RETENTION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub struct WriterConfig {
    pub batch_size: usize,
    pub history_hours: i64,
}

/// Runs until `rx` disconnects (the scan loop dropped its `store_tx`,
/// which is the cancellation signal for this worker — spec §5).
pub fn run(
    mut conn: Connection,
    mut rx: Receiver<TagValue>,
    config: WriterConfig,
    metrics: MetricsHandle,
) {
    let mut known_tags: HashSet<String> = load_tag_names(&conn).unwrap_or_default();
    let mut batch: Vec<(String, TagValue)> = Vec::new();
    let mut currents: HashMap<String, TagValue> = HashMap::new();
    let mut last_retention_check = Instant::now();

    loop {
        match rx.try_recv() {
            Ok(v) => {
                if !tag_known(&conn, &mut known_tags, &v.name) {
                    tracing::error!(tag = %v.name, "store: no tag row for this name, dropping value");
                    continue;
                }
                currents.insert(v.name.clone(), v.clone());
                batch.push((v.name.clone(), v));
                if batch.len() >= config.batch_size {
                    flush_history(&mut conn, &mut batch, &metrics);
                }
            }
            Err(TryRecvError::Empty) => {
                if !batch.is_empty() {
                    flush_history(&mut conn, &mut batch, &metrics);
                }
                if !currents.is_empty() {
                    flush_currents(&mut conn, &mut currents, &metrics);
                }
                if last_retention_check.elapsed() >= RETENTION_CHECK_INTERVAL {
                    delete_old_history(&conn, config.history_hours, &metrics);
                    last_retention_check = Instant::now();
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(TryRecvError::Disconnected) => {
                if !batch.is_empty() {
                    flush_history(&mut conn, &mut batch, &metrics);
                }
                if !currents.is_empty() {
                    flush_currents(&mut conn, &mut currents, &metrics);
                }
                tracing::info!("store writer shutting down, channel closed");
                return;
            }
        }
    }
}

fn load_tag_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM tags")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn tag_known(conn: &Connection, cache: &mut HashSet<String>, name: &str) -> bool {
    if cache.contains(name) {
        return true;
    }
    let exists: bool = conn
        .query_row("SELECT 1 FROM tags WHERE name = ?1", [name], |_| Ok(()))
        .is_ok();
    if exists {
        cache.insert(name.to_string());
    }
    exists
}

fn flush_history(conn: &mut Connection, batch: &mut Vec<(String, TagValue)>, metrics: &MetricsHandle) {
    let start = Instant::now();
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO history
                 (tag_id, tag_time, bool_value, int_value, float_value, str_value, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (tag_id, v) in batch.iter() {
                let (bv, iv, fv, sv) = to_slots(&v.value);
                stmt.execute(rusqlite::params![
                    tag_id,
                    v.update_time.to_rfc3339(),
                    bv,
                    iv,
                    fv,
                    sv,
                    v.status
                ])?;
            }
        }
        tx.commit()
    })();

    let status = if result.is_ok() { "ok" } else { "error" };
    if let Err(e) = result {
        tracing::error!("store: batch_write failed: {e}");
    }
    metrics.record(Metric::duration(
        MetricName::StoreDuration,
        "batch_write",
        status,
        start.elapsed().as_secs_f64(),
    ));
    batch.clear();
}

fn flush_currents(conn: &mut Connection, currents: &mut HashMap<String, TagValue>, metrics: &MetricsHandle) {
    let start = Instant::now();
    let result = (|| -> rusqlite::Result<()> {
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO current (tag_id, tag_time, bool_value, int_value, float_value, str_value, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tag_id) DO UPDATE SET
                    tag_time = excluded.tag_time,
                    bool_value = excluded.bool_value,
                    int_value = excluded.int_value,
                    float_value = excluded.float_value,
                    str_value = excluded.str_value,
                    status = excluded.status",
            )?;
            for (tag_id, v) in currents.iter() {
                let (bv, iv, fv, sv) = to_slots(&v.value);
                stmt.execute(rusqlite::params![
                    tag_id,
                    v.update_time.to_rfc3339(),
                    bv,
                    iv,
                    fv,
                    sv,
                    v.status
                ])?;
            }
        }
        tx.commit()
    })();

    let status = if result.is_ok() { "ok" } else { "error" };
    if let Err(e) = result {
        tracing::error!("store: currents_write failed: {e}");
    }
    metrics.record(Metric::duration(
        MetricName::StoreDuration,
        "currents_write",
        status,
        start.elapsed().as_secs_f64(),
    ));
    currents.clear();
}

fn delete_old_history(conn: &Connection, history_hours: i64, metrics: &MetricsHandle) {
    let start = Instant::now();
    let cutoff = chrono::Utc::now() - chrono::Duration::hours(history_hours);
    let result = conn.execute(
        "DELETE FROM history WHERE tag_time < ?1",
        [cutoff.to_rfc3339()],
    );
    let status = if result.is_ok() { "ok" } else { "error" };
    match result {
        Ok(n) if n > 0 => tracing::debug!(rows = n, "store: pruned old history"),
        Err(e) => tracing::error!("store: delete_old_history failed: {e}"),
        _ => {}
    }
    metrics.record(Metric::duration(
        MetricName::StoreDuration,
        "delete_old_history",
        status,
        start.elapsed().as_secs_f64(),
    ));
}
