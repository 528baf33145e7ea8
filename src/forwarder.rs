//! History forwarder (spec §4.8): a separate deployable with its own DB
//! handle and bus client, tailing `history` by monotonic row id and
//! publishing batches to the bus with a persisted delivery cursor
//! (`state.producer_last_id`).
//!
//! Grounded on `rdkafka::producer::FutureProducer`, used the same way in the
//! `PostHog-posthog` and `estuary-flow` manifests among the retrieval pack:
//! `producer.send(...).await` resolves only on broker acknowledgment, which
//! stands in for the original's `producer.flush()`.

use crate::bus::{encode_batch, BusMessage};
use crate::metrics::{Metric, MetricName, MetricsHandle};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use rusqlite::Connection;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct ForwarderConfig {
    pub db_url: String,
    pub bootstrap_servers: String,
    pub topic: String,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub send_timeout: Duration,
}

pub struct Forwarder {
    conn: Connection,
    producer: FutureProducer,
    config: ForwarderConfig,
    metrics: MetricsHandle,
}

impl Forwarder {
    /// Open the DB (ensuring schema, per "ensure DB engine ... initialized
    /// (lazy)") and build the Kafka producer client.
    pub fn new(config: ForwarderConfig, metrics: MetricsHandle) -> anyhow::Result<Self> {
        let conn = Connection::open(&config.db_url)
            .map_err(|e| anyhow::anyhow!("forwarder: failed to open db {}: {e}", config.db_url))?;
        crate::store::schema::init(&conn).map_err(|e| anyhow::anyhow!("forwarder: schema init failed: {e}"))?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("message.timeout.ms", "10000")
            .create()
            .map_err(|e| anyhow::anyhow!("forwarder: failed to build kafka producer: {e}"))?;

        Ok(Self {
            conn,
            producer,
            config,
            metrics,
        })
    }

    /// Run until `shutdown` resolves true, sleeping `poll_interval` between
    /// empty cycles. Exits after completing the in-flight cycle (spec §5
    /// cancellation contract).
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.cycle().await {
                Ok(0) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("forwarder cycle failed: {e}");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
        tracing::info!("forwarder shutting down");
    }

    /// One forwarder cycle (spec §4.8 steps 2-8). Returns the number of
    /// rows sent (0 means nothing new, caller should sleep).
    async fn cycle(&mut self) -> anyhow::Result<usize> {
        let last_id = read_cursor(&self.conn)?;
        let rows = select_since(&self.conn, last_id, self.config.batch_size)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let max_id = rows.iter().map(|(id, _)| *id).max().unwrap();
        let messages: Vec<BusMessage> = rows.into_iter().map(|(_, m)| m).collect();
        let payload = encode_batch(&messages)?;
        let count = messages.len();

        let start = Instant::now();
        let key = max_id.to_string();
        let record = FutureRecord::to(&self.config.topic)
            .payload(payload.as_bytes())
            .key(key.as_bytes());
        let send_result = self.producer.send(record, Timeout::After(self.config.send_timeout)).await;

        match send_result {
            Ok(_) => {
                self.metrics.record(Metric::status_duration(
                    MetricName::KafkaProducerDuration,
                    "ok",
                    start.elapsed().as_secs_f64(),
                ));
                // Bus ack succeeded; DB failure here leaves the cursor
                // behind and the same rows will be re-sent next cycle
                // (spec §4.8 step 8, §7 "Forwarder" — at-least-once).
                advance_cursor(&mut self.conn, max_id)?;
                Ok(count)
            }
            Err((e, _)) => {
                self.metrics.record(Metric::status_duration(
                    MetricName::KafkaProducerDuration,
                    "error",
                    start.elapsed().as_secs_f64(),
                ));
                Err(anyhow::anyhow!("kafka send failed: {e}"))
            }
        }
    }
}

/// `state.get('producer_last_id') or 0` (spec §4.8 step 2).
fn read_cursor(conn: &Connection) -> anyhow::Result<i64> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM state WHERE key = 'producer_last_id'",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Select history rows with `id > last_id`, ascending, limit `batch_size`
/// (spec §4.8 step 3), joined with `tags` for the declared type and name.
fn select_since(conn: &Connection, last_id: i64, batch_size: usize) -> anyhow::Result<Vec<(i64, BusMessage)>> {
    let mut stmt = conn.prepare(
        "SELECT h.id, h.tag_id, h.tag_time, t.type, h.status, h.bool_value, h.int_value, h.float_value, h.str_value
         FROM history h JOIN tags t ON t.name = h.tag_id
         WHERE h.id > ?1
         ORDER BY h.id ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![last_id, batch_size as i64], |row| {
        let id: i64 = row.get(0)?;
        let tag_id: String = row.get(1)?;
        let tag_time: String = row.get(2)?;
        let tag_type: String = row.get(3)?;
        let status: i32 = row.get(4)?;
        let bv: Option<i64> = row.get(5)?;
        let iv: Option<i64> = row.get(6)?;
        let fv: Option<f64> = row.get(7)?;
        let sv: Option<String> = row.get(8)?;
        Ok((
            id,
            BusMessage {
                tg: tag_id,
                tm: tag_time,
                tp: tag_type,
                st: status,
                bv,
                iv,
                fv,
                sv,
            },
        ))
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("forwarder: select_since failed: {e}"))
}

/// UPSERT `state['producer_last_id'] = max_id` within a transaction (spec
/// §4.8 step 7). Invariant 4: the forwarder never re-reads `id <=
/// producer_last_id` after this commits.
fn advance_cursor(conn: &mut Connection, max_id: i64) -> anyhow::Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO state (key, value) VALUES ('producer_last_id', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![max_id.to_string()],
    )?;
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;

    fn seeded_db(rows: &[(i64, &str, f64, i32)]) -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rtds.db");
        let conn = Connection::open(&path).unwrap();
        schema::init(&conn).unwrap();
        conn.execute(
            "INSERT INTO tags (name, type, source, min, max, is_log, connector_name, description)
             VALUES ('t1', 'float', 'func=line;scale=1', 0, 0, 1, NULL, NULL)",
            [],
        )
        .unwrap();
        for (id, tag_time, value, status) in rows {
            conn.execute(
                "INSERT INTO history (id, tag_id, tag_time, float_value, status) VALUES (?1, 't1', ?2, ?3, ?4)",
                rusqlite::params![id, tag_time, value, status],
            )
            .unwrap();
        }
        (dir, conn)
    }

    #[test]
    fn cursor_defaults_to_zero_when_unset() {
        let (_dir, conn) = seeded_db(&[]);
        assert_eq!(read_cursor(&conn).unwrap(), 0);
    }

    #[test]
    fn forwarder_cursor_scenario_sends_only_new_rows() {
        // Spec scenario 4: history ids 1..5 seeded, producer_last_id=2.
        let (_dir, mut conn) = seeded_db(&[
            (1, "2026-01-01T00:00:00Z", 1.0, 0),
            (2, "2026-01-01T00:00:01Z", 2.0, 0),
            (3, "2026-01-01T00:00:02Z", 3.0, 0),
            (4, "2026-01-01T00:00:03Z", 4.0, 0),
            (5, "2026-01-01T00:00:04Z", 5.0, 0),
        ]);
        advance_cursor(&mut conn, 2).unwrap();

        let last_id = read_cursor(&conn).unwrap();
        assert_eq!(last_id, 2);

        let rows = select_since(&conn, last_id, 100).unwrap();
        let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 4, 5]);

        let max_id = ids.into_iter().max().unwrap();
        advance_cursor(&mut conn, max_id).unwrap();
        assert_eq!(read_cursor(&conn).unwrap(), 5);

        // Next cycle sends nothing.
        let rows = select_since(&conn, read_cursor(&conn).unwrap(), 100).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn select_since_respects_batch_size() {
        let (_dir, conn) = seeded_db(&[
            (1, "2026-01-01T00:00:00Z", 1.0, 0),
            (2, "2026-01-01T00:00:01Z", 2.0, 0),
            (3, "2026-01-01T00:00:02Z", 3.0, 0),
        ]);
        let rows = select_since(&conn, 0, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[1].0, 2);
    }

    #[test]
    fn retry_after_db_failure_resends_same_rows() {
        // Spec scenario 5: cursor not advanced means the same rows are
        // selected again on the next attempt.
        let (_dir, conn) = seeded_db(&[(1, "2026-01-01T00:00:00Z", 1.0, 0)]);
        let first = select_since(&conn, 0, 100).unwrap();
        let second = select_since(&conn, 0, 100).unwrap();
        assert_eq!(first, second);
    }
}
