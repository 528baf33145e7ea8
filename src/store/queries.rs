//! Read-side queries (spec §4.7), backed by the `r2d2`/`r2d2_sqlite` pool —
//! the concurrent-read path the dedicated writer thread doesn't serve.

use super::from_slots;
use crate::model::TagType;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn build_pool(db_url: &str) -> anyhow::Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_url);
    Pool::builder()
        .build(manager)
        .map_err(|e| anyhow::anyhow!("failed to build sqlite pool for {db_url}: {e}"))
}

/// `id` is the tag's stable name (`tags.name`), matching the original's
/// `row.History.tag_id` export — not a row-local surrogate integer.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRow {
    pub id: String,
    pub tm: String,
    pub tp: String,
    pub st: i32,
    pub vl: String,
}

/// `id` is the tag's stable name (`tags.name`), matching the original's
/// `row.Current.tag_id` export — not a row-local surrogate integer.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRow {
    pub id: String,
    pub tm: String,
    pub tp: String,
    pub st: i32,
    pub vl: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateRow {
    pub id: String,
    pub ds: Option<String>,
    pub vl: String,
}

fn render_value(
    tag_type: &str,
    bv: Option<i64>,
    iv: Option<i64>,
    fv: Option<f64>,
    sv: Option<String>,
) -> String {
    let Ok(tag_type) = TagType::parse(tag_type) else {
        return String::new();
    };
    match from_slots(tag_type, bv, iv, fv, sv) {
        Some(crate::model::TagData::Bool(b)) => b.to_string(),
        Some(crate::model::TagData::Int(i)) => i.to_string(),
        Some(crate::model::TagData::Float(f)) => f.to_string(),
        Some(crate::model::TagData::Array(values)) => {
            values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
        }
        None => String::new(),
    }
}

/// `get_history(start_time, size)`: rows with `tag_time > start_time`,
/// ascending, limit `size`, joined with `tags` for the type name.
pub fn get_history(pool: &DbPool, start_time_rfc3339: &str, size: usize) -> anyhow::Result<Vec<HistoryRow>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT h.tag_id, h.tag_time, t.type, h.status, h.bool_value, h.int_value, h.float_value, h.str_value
         FROM history h JOIN tags t ON t.name = h.tag_id
         WHERE h.tag_time > ?1
         ORDER BY h.tag_time ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(rusqlite::params![start_time_rfc3339, size as i64], |row| {
        let tag_id: String = row.get(0)?;
        let tm: String = row.get(1)?;
        let tp: String = row.get(2)?;
        let st: i32 = row.get(3)?;
        let bv: Option<i64> = row.get(4)?;
        let iv: Option<i64> = row.get(5)?;
        let fv: Option<f64> = row.get(6)?;
        let sv: Option<String> = row.get(7)?;
        Ok(HistoryRow {
            id: tag_id,
            tm,
            vl: render_value(&tp, bv, iv, fv, sv),
            tp,
            st,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("get_history query failed: {e}"))
}

pub fn get_current(pool: &DbPool) -> anyhow::Result<Vec<CurrentRow>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT c.tag_id, c.tag_time, t.type, c.status, c.bool_value, c.int_value, c.float_value, c.str_value
         FROM current c JOIN tags t ON t.name = c.tag_id",
    )?;
    let rows = stmt.query_map([], |row| {
        let tag_id: String = row.get(0)?;
        let tm: String = row.get(1)?;
        let tp: String = row.get(2)?;
        let st: i32 = row.get(3)?;
        let bv: Option<i64> = row.get(4)?;
        let iv: Option<i64> = row.get(5)?;
        let fv: Option<f64> = row.get(6)?;
        let sv: Option<String> = row.get(7)?;
        Ok(CurrentRow {
            id: tag_id,
            tm,
            vl: render_value(&tp, bv, iv, fv, sv),
            tp,
            st,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("get_current query failed: {e}"))
}

pub fn get_state(pool: &DbPool) -> anyhow::Result<Vec<StateRow>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT key, value FROM state ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let value: String = row.get(1)?;
        Ok(StateRow {
            id: key,
            ds: None,
            vl: value,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| anyhow::anyhow!("get_state query failed: {e}"))
}
