//! Table definitions (spec §4.7). One idempotent `CREATE TABLE IF NOT
//! EXISTS` pass rather than the teacher's versioned `apply_schema_vN`
//! migrations — this is a fresh schema with no prior version to migrate
//! from; the versioning machinery would have nothing to do.
//!
//! `tags.name` is the primary key: the tag's stable name string, not a
//! surrogate integer. `history.tag_id`/`current.tag_id` hold that same
//! name, matching the original's `Tag.id`/`History.tag_id`/`Current.tag_id`
//! (all `String`) — the name is the identifier config, the HTTP API, and
//! the bus all share.

use rusqlite::Connection;

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA cache_size = -64000;

        CREATE TABLE IF NOT EXISTS connectors (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            name              TEXT NOT NULL UNIQUE,
            connection_string TEXT NOT NULL,
            cycle_ms          INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS scripts (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            name      TEXT NOT NULL UNIQUE,
            cycle_ms  INTEGER NOT NULL,
            is_active INTEGER NOT NULL,
            body      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tags (
            name            TEXT PRIMARY KEY,
            type            TEXT NOT NULL,
            source          TEXT NOT NULL,
            min             REAL NOT NULL,
            max             REAL NOT NULL,
            is_log          INTEGER NOT NULL,
            connector_name  TEXT,
            description     TEXT
        );

        CREATE TABLE IF NOT EXISTS history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tag_id      TEXT NOT NULL REFERENCES tags(name),
            tag_time    TEXT NOT NULL,
            bool_value  INTEGER,
            int_value   INTEGER,
            float_value REAL,
            str_value   TEXT,
            status      INTEGER NOT NULL,
            UNIQUE(tag_id, tag_time)
        );
        CREATE INDEX IF NOT EXISTS idx_history_tag_time ON history(tag_time);

        CREATE TABLE IF NOT EXISTS current (
            tag_id      TEXT PRIMARY KEY REFERENCES tags(name),
            tag_time    TEXT NOT NULL,
            bool_value  INTEGER,
            int_value   INTEGER,
            float_value REAL,
            str_value   TEXT,
            status      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS state (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='history'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
