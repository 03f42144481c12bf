//! SQLite-backed persistence: schema management, settings/cache key-value stores, and the
//! full-text-search side tables. Everything here operates on a borrowed [`rusqlite::Connection`]
//! so it composes with the transaction wrapping done in [`crate::graph`].

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as Json;
use tracing::debug;

use crate::error::Result;

/// Schema version stored in `settings` under this key, mirroring the original database's
/// practice of recording the library version that created it.
pub const VERSION_SETTING_KEY: &str = "graphydb version";
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drop and recreate the core tables. *All data is lost.*
pub fn reset(conn: &Connection) -> Result<()> {
    debug!("resetting core schema");
    conn.execute_batch(
        "
        DROP TABLE IF EXISTS nodes;
        DROP TABLE IF EXISTS edges;
        DROP TABLE IF EXISTS settings;
        DROP TABLE IF EXISTS cache;
        DROP TABLE IF EXISTS changes;
        CREATE TABLE nodes(uid TEXT PRIMARY KEY, kind TEXT NOT NULL, ctime REAL, mtime REAL, data TEXT);
        CREATE TABLE edges(
            uid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            startuid TEXT NOT NULL REFERENCES nodes(uid),
            enduid TEXT NOT NULL REFERENCES nodes(uid),
            ctime REAL,
            mtime REAL,
            data TEXT
        );
        CREATE TABLE settings(key TEXT PRIMARY KEY, value TEXT);
        CREATE TABLE cache(key TEXT PRIMARY KEY, value TEXT);
        CREATE TABLE changes(id INTEGER PRIMARY KEY AUTOINCREMENT, change TEXT);
        ",
    )?;
    save_setting(conn, VERSION_SETTING_KEY, &Json::String(CRATE_VERSION.to_string()))?;
    Ok(())
}

/// Drop and recreate the optional FTS5 virtual tables. Passing `None` for a side leaves that
/// side's virtual table absent, matching the original's opt-in full-text indexing.
pub fn reset_fts(conn: &Connection, node_fields: Option<&[String]>, edge_fields: Option<&[String]>) -> Result<()> {
    conn.execute_batch("DROP TABLE IF EXISTS nodefts; DROP TABLE IF EXISTS edgefts;")?;
    if let Some(fields) = node_fields {
        let cols = fields.join(",");
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS nodefts USING fts5({cols},uid UNINDEXED);"
        ))?;
    }
    if let Some(fields) = edge_fields {
        let cols = fields.join(",");
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS edgefts USING fts5({cols},uid UNINDEXED);"
        ))?;
    }
    Ok(())
}

/// A raw, freshly-decoded row -- used to reconstruct a [`crate::node::Node`] or
/// [`crate::edge::Edge`] straight from storage without going through the pattern/fetch engine
/// (`original()`/`get_uid()` callers, and undo reconstruction, all just need one row by uid).
pub struct Row {
    pub uid: String,
    pub kind: String,
    pub ctime: f64,
    pub mtime: f64,
    pub attrs: crate::value::AttrMap,
    pub startuid: Option<String>,
    pub enduid: Option<String>,
}

pub fn load_node(conn: &Connection, uid: &str) -> Result<Option<Row>> {
    conn.query_row("SELECT uid, kind, ctime, mtime, data FROM nodes WHERE uid = ?1", params![uid], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?, r.get::<_, f64>(3)?, r.get::<_, String>(4)?))
    })
    .optional()?
    .map(|(uid, kind, ctime, mtime, data)| -> Result<Row> {
        let json: Json = serde_json::from_str(&data)?;
        Ok(Row { uid, kind, ctime, mtime, attrs: crate::value::json_to_attrmap(json), startuid: None, enduid: None })
    })
    .transpose()
}

pub fn load_edge(conn: &Connection, uid: &str) -> Result<Option<Row>> {
    conn.query_row(
        "SELECT uid, kind, startuid, enduid, ctime, mtime, data FROM edges WHERE uid = ?1",
        params![uid],
        |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, f64>(5)?,
                r.get::<_, String>(6)?,
            ))
        },
    )
    .optional()?
    .map(|(uid, kind, startuid, enduid, ctime, mtime, data)| -> Result<Row> {
        let json: Json = serde_json::from_str(&data)?;
        Ok(Row {
            uid,
            kind,
            ctime,
            mtime,
            attrs: crate::value::json_to_attrmap(json),
            startuid: Some(startuid),
            enduid: Some(enduid),
        })
    })
    .transpose()
}

pub fn node_exists(conn: &Connection, uid: &str) -> Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM nodes WHERE uid = ?1", params![uid], |r| r.get(0))?;
    Ok(n > 0)
}

pub fn edge_exists(conn: &Connection, uid: &str) -> Result<bool> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM edges WHERE uid = ?1", params![uid], |r| r.get(0))?;
    Ok(n > 0)
}

/// True if `uid` names a node or an edge.
pub fn exists(conn: &Connection, uid: &str) -> Result<bool> {
    Ok(node_exists(conn, uid)? || edge_exists(conn, uid)?)
}

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<Json>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |r| r.get(0))
        .optional()?;
    Ok(match raw {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    })
}

pub fn save_setting(conn: &Connection, key: &str, value: &Json) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO settings(key, value) VALUES(?1, ?2)",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub fn get_cached(conn: &Connection, key: &str) -> Result<Option<Json>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM cache WHERE key = ?1", params![key], |r| r.get(0))
        .optional()?;
    Ok(match raw {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    })
}

pub fn set_cached(conn: &Connection, key: &str, value: &Json) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cache(key, value) VALUES(?1, ?2)",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

/// Write (or update) the FTS row for `uid`, silently dropping any column in `fields` that the
/// virtual table doesn't define -- the original's `updatefts` behaves the same way, so a caller
/// passing an attribute the schema wasn't configured to index is a no-op rather than an error.
pub fn update_fts(conn: &Connection, table: &str, uid: &str, fields: &BTreeMap<String, String>) -> Result<()> {
    if fields.is_empty() {
        return Ok(());
    }
    if conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            params![table],
            |r| r.get::<_, i64>(0),
        )?
        == 0
    {
        return Ok(());
    }

    let columns: Vec<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let names = stmt.query_map([], |r| r.get::<_, String>(1))?;
        names.collect::<std::result::Result<_, _>>()?
    };

    let present: BTreeMap<&str, &str> = fields
        .iter()
        .filter(|(k, _)| columns.iter().any(|c| c == *k))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if present.is_empty() {
        return Ok(());
    }

    let existing: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table} WHERE uid = ?1"), params![uid], |r| r.get(0))?;
    if existing > 0 {
        let set_clause = present.keys().map(|k| format!("{k} = ?")).collect::<Vec<_>>().join(", ");
        let mut values: Vec<&str> = present.values().copied().collect();
        values.push(uid);
        let sql = format!("UPDATE {table} SET {set_clause} WHERE uid = ?");
        conn.execute(&sql, rusqlite::params_from_iter(values))?;
    } else {
        let cols = present.keys().cloned().chain(std::iter::once("uid")).collect::<Vec<_>>().join(",");
        let placeholders = vec!["?"; present.len() + 1].join(",");
        let mut values: Vec<&str> = present.values().copied().collect();
        values.push(uid);
        let sql = format!("INSERT INTO {table}({cols}) VALUES ({placeholders})");
        conn.execute(&sql, rusqlite::params_from_iter(values))?;
    }
    Ok(())
}

pub fn delete_fts(conn: &Connection, table: &str, uid: &str) -> Result<()> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |r| r.get(0),
    )?;
    if exists > 0 {
        conn.execute(&format!("DELETE FROM {table} WHERE uid = ?1"), params![uid])?;
    }
    Ok(())
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GraphStats {
    pub total_nodes: i64,
    pub total_edges: i64,
    pub node_kinds: BTreeMap<String, i64>,
    pub edge_kinds: BTreeMap<String, i64>,
    pub sqlite_version: String,
    pub crate_version: Option<Json>,
    pub changes: i64,
    /// Human-readable size of the backing file (e.g. `"12.3 KiB"`), or `None` for an in-memory
    /// database or if the file's metadata couldn't be read.
    pub file_size: Option<String>,
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

pub fn stats(conn: &Connection) -> Result<GraphStats> {
    let total_nodes: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
    let total_edges: i64 = conn.query_row("SELECT COUNT(*) FROM edges", [], |r| r.get(0))?;

    let mut node_kinds = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT kind, COUNT(kind) FROM nodes GROUP BY kind")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (k, n) = row?;
        node_kinds.insert(k, n);
    }

    let mut edge_kinds = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT kind, COUNT(kind) FROM edges GROUP BY kind")?;
    let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
    for row in rows {
        let (k, n) = row?;
        edge_kinds.insert(k, n);
    }

    let sqlite_version: String = conn.query_row("SELECT sqlite_version()", [], |r| r.get(0))?;
    let crate_version = get_setting(conn, VERSION_SETTING_KEY)?;
    let changes = count_changes(conn)?;
    let file_size = conn.path().and_then(|p| std::fs::metadata(p).ok()).map(|m| human_size(m.len()));

    Ok(GraphStats {
        total_nodes,
        total_edges,
        node_kinds,
        edge_kinds,
        sqlite_version,
        crate_version,
        changes,
        file_size,
    })
}

pub fn count_changes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM changes", [], |r| r.get(0))?)
}

/// Recreate the `changes` table, resetting the AUTOINCREMENT id sequence.
pub fn clear_changes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS changes;
         CREATE TABLE changes(id INTEGER PRIMARY KEY AUTOINCREMENT, change TEXT);
         VACUUM;",
    )?;
    Ok(())
}

pub fn delete_change(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM changes WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn insert_change(conn: &Connection, change: &Json) -> Result<()> {
    conn.execute("INSERT INTO changes (change) VALUES (?1)", params![serde_json::to_string(change)?])?;
    Ok(())
}

/// The most recent change record(s): a single record, or the whole batch it belongs to (in
/// ascending id order) if it carries a `batch` field.
pub fn last_changes(conn: &Connection) -> Result<Vec<(i64, Json)>> {
    if count_changes(conn)? == 0 {
        return Ok(Vec::new());
    }
    let (id, raw): (i64, String) =
        conn.query_row("SELECT id, change FROM changes ORDER BY id DESC LIMIT 1", [], |r| Ok((r.get(0)?, r.get(1)?)))?;
    let change: Json = serde_json::from_str(&raw)?;
    if let Some(batch) = change.get("batch").and_then(|b| b.as_str()) {
        let mut stmt = conn.prepare(
            "SELECT id, change FROM changes WHERE json_extract(change, '$.batch') = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![batch], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            let (cid, raw) = row?;
            out.push((cid, serde_json::from_str(&raw)?));
        }
        Ok(out)
    } else {
        Ok(vec![(id, change)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        reset(&conn).unwrap();
        conn
    }

    #[test]
    fn reset_creates_core_tables() {
        let conn = open();
        assert!(!exists(&conn, "nope").unwrap());
        let s = stats(&conn).unwrap();
        assert_eq!(s.total_nodes, 0);
        assert_eq!(s.total_edges, 0);
    }

    #[test]
    fn memory_database_reports_no_file_size() {
        let conn = open();
        assert_eq!(stats(&conn).unwrap().file_size, None);
    }

    #[test]
    fn human_size_picks_the_right_unit() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn settings_round_trip() {
        let conn = open();
        save_setting(&conn, "k", &Json::String("v".into())).unwrap();
        assert_eq!(get_setting(&conn, "k").unwrap(), Some(Json::String("v".into())));
        assert_eq!(get_setting(&conn, "missing").unwrap(), None);
    }

    #[test]
    fn change_journal_batching() {
        let conn = open();
        insert_change(&conn, &serde_json::json!({"uid":"a","+":{}})).unwrap();
        insert_change(&conn, &serde_json::json!({"uid":"b","+":{},"batch":"B1"})).unwrap();
        insert_change(&conn, &serde_json::json!({"uid":"c","+":{},"batch":"B1"})).unwrap();
        let last = last_changes(&conn).unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(count_changes(&conn).unwrap(), 3);
    }
}
