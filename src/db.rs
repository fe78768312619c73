//! SQLite-backed persistence for the result cache, history log and
//! daily usage counter. One connection behind a mutex; the pipeline is
//! single-threaded, so no further locking discipline is needed.

use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Result, ScanError};
use crate::store::{HistoryStore, ResultCache, UsageStore, HISTORY_LIMIT};
use crate::types::{HistoryEntry, ScanResult};

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ScanError::Storage(e.to_string()))?;
        }
        let conn = Connection::open(&db_path)?;
        Self::init(conn)
    }

    /// Database under the platform data dir (`survey-scanner/scans.db`).
    pub fn open_default() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| ScanError::Storage("Could not find a data directory.".to_string()))?;
        Self::new(dir.join("survey-scanner").join("scans.db"))
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS result_cache (
                content_key TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS history (
                id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                document_type TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                result_json TEXT NOT NULL,
                preview TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS api_usage (
                day TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );
            ",
        )?;
        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ScanError::Storage(e.to_string()))
    }
}

impl ResultCache for Db {
    fn get(&self, key: &str) -> Result<Option<ScanResult>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT result_json FROM result_cache WHERE content_key = ?1")?;
        let mut rows = stmt.query(params![key])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, result: &ScanResult) -> Result<()> {
        let json = serde_json::to_string(result)?;
        let created_at = chrono::Utc::now().to_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO result_cache (content_key, result_json, created_at) VALUES (?1, ?2, ?3)",
            params![key, json, created_at],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM result_cache", [])?;
        Ok(())
    }
}

impl HistoryStore for Db {
    fn append(&self, entry: HistoryEntry) -> Result<()> {
        let json = serde_json::to_string(&entry.result)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO history (id, created_at, document_type, row_count, result_json, preview)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.created_at,
                entry.document_type,
                entry.row_count as i64,
                json,
                entry.preview
            ],
        )?;
        // FIFO eviction by recency: keep only the newest entries.
        conn.execute(
            "DELETE FROM history WHERE rowid NOT IN
             (SELECT rowid FROM history ORDER BY rowid DESC LIMIT ?1)",
            params![HISTORY_LIMIT as i64],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, created_at, document_type, row_count, result_json, preview
             FROM history ORDER BY rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, created_at, document_type, row_count, result_json, preview) = row?;
            out.push(HistoryEntry {
                id,
                created_at,
                document_type,
                row_count: row_count as usize,
                result: serde_json::from_str(&result_json)?,
                preview,
            });
        }
        Ok(out)
    }

    fn remove(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM history", [])?;
        Ok(())
    }
}

impl UsageStore for Db {
    fn count_for(&self, day: &str) -> Result<u32> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT count FROM api_usage WHERE day = ?1")?;
        let mut rows = stmt.query(params![day])?;
        match rows.next()? {
            Some(row) => Ok(row.get::<_, i64>(0)? as u32),
            None => Ok(0),
        }
    }

    fn record(&self, day: &str) -> Result<u32> {
        let conn = self.lock()?;
        // Counts from earlier days are dead weight once the day rolls over.
        conn.execute("DELETE FROM api_usage WHERE day != ?1", params![day])?;
        conn.execute(
            "INSERT INTO api_usage (day, count) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET count = count + 1",
            params![day],
        )?;
        let mut stmt = conn.prepare("SELECT count FROM api_usage WHERE day = ?1")?;
        let count: i64 = stmt.query_row(params![day], |row| row.get(0))?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TableRow;
    use pretty_assertions::assert_eq;

    fn result(tag: &str) -> ScanResult {
        let headers = vec!["Name".to_string(), "Village".to_string()];
        let mut row = TableRow::blank(&headers);
        row.set("Name", tag);
        ScanResult {
            document_type: "farmer form".to_string(),
            narrative: format!("narrative for {}", tag),
            rows: vec![row],
            warnings: vec!["faint ink".to_string()],
        }
    }

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            id: format!("{}", 5_000 + n),
            created_at: format!("2024-06-01T10:00:{:02}Z", n % 60),
            document_type: "farmer form".to_string(),
            row_count: 1,
            result: result(&format!("row {}", n)),
            preview: format!("entry {}", n),
        }
    }

    #[test]
    fn cache_round_trips_a_result() {
        let db = Db::open_in_memory().unwrap();
        assert!(ResultCache::get(&db, "abc").unwrap().is_none());
        let stored = result("Sunita");
        db.put("abc", &stored).unwrap();
        assert_eq!(ResultCache::get(&db, "abc").unwrap().unwrap(), stored);
        ResultCache::clear(&db).unwrap();
        assert!(ResultCache::get(&db, "abc").unwrap().is_none());
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let db = Db::open_in_memory().unwrap();
        for n in 0..25 {
            db.append(entry(n)).unwrap();
        }
        let listed = db.list().unwrap();
        assert_eq!(listed.len(), HISTORY_LIMIT);
        assert_eq!(listed[0].preview, "entry 24");
        assert_eq!(listed[19].preview, "entry 5");
    }

    #[test]
    fn history_round_trips_edited_results() {
        let db = Db::open_in_memory().unwrap();
        let mut e = entry(1);
        e.result.set_cell(0, "Village", "Pokhara");
        db.append(e.clone()).unwrap();
        assert_eq!(db.list().unwrap()[0], e);
    }

    #[test]
    fn history_remove_by_id() {
        let db = Db::open_in_memory().unwrap();
        db.append(entry(1)).unwrap();
        db.append(entry(2)).unwrap();
        db.remove("5001").unwrap();
        let listed = db.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "5002");
    }

    #[test]
    fn usage_counter_resets_on_a_new_day() {
        let db = Db::open_in_memory().unwrap();
        assert_eq!(db.record("2024-06-01").unwrap(), 1);
        assert_eq!(db.record("2024-06-01").unwrap(), 2);
        assert_eq!(db.count_for("2024-06-01").unwrap(), 2);
        assert_eq!(db.count_for("2024-06-02").unwrap(), 0);
        assert_eq!(db.record("2024-06-02").unwrap(), 1);
        assert_eq!(db.count_for("2024-06-01").unwrap(), 0);
    }
}
