use anyhow::Result;
use rusqlite::Connection;

use crate::input::SeedRequest;

const DB_PATH: &str = "data/yp.sqlite";

pub fn connect() -> Result<Connection> {
    std::fs::create_dir_all("data")?;
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0,
            visited_at TEXT,
            error      TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS records (
            id         INTEGER PRIMARY KEY,
            page_url   TEXT NOT NULL,
            json       TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Frontier ──

/// Add one URL to the frontier. Returns true when the URL is new; re-adding
/// an already-queued URL is a no-op.
pub fn enqueue(conn: &Connection, url: &str) -> Result<bool> {
    let inserted = conn.execute("INSERT OR IGNORE INTO pages (url) VALUES (?1)", [url])?;
    Ok(inserted > 0)
}

pub fn enqueue_seeds(conn: &Connection, seeds: &[SeedRequest]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url) VALUES (?1)")?;
        for seed in seeds {
            count += stmt.execute([&seed.url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<(i64, String)>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_visited(conn: &Connection, page_id: i64, error: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE pages SET visited = 1, visited_at = datetime('now'), error = ?2 WHERE id = ?1",
        rusqlite::params![page_id, error],
    )?;
    Ok(())
}

// ── Dataset ──

pub fn push_records(
    conn: &Connection,
    page_url: &str,
    records: &[serde_json::Value],
) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT INTO records (page_url, json) VALUES (?1, ?2)")?;
        for record in records {
            count += stmt.execute(rusqlite::params![page_url, record.to_string()])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

/// Running count of stored records, readable at any time. A resumed run
/// starts counting from whatever the dataset already holds.
pub fn record_count(conn: &Connection) -> Result<usize> {
    let count: usize = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    Ok(count)
}

pub fn fetch_all_records(conn: &Connection) -> Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT json FROM records ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter()
        .map(|json| Ok(serde_json::from_str(json)?))
        .collect()
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub errors: usize,
    pub records: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM pages WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let records = record_count(conn)?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        errors,
        records,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn enqueue_deduplicates_by_url() {
        let conn = test_conn();
        assert!(enqueue(&conn, "https://a.example/1").unwrap());
        assert!(!enqueue(&conn, "https://a.example/1").unwrap());
        assert!(enqueue(&conn, "https://a.example/2").unwrap());
        assert_eq!(fetch_unvisited(&conn, None).unwrap().len(), 2);
    }

    #[test]
    fn visited_pages_leave_the_frontier() {
        let conn = test_conn();
        enqueue(&conn, "https://a.example/1").unwrap();
        let (id, _) = fetch_unvisited(&conn, None).unwrap()[0].clone();
        mark_visited(&conn, id, None).unwrap();
        assert!(fetch_unvisited(&conn, None).unwrap().is_empty());
        // Re-adding a visited URL is still a dedup no-op.
        assert!(!enqueue(&conn, "https://a.example/1").unwrap());
    }

    #[test]
    fn records_round_trip_with_count() {
        let conn = test_conn();
        let records = vec![
            serde_json::json!({"name": "Acme"}),
            serde_json::json!({"name": "Globex", "rating": 4.5}),
        ];
        push_records(&conn, "https://a.example/1", &records).unwrap();
        assert_eq!(record_count(&conn).unwrap(), 2);
        let stored = fetch_all_records(&conn).unwrap();
        assert_eq!(stored, records);
    }

    #[test]
    fn stats_track_errors() {
        let conn = test_conn();
        enqueue(&conn, "https://a.example/1").unwrap();
        enqueue(&conn, "https://a.example/2").unwrap();
        let pages = fetch_unvisited(&conn, None).unwrap();
        mark_visited(&conn, pages[0].0, Some("HTTP 500")).unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.visited, 1);
        assert_eq!(stats.unvisited, 1);
        assert_eq!(stats.errors, 1);
    }
}
