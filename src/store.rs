//! SQLite persistence for counted results, one table per Ramsey family.
//!
//! Table names only ever come from [`ParameterPair::table_name`], which is
//! drawn from a closed set; every value is bound as a parameter.

use std::path::Path;
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, warn};

use crate::counter::CountedResult;
use crate::error::StoreError;
use crate::ramsey::ParameterPair;

/// How often a busy or locked database is retried before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Aggregate clique statistics over one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub avg_k3: Option<f64>,
    pub avg_k4: Option<f64>,
    pub nonempty_k4: u64,
    pub nonempty_k3: u64,
}

pub struct ResultStore {
    conn: Connection,
    retry: RetryPolicy,
}

impl ResultStore {
    pub fn open(path: &Path, retry: RetryPolicy) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "result store opened");
        Ok(Self { conn, retry })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    pub fn ensure_table(&mut self, pair: ParameterPair) -> Result<(), StoreError> {
        let table = pair.table_name();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY,
                vertex_count INTEGER NOT NULL,
                k_red_count INTEGER,
                k_red TEXT,
                k_blue_count INTEGER,
                k_blue TEXT,
                k3_count INTEGER,
                k4_count INTEGER,
                red_edges TEXT,
                blue_edges TEXT
            )"
        );
        self.retrying(&table, |conn| conn.execute_batch(&sql))?;
        self.add_missing_columns(&table)
    }

    /// Tables created before the edge-list columns existed get them added,
    /// empty for the rows already there.
    fn add_missing_columns(&mut self, table: &str) -> Result<(), StoreError> {
        let columns = self.retrying(table, |conn| {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
            let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
            names.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        for column in EDGE_COLUMNS {
            if !columns.iter().any(|name| name == column) {
                debug!(table, column, "adding column");
                let sql = format!("ALTER TABLE {table} ADD COLUMN {column} TEXT");
                self.retrying(table, |conn| conn.execute_batch(&sql))?;
            }
        }
        Ok(())
    }

    /// Insert or overwrite one row keyed by its id.
    pub fn upsert(&mut self, pair: ParameterPair, row: &CountedResult) -> Result<(), StoreError> {
        self.upsert_all(pair, std::slice::from_ref(row)).map(|_| ())
    }

    /// Upsert `rows` in a single transaction. Loading the same rows twice
    /// leaves the table as loading them once.
    pub fn upsert_all(
        &mut self,
        pair: ParameterPair,
        rows: &[CountedResult],
    ) -> Result<usize, StoreError> {
        self.ensure_table(pair)?;
        let table = pair.table_name();
        let sql = upsert_sql(&table);
        self.retrying(&table, |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(&sql)?;
                for row in rows {
                    stmt.execute(params![
                        row.id,
                        row.vertex_count,
                        row.k_red_count,
                        row.k_red,
                        row.k_blue_count,
                        row.k_blue,
                        row.k3_count,
                        row.k4_count,
                        row.red_edges,
                        row.blue_edges,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(rows.len())
        })
    }

    pub fn get(&mut self, pair: ParameterPair, id: u64) -> Result<CountedResult, StoreError> {
        let table = pair.table_name();
        let not_found = || StoreError::NotFound {
            table: table.clone(),
            id,
        };
        if !self.has_table(&table)? {
            return Err(not_found());
        }
        let sql = format!(
            "SELECT id, vertex_count, k_red_count, k_red, k_blue_count, k_blue, k3_count, k4_count,
                    red_edges, blue_edges
             FROM {table} WHERE id = ?1"
        );
        let row = self.retrying(&table, |conn| {
            conn.query_row(&sql, params![id], |row| {
                Ok(CountedResult {
                    id: row.get(0)?,
                    vertex_count: row.get(1)?,
                    k_red_count: row.get(2)?,
                    k_red: row.get(3)?,
                    k_blue_count: row.get(4)?,
                    k_blue: row.get(5)?,
                    k3_count: row.get(6)?,
                    k4_count: row.get(7)?,
                    red_edges: row.get(8)?,
                    blue_edges: row.get(9)?,
                })
            })
            .optional()
        })?;
        row.ok_or_else(not_found)
    }

    /// Averages and non-empty counts over the rows that carry at least one of
    /// the K3/K4 columns. An empty or never-loaded table gives nulls and zeros.
    pub fn aggregate(&mut self, pair: ParameterPair) -> Result<Aggregate, StoreError> {
        let table = pair.table_name();
        if !self.has_table(&table)? {
            return Ok(Aggregate {
                avg_k3: None,
                avg_k4: None,
                nonempty_k4: 0,
                nonempty_k3: 0,
            });
        }
        let sql = format!(
            "SELECT AVG(k3_count), AVG(k4_count),
                    COUNT(CASE WHEN k4_count > 0 THEN 1 END),
                    COUNT(CASE WHEN k3_count > 0 THEN 1 END)
             FROM {table}
             WHERE k3_count IS NOT NULL OR k4_count IS NOT NULL"
        );
        self.retrying(&table, |conn| {
            conn.query_row(&sql, [], |row| {
                Ok(Aggregate {
                    avg_k3: row.get(0)?,
                    avg_k4: row.get(1)?,
                    nonempty_k4: row.get(2)?,
                    nonempty_k3: row.get(3)?,
                })
            })
        })
    }

    fn has_table(&mut self, table: &str) -> Result<bool, StoreError> {
        self.retrying(table, |conn| {
            conn.query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
        })
    }

    /// Run `op`, retrying while SQLite reports the database busy or locked.
    fn retrying<T, F>(&mut self, table: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            match op(&mut self.conn) {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    if attempt >= self.retry.max_retries {
                        return Err(StoreError::Exhausted {
                            table: table.to_string(),
                            attempts: attempt + 1,
                            source: err,
                        });
                    }
                    attempt += 1;
                    warn!(table, attempt, %err, "store busy, retrying");
                    thread::sleep(self.retry.backoff * attempt);
                }
                Err(source) => {
                    return Err(StoreError::Sqlite {
                        table: table.to_string(),
                        source,
                    });
                }
            }
        }
    }
}

const EDGE_COLUMNS: [&str; 2] = ["red_edges", "blue_edges"];

fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table}
            (id, vertex_count, k_red_count, k_red, k_blue_count, k_blue, k3_count, k4_count,
             red_edges, blue_edges)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            vertex_count = excluded.vertex_count,
            k_red_count = excluded.k_red_count,
            k_red = excluded.k_red,
            k_blue_count = excluded.k_blue_count,
            k_blue = excluded.k_blue,
            k3_count = excluded.k3_count,
            k4_count = excluded.k4_count,
            red_edges = excluded.red_edges,
            blue_edges = excluded.blue_edges"
    )
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn r34() -> ParameterPair {
        ParameterPair::new(3, 4).unwrap()
    }

    fn row(id: u64, k3: Option<u64>, k4: Option<u64>) -> CountedResult {
        CountedResult {
            id,
            vertex_count: 9,
            k_red_count: k3,
            k_red: Some(String::new()),
            k_blue_count: Some(0),
            k_blue: Some(String::new()),
            k3_count: k3,
            k4_count: k4,
            red_edges: Some("0:1".into()),
            blue_edges: Some("0:2,1:2".into()),
        }
    }

    #[test]
    fn get_returns_stored_row() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let stored = row(3, Some(2), Some(0));
        store.upsert(r34(), &stored).unwrap();
        assert_eq!(store.get(r34(), 3).unwrap(), stored);
    }

    #[test]
    fn edge_lists_are_stored_and_nullable() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let mut bare = row(4, Some(0), Some(0));
        bare.red_edges = None;
        bare.blue_edges = None;
        store.upsert_all(r34(), &[row(3, Some(0), Some(0)), bare.clone()]).unwrap();
        let got = store.get(r34(), 3).unwrap();
        assert_eq!(got.red_edges.as_deref(), Some("0:1"));
        assert_eq!(got.blue_edges.as_deref(), Some("0:2,1:2"));
        assert_eq!(store.get(r34(), 4).unwrap(), bare);
    }

    #[test]
    fn older_tables_gain_the_edge_columns() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                "CREATE TABLE r34 (
                    id INTEGER PRIMARY KEY,
                    vertex_count INTEGER NOT NULL,
                    k_red_count INTEGER,
                    k_red TEXT,
                    k_blue_count INTEGER,
                    k_blue TEXT,
                    k3_count INTEGER,
                    k4_count INTEGER
                );
                INSERT INTO r34 (id, vertex_count, k3_count) VALUES (0, 9, 2);",
            )
            .unwrap();
        store.upsert(r34(), &row(1, Some(1), Some(0))).unwrap();
        let old = store.get(r34(), 0).unwrap();
        assert_eq!(old.k3_count, Some(2));
        assert_eq!(old.red_edges, None);
        assert_eq!(store.get(r34(), 1).unwrap().red_edges.as_deref(), Some("0:1"));
        // a second pass finds nothing to add
        store.ensure_table(r34()).unwrap();
    }

    #[test]
    fn missing_row_and_missing_table_are_not_found() {
        let mut store = ResultStore::open_in_memory().unwrap();
        assert!(matches!(
            store.get(r34(), 0),
            Err(StoreError::NotFound { id: 0, .. })
        ));
        store.upsert(r34(), &row(1, Some(1), Some(0))).unwrap();
        assert!(matches!(
            store.get(r34(), 2),
            Err(StoreError::NotFound { id: 2, .. })
        ));
    }

    #[test]
    fn loading_twice_is_idempotent() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let rows: Vec<_> = (0..5).map(|i| row(i, Some(i), Some(i / 2))).collect();
        store.upsert_all(r34(), &rows).unwrap();
        let once = store.aggregate(r34()).unwrap();
        store.upsert_all(r34(), &rows).unwrap();
        assert_eq!(store.aggregate(r34()).unwrap(), once);
        let count: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM r34", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn upsert_overwrites_by_id() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store.upsert(r34(), &row(0, Some(1), None)).unwrap();
        store.upsert(r34(), &row(0, Some(7), Some(2))).unwrap();
        let got = store.get(r34(), 0).unwrap();
        assert_eq!(got.k3_count, Some(7));
        assert_eq!(got.k4_count, Some(2));
    }

    #[test]
    fn aggregate_of_empty_table_is_null() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let empty = Aggregate {
            avg_k3: None,
            avg_k4: None,
            nonempty_k4: 0,
            nonempty_k3: 0,
        };
        assert_eq!(store.aggregate(r34()).unwrap(), empty);
        store.ensure_table(r34()).unwrap();
        assert_eq!(store.aggregate(r34()).unwrap(), empty);
    }

    #[test]
    fn aggregate_skips_rows_without_counts() {
        let mut store = ResultStore::open_in_memory().unwrap();
        store
            .upsert_all(
                r34(),
                &[
                    row(0, Some(0), Some(0)),
                    row(1, Some(4), Some(1)),
                    row(2, Some(2), None),
                    row(3, None, None),
                ],
            )
            .unwrap();
        let stats = store.aggregate(r34()).unwrap();
        assert_eq!(stats.avg_k3, Some(2.0));
        assert_eq!(stats.avg_k4, Some(0.5));
        assert_eq!(stats.nonempty_k3, 2);
        assert_eq!(stats.nonempty_k4, 1);
    }

    #[test]
    fn tables_are_separate_per_family() {
        let mut store = ResultStore::open_in_memory().unwrap();
        let r44 = ParameterPair::new(4, 4).unwrap();
        store.upsert(r34(), &row(0, Some(1), Some(1))).unwrap();
        assert!(store.get(r44, 0).is_err());
    }

    #[test]
    fn file_backed_store_persists_between_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ramsey_results.db");
        {
            let mut store = ResultStore::open(&path, RetryPolicy::default()).unwrap();
            store.upsert(r34(), &row(9, Some(3), Some(0))).unwrap();
        }
        let mut store = ResultStore::open(&path, RetryPolicy::default()).unwrap();
        assert_eq!(store.get(r34(), 9).unwrap().k3_count, Some(3));
    }

    #[test]
    fn busy_database_is_retried_then_surfaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.db");
        let policy = RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(1),
        };
        let mut writer = ResultStore::open(&path, policy).unwrap();
        // leave waiting to the retry policy instead of SQLite's busy handler
        writer.conn.busy_timeout(Duration::ZERO).unwrap();
        writer.ensure_table(r34()).unwrap();

        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        match writer.upsert(r34(), &row(0, Some(1), Some(1))) {
            Err(StoreError::Exhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        holder.execute_batch("COMMIT").unwrap();
        writer.upsert(r34(), &row(0, Some(1), Some(1))).unwrap();
    }
}
