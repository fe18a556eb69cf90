// SPDX-License-Identifier: MIT OR Apache-2.0
//! The embedded SQL database capability.
//!
//! SQL text is always a literal from scripted source; values travel only
//! through the positional parameter array, bound one-to-one to `?`
//! placeholders by the prepared-statement API. There is no code path that
//! concatenates a value into SQL text.
//!
//! One connection per process, owned by the dispatcher. Prepared
//! statements are cached (32-entry LRU keyed by SQL text) and reused via
//! reset + re-bind; the cache is flushed whenever a schema-changing
//! statement runs.

use hull_core::{CapError, CapResult, STMT_CACHE_CAP};
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Rows come back as ordered column-name → JSON value maps.
pub type Row = BTreeMap<String, Value>;

/// Prepared-statement cache observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbStats {
    /// Queries answered by a cached statement.
    pub cache_hits: u64,
    /// Queries that compiled a fresh statement.
    pub cache_misses: u64,
}

/// The single database connection and its statement cache.
pub struct Db {
    conn: Connection,
    // Mirrors the LRU keyed by SQL text for the stats counters.
    cache_keys: VecDeque<String>,
    stats: DbStats,
    in_txn: bool,
}

impl Db {
    /// Open (or create) the database file and apply the startup pragmas
    /// in their fixed order.
    ///
    /// # Errors
    ///
    /// `IoFailure` when the file cannot be opened or a pragma fails.
    pub fn open(path: &Path) -> CapResult<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        apply_startup_pragmas(&conn)?;
        conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAP);
        Ok(Self {
            conn,
            cache_keys: VecDeque::new(),
            stats: DbStats::default(),
            in_txn: false,
        })
    }

    /// In-memory database for tests and tooling.
    ///
    /// # Errors
    ///
    /// `IoFailure` when SQLite cannot allocate the connection.
    pub fn open_in_memory() -> CapResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAP);
        Ok(Self {
            conn,
            cache_keys: VecDeque::new(),
            stats: DbStats::default(),
            in_txn: false,
        })
    }

    /// Run a row-returning statement.
    ///
    /// Blob columns surface as base64url (no-pad) strings; every other
    /// SQLite type maps to the corresponding JSON scalar.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> CapResult<Vec<Row>> {
        self.note_cache_use(sql);
        let binds = to_sql_values(params)?;
        let mut stmt = self.conn.prepare_cached(sql).map_err(db_err)?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(binds))
            .map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut record = Row::new();
            for (i, name) in column_names.iter().enumerate() {
                let value: SqlValue = row.get(i).map_err(db_err)?;
                record.insert(name.clone(), sql_to_json(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    /// Run a non-returning statement; yields the affected-row count.
    pub fn exec(&mut self, sql: &str, params: &[Value]) -> CapResult<usize> {
        self.note_cache_use(sql);
        let binds = to_sql_values(params)?;
        let affected = {
            let mut stmt = self.conn.prepare_cached(sql).map_err(db_err)?;
            stmt.execute(rusqlite::params_from_iter(binds))
                .map_err(db_err)?
        };
        if is_schema_change(sql) {
            debug!(sql, "schema change, flushing statement cache");
            self.conn.flush_prepared_statement_cache();
            self.cache_keys.clear();
        }
        Ok(affected)
    }

    /// Begin an explicit transaction.
    pub fn begin(&mut self) -> CapResult<()> {
        if self.in_txn {
            return Err(CapError::Invalid("transaction already open".into()));
        }
        self.conn.execute_batch("BEGIN").map_err(db_err)?;
        self.in_txn = true;
        Ok(())
    }

    /// Commit the open transaction.
    pub fn commit(&mut self) -> CapResult<()> {
        if !self.in_txn {
            return Err(CapError::Invalid("no open transaction".into()));
        }
        self.conn.execute_batch("COMMIT").map_err(db_err)?;
        self.in_txn = false;
        Ok(())
    }

    /// Roll back the open transaction.
    pub fn rollback(&mut self) -> CapResult<()> {
        if !self.in_txn {
            return Err(CapError::Invalid("no open transaction".into()));
        }
        self.conn.execute_batch("ROLLBACK").map_err(db_err)?;
        self.in_txn = false;
        Ok(())
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back
    /// on `Err`.
    ///
    /// # Errors
    ///
    /// The closure's error after rollback, or any transaction-control
    /// failure.
    pub fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> CapResult<T>) -> CapResult<T> {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                // Preserve the handler's error even if rollback also fails.
                let _ = self.rollback();
                Err(err)
            }
        }
    }

    /// Whether an explicit transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_txn
    }

    /// Cache counters.
    #[must_use]
    pub fn stats(&self) -> DbStats {
        self.stats
    }

    /// Run the shutdown sequence: optimize, truncate-checkpoint.
    pub fn close(self) -> CapResult<()> {
        self.conn.execute_batch("PRAGMA optimize").map_err(db_err)?;
        let _busy: i64 = self
            .conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| row.get(0))
            .map_err(db_err)?;
        self.conn.close().map_err(|(_, e)| db_err(e))?;
        Ok(())
    }

    fn note_cache_use(&mut self, sql: &str) {
        if let Some(pos) = self.cache_keys.iter().position(|k| k == sql) {
            self.cache_keys.remove(pos);
            self.cache_keys.push_back(sql.to_string());
            self.stats.cache_hits += 1;
        } else {
            self.cache_keys.push_back(sql.to_string());
            if self.cache_keys.len() > STMT_CACHE_CAP {
                self.cache_keys.pop_front();
            }
            self.stats.cache_misses += 1;
        }
    }
}

fn apply_startup_pragmas(conn: &Connection) -> CapResult<()> {
    // Assignments that return a row go through query_row; silent ones
    // through pragma_update. Order matters and matches the platform
    // contract.
    let _mode: String = conn
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", true).map_err(db_err)?;
    conn.busy_timeout(Duration::from_millis(5000)).map_err(db_err)?;
    // Negative cache_size is KiB: ~16 MiB of page cache.
    conn.pragma_update(None, "cache_size", -16384).map_err(db_err)?;
    conn.pragma_update(None, "temp_store", "MEMORY").map_err(db_err)?;
    let _mmap: i64 = conn
        .query_row("PRAGMA mmap_size=268435456", [], |row| row.get(0))
        .map_err(db_err)?;
    let _ckpt: i64 = conn
        .query_row("PRAGMA wal_autocheckpoint=1000", [], |row| row.get(0))
        .map_err(db_err)?;
    Ok(())
}

fn to_sql_values(params: &[Value]) -> CapResult<Vec<SqlValue>> {
    params.iter().map(to_sql_value).collect()
}

fn to_sql_value(value: &Value) -> CapResult<SqlValue> {
    match value {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(CapError::Invalid(format!("unbindable number: {n}")))
            }
        }
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => Err(CapError::Invalid(
            "bind values must be scalars".into(),
        )),
    }
}

fn sql_to_json(value: SqlValue) -> Value {
    use base64::Engine as _;
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => {
            Value::String(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b))
        }
    }
}

fn is_schema_change(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split_whitespace()
        .next()
        .map(str::to_ascii_uppercase);
    matches!(head.as_deref(), Some("CREATE" | "ALTER" | "DROP"))
}

fn db_err(err: rusqlite::Error) -> CapError {
    match err {
        rusqlite::Error::InvalidParameterCount(got, want) => CapError::Invalid(format!(
            "statement expects {want} parameters, got {got}"
        )),
        other => CapError::IoFailure(other.to_string()),
    }
}
