//! SQLite backend.
//!
//! Useful for running the harness without a database server. Connections are
//! opened in WAL mode with a busy timeout; all calls into rusqlite run on the
//! blocking pool so workers still execute in parallel.
//!
//! SQLite has a single writer and serializable transactions, so the race shows
//! up differently than on Postgres: a worker whose deferred transaction read a
//! stale snapshot fails with `SQLITE_BUSY` when it tries to write, instead of
//! silently overwriting another worker's row.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use const_format::formatcp;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::config::{COUNTER_TABLE, LEDGER_TABLE};

use super::store::{LedgerRow, Observation, RaceSession, RaceStore, Snapshot, StoreError, TxnMode};

const DROP_TABLES: &str = formatcp!(
    "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
    LEDGER_TABLE,
    COUNTER_TABLE
);

const CREATE_TABLES: &str = formatcp!(
    "CREATE TABLE IF NOT EXISTS {ledger} (id INTEGER PRIMARY KEY, data INTEGER);
     CREATE TABLE IF NOT EXISTS {counter} (id INTEGER PRIMARY KEY, data INTEGER);
     INSERT INTO {counter} (id) SELECT 0 WHERE NOT EXISTS (SELECT id FROM {counter} LIMIT 1);",
    ledger = LEDGER_TABLE,
    counter = COUNTER_TABLE
);

const INCREMENT_COUNTER: &str =
    formatcp!("UPDATE {} SET id = id + 1 RETURNING id", COUNTER_TABLE);
const INSERT_LEDGER: &str = formatcp!("INSERT INTO {} (id) VALUES (?1)", LEDGER_TABLE);
const SELECT_LOWEST: &str = formatcp!("SELECT id FROM {} ORDER BY id LIMIT 1", LEDGER_TABLE);
const UPDATE_DATA: &str = formatcp!("UPDATE {} SET data = ?1 WHERE id = ?2", LEDGER_TABLE);
const SELECT_DATA: &str = formatcp!("SELECT data FROM {} WHERE id = ?1", LEDGER_TABLE);
const SELECT_COUNTER: &str = formatcp!("SELECT id FROM {} ORDER BY id", COUNTER_TABLE);
const SELECT_LEDGER: &str = formatcp!("SELECT id, data FROM {} ORDER BY id", LEDGER_TABLE);

/// Race store backed by a SQLite database file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    fn open(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::trace!(path = %path.display(), journal_mode = %mode, "Opened SQLite connection");
        Ok(conn)
    }

    /// Open a connection and run `f` against it on the blocking pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        tokio::task::spawn_blocking(move || {
            let mut conn = Self::open(&path, busy_timeout)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl RaceStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn setup(&self, reset: bool) -> Result<(), StoreError> {
        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if reset {
                tx.execute_batch(DROP_TABLES)?;
            }
            tx.execute_batch(CREATE_TABLES)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn session(&self) -> Result<Box<dyn RaceSession>, StoreError> {
        let path = self.path.clone();
        let busy_timeout = self.busy_timeout;
        let conn = tokio::task::spawn_blocking(move || Self::open(&path, busy_timeout))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(Box::new(SqliteSession { conn: Some(conn) }))
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        self.run_blocking(|conn| {
            let counter_ids = conn
                .prepare(SELECT_COUNTER)?
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<i32>, _>>()?;
            let ledger = conn
                .prepare(SELECT_LEDGER)?
                .query_map([], |row| {
                    Ok(LedgerRow {
                        id: row.get(0)?,
                        data: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Snapshot { counter_ids, ledger })
        })
        .await
    }
}

/// One worker's connection to SQLite.
///
/// The connection moves onto the blocking pool for each call and back again.
/// If a call panics the connection is gone and later calls fail with
/// `StoreError::SessionClosed`.
pub struct SqliteSession {
    conn: Option<Connection>,
}

impl SqliteSession {
    async fn with_conn<T, F>(&mut self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let mut conn = self.conn.take().ok_or(StoreError::SessionClosed)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&mut conn);
            (conn, result)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?;
        self.conn = Some(conn);
        result
    }
}

fn claim(conn: &mut Connection) -> Result<i32, StoreError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let id: i32 = tx.query_row(INCREMENT_COUNTER, [], |row| row.get(0))?;
    tx.execute(INSERT_LEDGER, params![id])?;
    tx.commit()?;
    Ok(id)
}

fn write_and_verify(
    conn: &mut Connection,
    value: i32,
    mode: TxnMode,
) -> Result<Observation, StoreError> {
    // SQLite has no row locks; an IMMEDIATE transaction takes the write lock up front.
    let behavior = if mode.lock_rows {
        TransactionBehavior::Immediate
    } else {
        TransactionBehavior::Deferred
    };
    let tx = conn.transaction_with_behavior(behavior)?;

    let ledger_id: i32 = tx
        .query_row(SELECT_LOWEST, [], |row| row.get(0))
        .optional()?
        .ok_or(StoreError::EmptyLedger)?;
    tx.execute(UPDATE_DATA, params![value, ledger_id])?;
    let read_back: Option<i32> = tx.query_row(SELECT_DATA, params![ledger_id], |row| row.get(0))?;
    tx.commit()?;

    Ok(Observation {
        ledger_id,
        read_back,
    })
}

#[async_trait]
impl RaceSession for SqliteSession {
    async fn claim(&mut self) -> Result<i32, StoreError> {
        self.with_conn(claim).await
    }

    async fn write_and_verify(
        &mut self,
        value: i32,
        mode: TxnMode,
    ) -> Result<Observation, StoreError> {
        self.with_conn(move |conn| write_and_verify(conn, value, mode))
            .await
    }
}
