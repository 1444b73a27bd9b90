//! Store abstraction shared by the Postgres and SQLite backends.
//!
//! A `RaceStore` owns setup and inspection of the two race tables and hands out
//! `RaceSession`s, one per worker. A session owns a dedicated connection and is
//! released when dropped, whichever way the worker exits.

use async_trait::async_trait;

use crate::config::Isolation;

/// Errors raised by a store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Ledger table is empty")]
    EmptyLedger,

    #[error("Session connection was lost")]
    SessionClosed,

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// How the write-and-verify transaction is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxnMode {
    pub isolation: Isolation,
    /// Lock the selected ledger row (or the whole database on SQLite) before writing
    pub lock_rows: bool,
}

/// What a worker saw inside its write-and-verify transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Ledger row the worker selected and updated
    pub ledger_id: i32,
    /// Data read back after the update
    pub read_back: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerRow {
    pub id: i32,
    pub data: Option<i32>,
}

/// Contents of both tables at a point in time, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub counter_ids: Vec<i32>,
    pub ledger: Vec<LedgerRow>,
}

impl Snapshot {
    /// Current counter value, if exactly one counter row exists.
    pub fn counter(&self) -> Option<i32> {
        match self.counter_ids.as_slice() {
            [id] => Some(*id),
            _ => None,
        }
    }

    pub fn ledger_row(&self, id: i32) -> Option<&LedgerRow> {
        self.ledger.iter().find(|row| row.id == id)
    }
}

#[async_trait]
pub trait RaceStore: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Create both tables if missing and seed the counter with id 0 when empty.
    /// With `reset`, drop both tables first.
    async fn setup(&self, reset: bool) -> Result<(), StoreError>;

    /// Open a dedicated session for one worker.
    async fn session(&self) -> Result<Box<dyn RaceSession>, StoreError>;

    async fn snapshot(&self) -> Result<Snapshot, StoreError>;
}

#[async_trait]
pub trait RaceSession: Send {
    /// Increment the counter and insert a ledger row with the new value, atomically.
    /// Returns the new counter value.
    async fn claim(&mut self) -> Result<i32, StoreError>;

    /// In one transaction: select the lowest-id ledger row, set its data to `value`,
    /// read the data back, commit.
    async fn write_and_verify(&mut self, value: i32, mode: TxnMode)
        -> Result<Observation, StoreError>;
}
