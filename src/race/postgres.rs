//! Postgres backend.
//!
//! Every session opens its own connection. The connection future is driven by a
//! spawned task that is aborted when the session is dropped, so the socket is
//! released on every exit path of a worker.

use async_trait::async_trait;
use const_format::formatcp;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, IsolationLevel, NoTls};

use crate::config::{Isolation, COUNTER_TABLE, LEDGER_TABLE};

use super::store::{LedgerRow, Observation, RaceSession, RaceStore, Snapshot, StoreError, TxnMode};

const DROP_TABLES: &str = formatcp!(
    "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
    LEDGER_TABLE,
    COUNTER_TABLE
);

const CREATE_TABLES: &str = formatcp!(
    "CREATE TABLE IF NOT EXISTS {ledger} (id int PRIMARY KEY, data int);
     CREATE TABLE IF NOT EXISTS {counter} (id int PRIMARY KEY, data int);
     INSERT INTO {counter} (id) SELECT 0 WHERE NOT EXISTS (SELECT id FROM {counter} LIMIT 1);",
    ledger = LEDGER_TABLE,
    counter = COUNTER_TABLE
);

const CLAIM: &str = formatcp!(
    "WITH x AS (UPDATE {counter} SET id = id + 1 RETURNING id)
     INSERT INTO {ledger} (id) SELECT id FROM x RETURNING id",
    counter = COUNTER_TABLE,
    ledger = LEDGER_TABLE
);

const SELECT_LOWEST: &str = formatcp!("SELECT id FROM {} ORDER BY id LIMIT 1", LEDGER_TABLE);
const SELECT_LOWEST_FOR_UPDATE: &str =
    formatcp!("SELECT id FROM {} ORDER BY id LIMIT 1 FOR UPDATE", LEDGER_TABLE);
const UPDATE_DATA: &str = formatcp!("UPDATE {} SET data = $1 WHERE id = $2", LEDGER_TABLE);
const SELECT_DATA: &str = formatcp!("SELECT data FROM {} WHERE id = $1", LEDGER_TABLE);
const SELECT_COUNTER: &str = formatcp!("SELECT id FROM {} ORDER BY id", COUNTER_TABLE);
const SELECT_LEDGER: &str = formatcp!("SELECT id, data FROM {} ORDER BY id", LEDGER_TABLE);

/// Race store backed by a Postgres server.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    url: String,
}

impl PostgresStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    async fn connect(&self) -> Result<PostgresSession, StoreError> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls).await?;
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "Postgres connection closed with error");
            }
        });
        Ok(PostgresSession { client, driver })
    }
}

#[async_trait]
impl RaceStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn setup(&self, reset: bool) -> Result<(), StoreError> {
        let mut session = self.connect().await?;
        let txn = session.client.transaction().await?;
        if reset {
            txn.batch_execute(DROP_TABLES).await?;
        }
        txn.batch_execute(CREATE_TABLES).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn session(&self) -> Result<Box<dyn RaceSession>, StoreError> {
        Ok(Box::new(self.connect().await?))
    }

    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let session = self.connect().await?;
        let counter_ids = session
            .client
            .query(SELECT_COUNTER, &[])
            .await?
            .iter()
            .map(|row| row.get::<_, i32>(0))
            .collect();
        let ledger = session
            .client
            .query(SELECT_LEDGER, &[])
            .await?
            .iter()
            .map(|row| LedgerRow {
                id: row.get(0),
                data: row.get(1),
            })
            .collect();
        Ok(Snapshot { counter_ids, ledger })
    }
}

/// One worker's connection to Postgres.
pub struct PostgresSession {
    client: Client,
    driver: JoinHandle<()>,
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn isolation_level(isolation: Isolation) -> Option<IsolationLevel> {
    match isolation {
        Isolation::Default => None,
        Isolation::ReadCommitted => Some(IsolationLevel::ReadCommitted),
        Isolation::RepeatableRead => Some(IsolationLevel::RepeatableRead),
        Isolation::Serializable => Some(IsolationLevel::Serializable),
    }
}

#[async_trait]
impl RaceSession for PostgresSession {
    async fn claim(&mut self) -> Result<i32, StoreError> {
        let row = self.client.query_one(CLAIM, &[]).await?;
        Ok(row.get(0))
    }

    async fn write_and_verify(
        &mut self,
        value: i32,
        mode: TxnMode,
    ) -> Result<Observation, StoreError> {
        let txn = match isolation_level(mode.isolation) {
            Some(level) => {
                self.client
                    .build_transaction()
                    .isolation_level(level)
                    .start()
                    .await?
            }
            None => self.client.transaction().await?,
        };

        let select = if mode.lock_rows {
            SELECT_LOWEST_FOR_UPDATE
        } else {
            SELECT_LOWEST
        };
        let ledger_id: i32 = txn
            .query_opt(select, &[])
            .await?
            .ok_or(StoreError::EmptyLedger)?
            .get(0);

        txn.execute(UPDATE_DATA, &[&value, &ledger_id]).await?;
        let read_back: Option<i32> = txn.query_one(SELECT_DATA, &[&ledger_id]).await?.get(0);
        txn.commit().await?;

        Ok(Observation {
            ledger_id,
            read_back,
        })
    }
}
