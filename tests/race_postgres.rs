//! Race harness tests against a live Postgres server.
//!
//! Skipped unless `DINGO_TEST_POSTGRES_URL` is set, e.g.
//! `DINGO_TEST_POSTGRES_URL="host=localhost user=postgres dbname=dingo_test"`.
//! The tests drop and recreate the race tables, so point them at a scratch database.

use std::sync::Arc;

use dingo::config::Isolation;
use dingo::race::{Harness, LedgerRow, PostgresStore, RaceSettings, TxnMode};

fn store() -> Option<Arc<PostgresStore>> {
    match std::env::var("DINGO_TEST_POSTGRES_URL") {
        Ok(url) => Some(Arc::new(PostgresStore::new(url))),
        Err(_) => {
            eprintln!("[test] DINGO_TEST_POSTGRES_URL not set, skipping");
            None
        }
    }
}

// Both scenarios share the same tables, so they run in one test.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn postgres_race_scenarios() {
    let Some(store) = store() else {
        return;
    };

    let single = RaceSettings {
        workers: 1,
        mode: TxnMode::default(),
        reset: true,
    };
    let summary = Harness::new(store.clone(), single).run().await.unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.snapshot.counter(), Some(1));
    assert_eq!(summary.snapshot.ledger, vec![LedgerRow { id: 1, data: Some(0) }]);

    let locked = RaceSettings {
        workers: 16,
        mode: TxnMode {
            isolation: Isolation::Default,
            lock_rows: true,
        },
        reset: true,
    };
    let summary = Harness::new(store, locked).run().await.unwrap();
    assert!(summary.is_clean(), "violations: {:?}", summary.violations);
    assert_eq!(summary.snapshot.counter(), Some(16));
    assert_eq!(summary.snapshot.ledger.len(), 16);
}
