//! Database race-condition harness.
//!
//! Demonstrates that a read-then-write sequence is not atomic under concurrent
//! access. Every worker first claims a ledger row with an atomic
//! increment-and-insert, then in a separate transaction writes its own argument
//! into the *lowest* ledger row and reads it back. Nothing ties the row a worker
//! writes to the row it claimed, so under the store's default isolation workers
//! can overwrite each other and observe values they never wrote.
//!
//! The harness does not retry or repair anything. It runs the workers, collects
//! what each one saw, and reports a summary together with a snapshot of the
//! tables.

mod postgres;
mod sqlite;
mod store;
mod worker;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Barrier;

use crate::config::{AppConfig, Backend};

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use store::{LedgerRow, Observation, RaceSession, RaceStore, Snapshot, StoreError, TxnMode};
pub use worker::{run_worker, Violation, WorkerError, WorkerId, WorkerSuccess};

/// Settings for one race run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaceSettings {
    pub workers: usize,
    pub mode: TxnMode,
    /// Drop both tables before setup so the counter starts at 0
    pub reset: bool,
}

impl RaceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.race.workers,
            mode: TxnMode {
                isolation: config.race.isolation,
                lock_rows: config.race.lock_rows,
            },
            reset: false,
        }
    }
}

/// A worker that ended with a store error rather than a verdict.
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: WorkerId,
    pub error: String,
}

/// Outcome of a full race run.
#[derive(Debug, Default)]
pub struct RaceSummary {
    pub workers: usize,
    pub succeeded: Vec<WorkerSuccess>,
    pub violations: Vec<Violation>,
    pub failures: Vec<WorkerFailure>,
    /// Tables as they stood after every worker finished
    pub snapshot: Snapshot,
}

impl RaceSummary {
    /// True when every worker read back its own value.
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.failures.is_empty()
    }

    /// Whether the run should end the process with a failure status.
    /// Only strict runs fail; otherwise violations are the expected demonstration.
    pub fn should_fail(&self, strict: bool) -> bool {
        strict && !self.is_clean()
    }

    pub fn exit_code(&self, strict: bool) -> ExitCode {
        if self.should_fail(strict) {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    fn record(&mut self, worker: WorkerId, outcome: Result<WorkerSuccess, WorkerError>) {
        match outcome {
            Ok(success) => self.succeeded.push(success),
            Err(WorkerError::Violation(violation)) => {
                tracing::warn!(
                    worker = %violation.worker,
                    claimed = violation.claimed,
                    ledger_id = violation.ledger_id,
                    expected = violation.expected,
                    observed = ?violation.observed,
                    "Worker read back a value it did not write"
                );
                self.violations.push(violation);
            }
            Err(WorkerError::Store(e)) => {
                tracing::error!(worker = %worker, error = %e, "Worker failed");
                self.failures.push(WorkerFailure {
                    worker,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Build the store selected by the `[database]` section.
pub fn store_from_config(config: &AppConfig) -> Arc<dyn RaceStore> {
    match config.database.backend {
        Backend::Postgres => Arc::new(PostgresStore::new(config.database.url.clone())),
        Backend::Sqlite => Arc::new(SqliteStore::new(
            config.database.sqlite_path.clone(),
            Duration::from_millis(config.database.busy_timeout_ms),
        )),
    }
}

/// Runs race workers against a store.
pub struct Harness {
    store: Arc<dyn RaceStore>,
    settings: RaceSettings,
}

impl Harness {
    pub fn new(store: Arc<dyn RaceStore>, settings: RaceSettings) -> Self {
        Self { store, settings }
    }

    /// Set up the tables, run every worker concurrently, wait for all of them and
    /// snapshot the tables.
    ///
    /// Only setup and snapshot failures are returned as errors; per-worker
    /// outcomes land in the summary.
    pub async fn run(&self) -> Result<RaceSummary, StoreError> {
        let backend = self.store.backend();
        tracing::info!(
            backend,
            workers = self.settings.workers,
            isolation = ?self.settings.mode.isolation,
            lock_rows = self.settings.mode.lock_rows,
            reset = self.settings.reset,
            "Starting race run"
        );

        self.store.setup(self.settings.reset).await?;
        tracing::debug!(backend, "Tables ready");

        let barrier = Arc::new(Barrier::new(self.settings.workers));
        let ids: Vec<WorkerId> = (0..i32::MAX)
            .take(self.settings.workers)
            .map(WorkerId)
            .collect();

        let handles = ids.iter().map(|&worker| {
            tokio::spawn(run_worker(
                self.store.clone(),
                barrier.clone(),
                worker,
                self.settings.mode,
            ))
        });
        let results = join_all(handles).await;

        let mut summary = RaceSummary {
            workers: self.settings.workers,
            ..Default::default()
        };
        for (worker, joined) in ids.into_iter().zip(results) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(WorkerError::Store(StoreError::Join(e.to_string()))),
            };
            summary.record(worker, outcome);
        }

        summary.snapshot = self.store.snapshot().await?;

        tracing::info!(
            backend,
            succeeded = summary.succeeded.len(),
            violations = summary.violations.len(),
            failures = summary.failures.len(),
            counter = ?summary.snapshot.counter(),
            ledger_rows = summary.snapshot.ledger.len(),
            "Race run finished"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Isolation;

    #[test]
    fn test_settings_from_config() {
        let config = AppConfig::from_toml(
            "[race]\nworkers = 3\nisolation = \"serializable\"\nlock_rows = true\n",
        )
        .unwrap();
        let settings = RaceSettings::from_config(&config);
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.mode.isolation, Isolation::Serializable);
        assert!(settings.mode.lock_rows);
        assert!(!settings.reset);
    }

    #[test]
    fn test_store_from_config_picks_backend() {
        let mut config = AppConfig::default();
        assert_eq!(store_from_config(&config).backend(), "postgres");

        config.database.backend = Backend::Sqlite;
        assert_eq!(store_from_config(&config).backend(), "sqlite");
    }

    #[test]
    fn test_summary_sorts_outcomes() {
        let mut summary = RaceSummary {
            workers: 3,
            ..Default::default()
        };
        summary.record(
            WorkerId(0),
            Ok(WorkerSuccess {
                worker: WorkerId(0),
                claimed: 1,
                observation: Observation {
                    ledger_id: 1,
                    read_back: Some(0),
                },
            }),
        );
        assert!(summary.is_clean());

        summary.record(
            WorkerId(1),
            Err(WorkerError::Violation(Violation {
                worker: WorkerId(1),
                claimed: 2,
                ledger_id: 1,
                expected: 1,
                observed: Some(2),
            })),
        );
        summary.record(WorkerId(2), Err(WorkerError::Store(StoreError::EmptyLedger)));

        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.violations.len(), 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].worker, WorkerId(2));
        assert!(!summary.is_clean());
    }

    fn violation(worker: i32) -> Violation {
        Violation {
            worker: WorkerId(worker),
            claimed: worker + 1,
            ledger_id: 1,
            expected: worker,
            observed: Some(worker + 1),
        }
    }

    #[test]
    fn test_strict_fails_on_failure_only_summary() {
        let summary = RaceSummary {
            workers: 1,
            failures: vec![WorkerFailure {
                worker: WorkerId(0),
                error: "database is locked".to_string(),
            }],
            ..Default::default()
        };
        assert!(summary.should_fail(true));
    }

    #[test]
    fn test_non_strict_succeeds_with_violations() {
        let summary = RaceSummary {
            workers: 2,
            violations: vec![violation(0), violation(1)],
            ..Default::default()
        };
        assert!(!summary.should_fail(false));
        assert!(summary.should_fail(true));
    }

    #[test]
    fn test_clean_summary_never_fails() {
        let summary = RaceSummary {
            workers: 0,
            ..Default::default()
        };
        assert!(!summary.should_fail(true));
        assert!(!summary.should_fail(false));
    }
}
