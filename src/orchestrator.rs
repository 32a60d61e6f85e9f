//! Orchestrator (C6) — drives one run end to end.
//!
//! One run is one `run_id`: connect, open the audit row, then for each
//! dataset in dependency order stage, bulk-load, diff (delta only), and
//! apply, recording a detail row per dataset. Success ends with cleanup and
//! a `Success` terminal status. Any error short-circuits: the possibly
//! poisoned session is closed, a fresh connection writes the `Failed`
//! terminal row, and the error propagates to the binary.
//!
//! Audit detail writes never decide a run's fate: a failed detail or
//! terminal write is logged and swallowed once the run outcome is known.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::audit::{RunContext, RunDetail, RunStatus, RunSummary};
use crate::config::{LoadMode, MirrorConfig};
use crate::dataset::Dataset;
use crate::driver::BackendDriver;
use crate::encoder::EncodedRows;
use crate::error::MirrorError;
use crate::factory::{DefaultDriverFactory, DriverFactory};
use crate::parser;

/// Bounded retry shape shared by the initial connect and the failure-path
/// reconnect. Retries happen only outside a transaction.
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct Orchestrator {
    config: MirrorConfig,
    factory: Box<dyn DriverFactory>,
}

impl Orchestrator {
    pub fn new(config: MirrorConfig) -> Self {
        Orchestrator {
            config,
            factory: Box::new(DefaultDriverFactory),
        }
    }

    /// Construct with an explicit factory (tests substitute a mock here).
    pub fn with_factory(config: MirrorConfig, factory: Box<dyn DriverFactory>) -> Self {
        Orchestrator { config, factory }
    }

    /// Execute one run to completion.
    pub async fn run(&mut self) -> Result<RunSummary, MirrorError> {
        let started = Instant::now();
        let run = RunContext::new(self.config.mode);
        info!(run_id = %run.run_id, mode = %run.mode, "run starting");

        let mut driver = self.factory.create(&self.config)?;
        connect_with_retry(driver.as_mut()).await?;
        let log_id = driver.log_run_start(&run).await?;

        match self.load_datasets(driver.as_mut(), log_id).await {
            Ok(details) => {
                if let Err(e) = driver.cleanup().await {
                    // Leftover staging is reconciled by the next run; a
                    // completed apply outranks a failed drop.
                    warn!(error = %e, "cleanup failed; staging tables left behind");
                }
                if let Err(e) = driver.log_run_finish(log_id, RunStatus::Success, None).await {
                    error!(error = %e, "audit finish write failed after successful run");
                }
                driver.close().await.ok();
                let summary = RunSummary {
                    run_id: run.run_id,
                    mode: run.mode,
                    details,
                    wall_ms: started.elapsed().as_millis() as u64,
                };
                info!(run_id = %run.run_id, "run succeeded");
                Ok(summary)
            }
            Err(run_err) => {
                // The session may be poisoned (aborted transaction, dead
                // socket); the Failed row goes through a fresh connection.
                driver.close().await.ok();
                self.record_failure(log_id, &run_err).await;
                Err(run_err)
            }
        }
    }

    async fn load_datasets(
        &self,
        driver: &mut dyn BackendDriver,
        log_id: i64,
    ) -> Result<Vec<RunDetail>, MirrorError> {
        let mut details = Vec::with_capacity(self.config.datasets.len());
        for &dataset in &self.config.datasets {
            let started = Instant::now();
            let mut detail = RunDetail::new(dataset);
            let result = self.load_one(driver, dataset, &mut detail).await;
            detail.duration_ms = started.elapsed().as_millis() as u64;
            // Every attempted dataset leaves a detail row, including the one
            // that failed; its counts reflect how far the attempt got.
            if let Err(e) = driver.log_run_detail(log_id, &detail).await {
                error!(dataset = %dataset, error = %e, "audit detail write failed");
            }
            result?;
            details.push(detail);
        }
        Ok(details)
    }

    async fn load_one(
        &self,
        driver: &mut dyn BackendDriver,
        dataset: Dataset,
        detail: &mut RunDetail,
    ) -> Result<(), MirrorError> {
        driver.initialize_staging(&[dataset]).await?;

        let records = parser::open_dataset(
            dataset,
            &self.config.data_dir,
            self.config.max_parse_errors,
        )?;
        let (rows, counters) = EncodedRows::new(records, self.config.capture_raw);
        let load_result = driver.bulk_load(dataset, Box::new(rows)).await;
        detail.rows_read = counters.rows();
        detail.bytes_loaded = counters.bytes();
        let loaded = load_result?;
        if loaded != counters.rows() {
            return Err(MirrorError::Load(format!(
                "{dataset}: encoded {} rows but the backend reports {loaded} loaded",
                counters.rows(),
            )));
        }

        let counts = match self.config.mode {
            LoadMode::Full => driver.apply_changes(dataset, LoadMode::Full).await?,
            LoadMode::Delta => {
                let diff = driver.execute_cdc(dataset).await?;
                let applied = driver.apply_changes(dataset, LoadMode::Delta).await?;
                if diff != applied {
                    // Set-based apply touches exactly the CDC rows; a gap
                    // means concurrent interference with production.
                    warn!(
                        dataset = %dataset,
                        ?diff, ?applied,
                        "cdc cardinalities differ from applied counts"
                    );
                }
                applied
            }
        };

        detail.rows_inserted = counts.inserts;
        detail.rows_updated = counts.updates;
        detail.rows_deleted = counts.deletes;
        Ok(())
    }

    /// Terminal `Failed` write over a fresh session.
    ///
    /// The original session may still be tearing down (it held the advisory
    /// lock), so the reconnect is retried briefly before giving up. Failure
    /// here is logged and swallowed; it never masks the run error.
    async fn record_failure(&self, log_id: i64, run_err: &MirrorError) {
        let message = format!("{} ({})", run_err, run_err.kind());
        let mut last_err = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            let result = async {
                let mut driver = self.factory.create(&self.config)?;
                driver.connect().await?;
                driver
                    .log_run_finish(log_id, RunStatus::Failed, Some(&message))
                    .await?;
                driver.close().await.ok();
                Ok::<(), MirrorError>(())
            }
            .await;
            match result {
                Ok(()) => return,
                Err(e) => last_err = Some(e),
            }
        }
        if let Some(e) = last_err {
            error!(error = %e, "could not record failed run in audit log");
        }
    }
}

/// Connect with bounded retries on transport-level failures.
///
/// Only connection errors are retried, and only here, before any
/// transaction has been opened; mid-run connection loss stays fatal.
/// Configuration and audit errors propagate immediately.
async fn connect_with_retry(driver: &mut dyn BackendDriver) -> Result<(), MirrorError> {
    let mut attempt = 0;
    loop {
        match driver.connect().await {
            Ok(()) => return Ok(()),
            Err(e @ MirrorError::Connection(_)) => {
                attempt += 1;
                if attempt >= CONNECT_ATTEMPTS {
                    return Err(e);
                }
                warn!(error = %e, attempt, "connect failed; retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
