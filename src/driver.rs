//! Backend driver contract (C2).
//!
//! [`BackendDriver`] is the seam that keeps the loader portable across
//! relational engines. The orchestrator owns one driver per run and walks
//! it through the fixed lifecycle: connect, staging, bulk load, CDC (delta
//! only), apply, audit, cleanup, close. Every apply is one logical
//! transaction: either the full swap or the delta apply succeeds
//! completely, or production is left unchanged.
//!
//! Concrete drivers are selected once at run start by the factory; there is
//! no other dynamic dispatch.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::audit::{RunContext, RunDetail, RunStatus};
use crate::config::LoadMode;
use crate::dataset::Dataset;
use crate::error::MirrorError;

/// Pull-based stream of encoded COPY rows, produced by the encoder.
///
/// The driver must consume this without buffering the whole dataset; the
/// PostgreSQL implementation forwards bounded chunks to the COPY socket.
pub type RowStream = Box<dyn Iterator<Item = Result<Bytes, MirrorError>> + Send>;

/// Cardinalities of a change set, or of an apply's effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeCounts {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl ChangeCounts {
    pub fn is_empty(&self) -> bool {
        self.inserts == 0 && self.updates == 0 && self.deletes == 0
    }
}

/// Abstract contract for a relational backend.
///
/// Method-level requirements (preconditions and failure modes) hold for
/// every implementation, not just PostgreSQL.
#[async_trait]
pub trait BackendDriver: Send {
    /// Establish a session. Idempotent; a redundant call is a no-op.
    /// Fails with a connection error on an unreachable endpoint or bad
    /// credentials.
    async fn connect(&mut self) -> Result<(), MirrorError>;

    /// Create or truncate the staging tables for the given datasets. Safe
    /// to run twice; truncation also reconciles staging left over from an
    /// interrupted run.
    async fn initialize_staging(&mut self, datasets: &[Dataset]) -> Result<(), MirrorError>;

    /// Stream encoded rows into the dataset's staging table using the
    /// backend's native bulk protocol. Returns the row count loaded. A
    /// failed load rolls back completely, leaving staging empty.
    async fn bulk_load(&mut self, dataset: Dataset, rows: RowStream) -> Result<u64, MirrorError>;

    /// Diff the staging snapshot against production into the three CDC
    /// tables and return their cardinalities. Duplicate business keys in
    /// staging fail deterministically with a data error.
    async fn execute_cdc(&mut self, dataset: Dataset) -> Result<ChangeCounts, MirrorError>;

    /// Promote the snapshot: full mode swaps staging into production;
    /// delta mode applies the CDC sets (deactivate, update, insert, in
    /// that order) inside one transaction. Returns the applied counts.
    async fn apply_changes(
        &mut self,
        dataset: Dataset,
        mode: LoadMode,
    ) -> Result<ChangeCounts, MirrorError>;

    /// Drop per-run staging and CDC tables. Tolerates missing tables.
    async fn cleanup(&mut self) -> Result<(), MirrorError>;

    /// Open the audit row for this run; returns its `log_id`.
    async fn log_run_start(&mut self, run: &RunContext) -> Result<i64, MirrorError>;

    /// Append one per-dataset detail row.
    async fn log_run_detail(&mut self, log_id: i64, detail: &RunDetail)
    -> Result<(), MirrorError>;

    /// Write the single terminal status for the run. Must be the last
    /// write of any run and must succeed even when the data apply failed.
    async fn log_run_finish(
        &mut self,
        log_id: i64,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), MirrorError>;

    /// Release the session. Idempotent.
    async fn close(&mut self) -> Result<(), MirrorError>;
}

impl fmt::Debug for dyn BackendDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn BackendDriver")
    }
}
