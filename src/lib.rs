//! medgen_mirror — mirror the NCBI MedGen distribution into PostgreSQL.
//!
//! The loader ingests the published pipe-delimited MedGen files into a
//! relational warehouse in two modes: a **full** refresh that rebuilds each
//! production table and swaps it in atomically, and a **delta** load that
//! diffs the new snapshot against production (change data capture) and
//! applies inserts, updates, and soft deletes transactionally.
//!
//! # Pipeline
//!
//! ```text
//! snapshot file ─ parser ─ encoder ─ COPY FROM STDIN ─ staging table
//!                                                         │
//!                                  full: rename swap ◄────┤
//!                                  delta: CDC diff + apply ◄┘
//! ```
//!
//! Rows are soft-deleted (`is_active = false`) rather than removed, and a
//! business key that reappears is reactivated under its original surrogate
//! id. Every run is recorded end to end in the `etl_audit_log` /
//! `etl_run_details` tables.
//!
//! The backend seam is the [`driver::BackendDriver`] trait; PostgreSQL is
//! the bundled implementation, selected from the connection-string scheme
//! by [`factory::create_driver`].

pub mod audit;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod encoder;
pub mod error;
pub mod factory;
pub mod orchestrator;
pub mod parser;
pub mod postgres;
pub mod record;

pub use audit::{RunDetail, RunStatus, RunSummary};
pub use config::{LoadMode, MirrorConfig};
pub use dataset::{ALL_DATASETS, Dataset};
pub use driver::{BackendDriver, ChangeCounts};
pub use error::{MirrorError, MirrorErrorKind};
pub use orchestrator::Orchestrator;
