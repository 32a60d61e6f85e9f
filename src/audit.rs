//! Run auditing — types and schema for the loader's metadata tables (C5).
//!
//! Every run writes exactly one row to `etl_audit_log` (opened `Running`,
//! closed with a single terminal `Success` or `Failed`) and one
//! `etl_run_details` row per dataset attempted. Audit rows are append-only:
//! after the terminal status is written the row is never touched again.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::LoadMode;
use crate::dataset::Dataset;
use crate::driver::ChangeCounts;

/// DDL for the audit tables, applied idempotently at connect time.
pub const AUDIT_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS etl_audit_log (
    log_id          BIGSERIAL PRIMARY KEY,
    run_id          UUID NOT NULL,
    package_version TEXT NOT NULL,
    started_at      TIMESTAMPTZ NOT NULL,
    finished_at     TIMESTAMPTZ,
    mode            TEXT NOT NULL CHECK (mode IN ('full', 'delta')),
    status          TEXT NOT NULL CHECK (status IN ('Running', 'Success', 'Failed')),
    error_message   TEXT
);

CREATE INDEX IF NOT EXISTS idx_etl_audit_log_run ON etl_audit_log (run_id);

CREATE TABLE IF NOT EXISTS etl_run_details (
    detail_id    BIGSERIAL PRIMARY KEY,
    log_id       BIGINT NOT NULL REFERENCES etl_audit_log(log_id),
    dataset      TEXT NOT NULL,
    rows_read    BIGINT NOT NULL DEFAULT 0,
    rows_inserted BIGINT NOT NULL DEFAULT 0,
    rows_updated BIGINT NOT NULL DEFAULT 0,
    rows_deleted BIGINT NOT NULL DEFAULT 0,
    bytes_loaded BIGINT NOT NULL DEFAULT 0,
    duration_ms  BIGINT NOT NULL DEFAULT 0
);
"#;

/// Terminal and in-flight run statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "Running",
            RunStatus::Success => "Success",
            RunStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one run, written by `log_run_start`.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub package_version: String,
    pub mode: LoadMode,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(mode: LoadMode) -> Self {
        RunContext {
            run_id: Uuid::new_v4(),
            package_version: env!("CARGO_PKG_VERSION").to_string(),
            mode,
            started_at: Utc::now(),
        }
    }
}

/// Per-dataset metrics written by `log_run_detail`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RunDetail {
    pub dataset: Dataset,
    pub rows_read: u64,
    pub rows_inserted: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub bytes_loaded: u64,
    pub duration_ms: u64,
}

impl RunDetail {
    pub fn new(dataset: Dataset) -> Self {
        RunDetail {
            dataset,
            rows_read: 0,
            rows_inserted: 0,
            rows_updated: 0,
            rows_deleted: 0,
            bytes_loaded: 0,
            duration_ms: 0,
        }
    }

    pub fn with_counts(mut self, counts: ChangeCounts) -> Self {
        self.rows_inserted = counts.inserts;
        self.rows_updated = counts.updates;
        self.rows_deleted = counts.deletes;
        self
    }
}

/// End-of-run report printed to stdout on success.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: LoadMode,
    pub details: Vec<RunDetail>,
    pub wall_ms: u64,
}

impl RunSummary {
    /// Compact per-dataset summary: one line per dataset plus a total line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "run {} ({} mode) completed in {:.1}s\n",
            self.run_id,
            self.mode,
            self.wall_ms as f64 / 1000.0,
        ));
        for d in &self.details {
            out.push_str(&format!(
                "  {:<15} read={} inserted={} updated={} deleted={}\n",
                d.dataset, d.rows_read, d.rows_inserted, d.rows_updated, d.rows_deleted,
            ));
        }
        let (ins, upd, del): (u64, u64, u64) = self.details.iter().fold((0, 0, 0), |acc, d| {
            (
                acc.0 + d.rows_inserted,
                acc.1 + d.rows_updated,
                acc.2 + d.rows_deleted,
            )
        });
        out.push_str(&format!(
            "  total           inserted={ins} updated={upd} deleted={del}\n"
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Running.as_str(), "Running");
        assert_eq!(RunStatus::Success.as_str(), "Success");
        assert_eq!(RunStatus::Failed.as_str(), "Failed");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_run_context_carries_package_version() {
        let run = RunContext::new(LoadMode::Full);
        assert_eq!(run.package_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(run.mode, LoadMode::Full);
    }

    #[test]
    fn test_detail_with_counts() {
        let detail = RunDetail::new(Dataset::Concepts).with_counts(ChangeCounts {
            inserts: 3,
            updates: 2,
            deletes: 1,
        });
        assert_eq!(detail.rows_inserted, 3);
        assert_eq!(detail.rows_updated, 2);
        assert_eq!(detail.rows_deleted, 1);
    }

    #[test]
    fn test_summary_render_totals() {
        let mut d1 = RunDetail::new(Dataset::Concepts);
        d1.rows_inserted = 3;
        let mut d2 = RunDetail::new(Dataset::Names);
        d2.rows_inserted = 2;
        d2.rows_deleted = 1;
        let summary = RunSummary {
            run_id: Uuid::nil(),
            mode: LoadMode::Delta,
            details: vec![d1, d2],
            wall_ms: 1500,
        };
        let text = summary.render();
        assert!(text.contains("delta mode"));
        assert!(text.contains("concepts"));
        assert!(text.contains("inserted=5 updated=0 deleted=1"));
    }

    #[test]
    fn test_summary_serializes_with_snake_case_datasets() {
        let summary = RunSummary {
            run_id: Uuid::nil(),
            mode: LoadMode::Full,
            details: vec![RunDetail::new(Dataset::SemanticTypes)],
            wall_ms: 10,
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains(r#""mode":"full""#));
        assert!(json.contains(r#""dataset":"semantic_types""#));
    }
}
