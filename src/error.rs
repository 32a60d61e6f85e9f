//! Error types for medgen_mirror.
//!
//! All failures inside the loader are represented by [`MirrorError`]. Errors
//! are propagated via `Result<T, MirrorError>` throughout the codebase and
//! mapped to a process exit code at the binary boundary.
//!
//! # Error Classification
//!
//! Errors are classified into five kinds that determine how a run ends:
//! - **Config** — bad connection string, unsupported scheme, missing or
//!   unknown backend option. Never retried; exit code 2.
//! - **Connection** — transport-level failure or a lost session. Retried
//!   only outside a transaction; mid-run it is fatal.
//! - **Load** — bulk load, CDC, or apply failed (protocol, constraint,
//!   timeout, or server error). The run fails.
//! - **Data** — invariant violation detected before apply (duplicate
//!   business keys in staging, parse-error budget exhausted). The run fails
//!   and the diagnostics carry the offending keys.
//! - **Audit** — a metadata write failed. Logged and swallowed once a
//!   terminal run status has been determined; it never masks the run's
//!   actual outcome.

use std::fmt;

/// Primary error type for the loader.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Invalid configuration: connection string, scheme, or backend option.
    #[error("configuration error: {0}")]
    Config(String),

    /// The backend session could not be established or was lost.
    #[error("connection error: {0}")]
    Connection(String),

    /// Bulk load, CDC, or apply failed on the backend.
    #[error("load error: {0}")]
    Load(String),

    /// A data invariant was violated before any apply.
    #[error("data error: {0}")]
    Data(String),

    /// An audit/metadata write failed.
    #[error("audit error: {0}")]
    Audit(String),
}

/// Classification of an error for exit codes and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorErrorKind {
    Config,
    Connection,
    Load,
    Data,
    Audit,
}

impl fmt::Display for MirrorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MirrorErrorKind::Config => write!(f, "CONFIG"),
            MirrorErrorKind::Connection => write!(f, "CONNECTION"),
            MirrorErrorKind::Load => write!(f, "LOAD"),
            MirrorErrorKind::Data => write!(f, "DATA"),
            MirrorErrorKind::Audit => write!(f, "AUDIT"),
        }
    }
}

impl MirrorError {
    /// Classify the error for reporting.
    pub fn kind(&self) -> MirrorErrorKind {
        match self {
            MirrorError::Config(_) => MirrorErrorKind::Config,
            MirrorError::Connection(_) => MirrorErrorKind::Connection,
            MirrorError::Load(_) => MirrorErrorKind::Load,
            MirrorError::Data(_) => MirrorErrorKind::Data,
            MirrorError::Audit(_) => MirrorErrorKind::Audit,
        }
    }

    /// Process exit code for the binary: 2 for configuration problems,
    /// 1 for everything else that reaches the top level.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            MirrorErrorKind::Config => 2,
            _ => 1,
        }
    }

    /// Whether a failure of this kind may be logged and swallowed.
    ///
    /// Only audit errors are swallowable, and only after the run's terminal
    /// status has been determined; every other kind is the run outcome.
    pub fn is_swallowable(&self) -> bool {
        matches!(self, MirrorError::Audit(_))
    }

    /// Construct the canonical statement-timeout error.
    pub fn timed_out(statement: &str) -> Self {
        MirrorError::Load(format!("statement timed out: {statement}"))
    }

    /// Whether this error was caused by a statement timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MirrorError::Load(msg) if msg.starts_with("statement timed out"))
    }
}
