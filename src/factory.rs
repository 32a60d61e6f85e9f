//! Driver factory (C4) — connection-string scheme dispatch.
//!
//! One function maps a scheme to a concrete [`BackendDriver`]; nothing else
//! in the loader knows which backend it is talking to. Backend-specific
//! options ride in the config's option map and are validated here, before
//! any connection is attempted.

use std::collections::BTreeMap;

use crate::config::MirrorConfig;
use crate::driver::BackendDriver;
use crate::error::MirrorError;
use crate::postgres::PostgresDriver;

/// Session options the PostgreSQL driver understands (applied via `SET`).
const POSTGRES_OPTIONS: &[&str] = &["application_name", "search_path"];

/// Extract the scheme of a URI-form connection string.
pub fn scheme_of(dsn: &str) -> Option<&str> {
    dsn.split_once("://").map(|(scheme, _)| scheme)
}

/// Build the driver selected by the connection-string scheme.
///
/// Unknown schemes and unknown backend options are configuration errors;
/// nothing has touched the network when this fails.
pub fn create_driver(config: &MirrorConfig) -> Result<Box<dyn BackendDriver>, MirrorError> {
    let scheme = scheme_of(&config.dsn).ok_or_else(|| {
        MirrorError::Config("connection string is not a URI (expected scheme://...)".into())
    })?;
    match scheme {
        "postgres" | "postgresql" => {
            validate_options(&config.backend_options, POSTGRES_OPTIONS, "postgresql")?;
            Ok(Box::new(PostgresDriver::new(config.clone())))
        }
        other => Err(MirrorError::Config(format!(
            "unsupported backend scheme: {other}"
        ))),
    }
}

fn validate_options(
    options: &BTreeMap<String, String>,
    allowed: &[&str],
    backend: &str,
) -> Result<(), MirrorError> {
    for key in options.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(MirrorError::Config(format!(
                "unknown {backend} backend option: {key} (supported: {})",
                allowed.join(", "),
            )));
        }
    }
    Ok(())
}

/// Factory seam used by the orchestrator, so tests can substitute a
/// recording driver without a database.
pub trait DriverFactory: Send + Sync {
    fn create(&self, config: &MirrorConfig) -> Result<Box<dyn BackendDriver>, MirrorError>;
}

/// The production factory: scheme dispatch via [`create_driver`].
pub struct DefaultDriverFactory;

impl DriverFactory for DefaultDriverFactory {
    fn create(&self, config: &MirrorConfig) -> Result<Box<dyn BackendDriver>, MirrorError> {
        create_driver(config)
    }
}
