//! SQL builders for the PostgreSQL driver.
//!
//! Everything here is pure string assembly from the dataset catalog; no I/O.
//! The driver executes these statements, the tests pin their exact shape.
//!
//! Table naming for one dataset `x`:
//! - production: `x`, backup generation: `x_backup`, swap target: `x_new`
//! - staging: `staging_x`
//! - CDC sets: `cdc_inserts_x`, `cdc_updates_x`, `cdc_deletes_x`
//!
//! Index names are schema-global in PostgreSQL, so the swap renames them
//! alongside the tables; without that, the next run's `CREATE INDEX` on
//! `x_new` would collide with the index now owned by production.

use crate::dataset::Dataset;

/// Advisory lock key serializing loader runs against one database.
pub const ADVISORY_LOCK_KEY: i64 = 0x6d65_6467_656e_0001;

pub const TRY_ADVISORY_LOCK: &str = "SELECT pg_try_advisory_lock($1)";

pub const TABLE_EXISTS: &str = "SELECT to_regclass($1) IS NOT NULL";

pub const INSERT_RUN: &str = "INSERT INTO etl_audit_log \
     (run_id, package_version, started_at, mode, status) \
     VALUES ($1, $2, $3, $4, 'Running') \
     RETURNING log_id";

pub const INSERT_DETAIL: &str = "INSERT INTO etl_run_details \
     (log_id, dataset, rows_read, rows_inserted, rows_updated, rows_deleted, \
      bytes_loaded, duration_ms) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)";

/// Terminal-status write. The `status = 'Running'` guard makes the terminal
/// transition write-once: a second finish matches zero rows.
pub const FINISH_RUN: &str = "UPDATE etl_audit_log \
     SET finished_at = now(), status = $2, error_message = $3 \
     WHERE log_id = $1 AND status = 'Running'";

/// One of the three materialized CDC sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcSet {
    Inserts,
    Updates,
    Deletes,
}

impl CdcSet {
    fn prefix(&self) -> &'static str {
        match self {
            CdcSet::Inserts => "cdc_inserts",
            CdcSet::Updates => "cdc_updates",
            CdcSet::Deletes => "cdc_deletes",
        }
    }
}

pub fn staging_table(ds: Dataset) -> String {
    format!("staging_{}", ds.table())
}

pub fn cdc_table(ds: Dataset, set: CdcSet) -> String {
    format!("{}_{}", set.prefix(), ds.table())
}

pub fn new_table(ds: Dataset) -> String {
    format!("{}_new", ds.table())
}

pub fn backup_table(ds: Dataset) -> String {
    format!("{}_backup", ds.table())
}

fn bk_index(table: &str) -> String {
    format!("idx_{table}_bk")
}

/// Column list for staging and COPY: domain columns then `raw_record`.
fn staging_columns(ds: Dataset) -> String {
    let mut cols: Vec<&str> = ds.columns().iter().map(|c| c.name).collect();
    cols.push("raw_record");
    cols.join(", ")
}

/// Staging DDL: unlogged, index-free, NOT NULL only on the business key.
pub fn create_staging(ds: Dataset) -> String {
    let cols = ds
        .columns()
        .iter()
        .map(|c| {
            if c.business_key {
                format!("{} TEXT NOT NULL", c.name)
            } else {
                format!("{} TEXT", c.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE UNLOGGED TABLE IF NOT EXISTS {} ({cols}, raw_record TEXT)",
        staging_table(ds),
    )
}

pub fn truncate_staging(ds: Dataset) -> String {
    format!("TRUNCATE {}", staging_table(ds))
}

/// The COPY statement consuming the encoder's byte stream.
pub fn copy_into_staging(ds: Dataset) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH \
         (FORMAT text, DELIMITER E'\\t', NULL '\\N', ENCODING 'UTF8')",
        staging_table(ds),
        staging_columns(ds),
    )
}

/// Production-shaped DDL for `table` (also used for the swap target).
pub fn create_production(ds: Dataset, table: &str) -> String {
    let cols = ds
        .columns()
        .iter()
        .map(|c| {
            if c.business_key {
                format!("{} TEXT NOT NULL", c.name)
            } else {
                format!("{} TEXT", c.name)
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
         id BIGSERIAL PRIMARY KEY, \
         {cols}, \
         raw_record TEXT, \
         is_active BOOLEAN NOT NULL DEFAULT true, \
         first_seen_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
         last_updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
    )
}

/// Unique index protecting business-key uniqueness in production.
pub fn create_bk_index(ds: Dataset, table: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {table} ({})",
        bk_index(table),
        ds.business_key().join(", "),
    )
}

/// Probe for duplicate business keys in staging. Returns up to five
/// offending keys (pipe-joined) with their multiplicities, ordered so the
/// resulting data error is deterministic.
pub fn duplicate_key_probe(ds: Dataset) -> String {
    let bk = ds.business_key();
    format!(
        "SELECT concat_ws('|', {cols}) AS bk, count(*) AS n \
         FROM {staging} GROUP BY {cols} HAVING count(*) > 1 \
         ORDER BY bk LIMIT 5",
        cols = bk.join(", "),
        staging = staging_table(ds),
    )
}

/// Business-key equality predicate between two aliased tables.
fn bk_join(ds: Dataset, left: &str, right: &str) -> String {
    ds.business_key()
        .iter()
        .map(|c| format!("{left}.{c} = {right}.{c}"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Row hash over the payload columns plus `raw_record`.
///
/// MD5 of the row-text representation separates "same" from "different";
/// exactness is provided by the business-key join, so collisions are
/// irrelevant. Including `raw_record` keeps the mirrored line current even
/// when a source reformat leaves the parsed payload unchanged.
fn payload_hash(ds: Dataset, alias: &str) -> String {
    let mut cols = ds.payload_columns();
    cols.push("raw_record");
    let list = cols
        .iter()
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("MD5(ROW({list})::text)")
}

/// Deletes: active production rows whose key is absent from staging.
pub fn create_cdc_deletes(ds: Dataset) -> String {
    let first_bk = ds.business_key()[0];
    format!(
        "CREATE UNLOGGED TABLE {cdc} AS \
         SELECT p.id FROM {prod} p \
         LEFT JOIN {staging} s ON {join} \
         WHERE s.{first_bk} IS NULL AND p.is_active",
        cdc = cdc_table(ds, CdcSet::Deletes),
        prod = ds.table(),
        staging = staging_table(ds),
        join = bk_join(ds, "p", "s"),
    )
}

/// Inserts: staging rows whose key has no production row at all, active or
/// not. Keys that only went inactive are reactivated by the update set.
pub fn create_cdc_inserts(ds: Dataset) -> String {
    format!(
        "CREATE UNLOGGED TABLE {cdc} AS \
         SELECT s.* FROM {staging} s \
         LEFT JOIN {prod} p ON {join} \
         WHERE p.id IS NULL",
        cdc = cdc_table(ds, CdcSet::Inserts),
        staging = staging_table(ds),
        prod = ds.table(),
        join = bk_join(ds, "s", "p"),
    )
}

/// Updates: rows present on both sides whose payload hash differs, plus
/// reactivations (inactive production row with the key back in staging,
/// payload change or not).
pub fn create_cdc_updates(ds: Dataset) -> String {
    format!(
        "CREATE UNLOGGED TABLE {cdc} AS \
         SELECT s.* FROM {staging} s \
         JOIN {prod} p ON {join} \
         WHERE NOT p.is_active OR {s_hash} <> {p_hash}",
        cdc = cdc_table(ds, CdcSet::Updates),
        staging = staging_table(ds),
        prod = ds.table(),
        join = bk_join(ds, "s", "p"),
        s_hash = payload_hash(ds, "s"),
        p_hash = payload_hash(ds, "p"),
    )
}

/// Drop the CDC tables ahead of rebuilding them.
pub fn drop_cdc_tables(ds: Dataset) -> String {
    format!(
        "DROP TABLE IF EXISTS {}, {}, {}",
        cdc_table(ds, CdcSet::Inserts),
        cdc_table(ds, CdcSet::Updates),
        cdc_table(ds, CdcSet::Deletes),
    )
}

/// Drop all per-run tables for a dataset. Tolerates absence.
pub fn drop_run_tables(ds: Dataset) -> String {
    format!(
        "DROP TABLE IF EXISTS {}, {}, {}, {}",
        staging_table(ds),
        cdc_table(ds, CdcSet::Inserts),
        cdc_table(ds, CdcSet::Updates),
        cdc_table(ds, CdcSet::Deletes),
    )
}

pub fn count_rows(table: &str) -> String {
    format!("SELECT count(*) FROM {table}")
}

// ── Full-load swap ─────────────────────────────────────────────────────────

/// Populate the swap target from staging; every row enters active with
/// fresh bookkeeping timestamps.
pub fn populate_new_table(ds: Dataset) -> String {
    let cols = staging_columns(ds);
    format!(
        "INSERT INTO {new} ({cols}, is_active, first_seen_at, last_updated_at) \
         SELECT {cols}, true, now(), now() FROM {staging}",
        new = new_table(ds),
        staging = staging_table(ds),
    )
}

/// The rename dance promoting `x_new` to production.
///
/// All statements run in the apply transaction, so concurrent readers never
/// observe a missing table. When no production table existed before the run
/// (fresh database), the backup steps are skipped and no `x_backup` is left
/// behind.
pub fn swap_statements(ds: Dataset, prod_exists: bool) -> Vec<String> {
    let prod = ds.table();
    let new = new_table(ds);
    let backup = backup_table(ds);
    let mut stmts = vec![format!("DROP TABLE IF EXISTS {backup} CASCADE")];
    if prod_exists {
        stmts.push(format!(
            "ALTER INDEX IF EXISTS {} RENAME TO {}",
            bk_index(prod),
            bk_index(&backup),
        ));
        stmts.push(format!(
            "ALTER INDEX IF EXISTS {prod}_pkey RENAME TO {backup}_pkey"
        ));
        stmts.push(format!("ALTER TABLE {prod} RENAME TO {backup}"));
    }
    stmts.push(format!("ALTER TABLE {new} RENAME TO {prod}"));
    stmts.push(format!(
        "ALTER INDEX IF EXISTS {} RENAME TO {}",
        bk_index(&new),
        bk_index(prod),
    ));
    stmts.push(format!(
        "ALTER INDEX IF EXISTS {new}_pkey RENAME TO {prod}_pkey"
    ));
    stmts
}

// ── Delta apply ────────────────────────────────────────────────────────────

/// Step 1: deactivate rows scheduled for soft delete. Runs first so any
/// unique-constraint slots are freed before updates and inserts.
pub fn apply_soft_deletes(ds: Dataset) -> String {
    format!(
        "UPDATE {prod} SET is_active = false, last_updated_at = now() \
         WHERE id IN (SELECT id FROM {cdc})",
        prod = ds.table(),
        cdc = cdc_table(ds, CdcSet::Deletes),
    )
}

/// Step 2: overwrite payload and reactivate rows with changed content.
/// The surrogate `id` and `first_seen_at` are untouched, so a returning
/// row keeps its identity.
pub fn apply_updates(ds: Dataset) -> String {
    let prod = ds.table();
    let mut sets: Vec<String> = ds
        .payload_columns()
        .iter()
        .map(|c| format!("{c} = u.{c}"))
        .collect();
    sets.push("raw_record = u.raw_record".to_string());
    sets.push("is_active = true".to_string());
    sets.push("last_updated_at = now()".to_string());
    format!(
        "UPDATE {prod} SET {sets} FROM {cdc} u WHERE {join}",
        sets = sets.join(", "),
        cdc = cdc_table(ds, CdcSet::Updates),
        join = bk_join(ds, prod, "u"),
    )
}

/// Step 3: insert genuinely new rows.
pub fn apply_inserts(ds: Dataset) -> String {
    let cols = staging_columns(ds);
    format!(
        "INSERT INTO {prod} ({cols}, is_active, first_seen_at, last_updated_at) \
         SELECT {cols}, true, now(), now() FROM {cdc}",
        prod = ds.table(),
        cdc = cdc_table(ds, CdcSet::Inserts),
    )
}

/// Session statement timeout; `0` disables the limit.
pub fn set_statement_timeout(secs: u64) -> String {
    format!("SET statement_timeout = '{secs}s'")
}
