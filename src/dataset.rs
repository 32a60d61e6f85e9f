//! Dataset catalog — the logical MedGen entities mirrored into the warehouse.
//!
//! Each dataset maps one published MedGen file onto one production table.
//! The catalog is the single source of truth for table names, staging
//! column order, business keys, and the fixed dependency order in which the
//! orchestrator processes datasets. DDL and CDC SQL are generated from this
//! metadata; the encoder emits staging columns in exactly the order given
//! here.

use crate::error::MirrorError;

/// A staging/production domain column.
///
/// `business_key` columns identify a row naturally within its dataset and
/// are declared NOT NULL in staging so pathological data fails early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub business_key: bool,
}

const fn bk(name: &'static str) -> Column {
    Column {
        name,
        business_key: true,
    }
}

const fn payload(name: &'static str) -> Column {
    Column {
        name,
        business_key: false,
    }
}

/// A logical MedGen dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Concepts,
    Names,
    SemanticTypes,
    Relationships,
    SourceLinks,
    Definitions,
}

/// Fixed processing order: concepts first so every other dataset's CUIs
/// refer to an already-loaded concept snapshot within the same run.
pub const ALL_DATASETS: [Dataset; 6] = [
    Dataset::Concepts,
    Dataset::Names,
    Dataset::SemanticTypes,
    Dataset::Relationships,
    Dataset::SourceLinks,
    Dataset::Definitions,
];

const CONCEPT_COLUMNS: &[Column] = &[
    bk("cui"),
    payload("preferred_name"),
    payload("source"),
    payload("suppress"),
    payload("definition"),
];

const NAME_COLUMNS: &[Column] = &[
    bk("cui"),
    bk("name"),
    bk("source"),
    bk("term_type"),
    payload("suppress"),
];

const SEMANTIC_TYPE_COLUMNS: &[Column] = &[
    bk("cui"),
    bk("sty"),
    payload("tui"),
    payload("atui"),
];

const RELATIONSHIP_COLUMNS: &[Column] = &[
    bk("cui1"),
    bk("relationship"),
    bk("cui2"),
    bk("source"),
    payload("rela"),
];

const SOURCE_LINK_COLUMNS: &[Column] = &[
    bk("cui"),
    bk("source"),
    bk("source_id"),
    payload("pref_name"),
];

const DEFINITION_COLUMNS: &[Column] = &[
    bk("cui"),
    bk("source"),
    payload("definition"),
    payload("suppress"),
];

impl Dataset {
    /// Lowercase dataset name, used for table names and audit rows.
    pub fn name(&self) -> &'static str {
        match self {
            Dataset::Concepts => "concepts",
            Dataset::Names => "names",
            Dataset::SemanticTypes => "semantic_types",
            Dataset::Relationships => "relationships",
            Dataset::SourceLinks => "source_links",
            Dataset::Definitions => "definitions",
        }
    }

    /// Production table name. Identical to [`Dataset::name`], kept separate
    /// so a future schema qualifier has one place to go.
    pub fn table(&self) -> &'static str {
        self.name()
    }

    /// The published MedGen file this dataset is parsed from.
    pub fn source_file(&self) -> &'static str {
        match self {
            Dataset::Concepts => "NAMES.RRF",
            Dataset::Names => "MGCONSO.RRF",
            Dataset::SemanticTypes => "MGSTY.RRF",
            Dataset::Relationships => "MGREL.RRF",
            Dataset::SourceLinks => "MedGenIDMappings.txt",
            Dataset::Definitions => "MGDEF.RRF",
        }
    }

    /// Domain columns in staging DDL order (excluding `raw_record` and the
    /// production bookkeeping columns).
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Dataset::Concepts => CONCEPT_COLUMNS,
            Dataset::Names => NAME_COLUMNS,
            Dataset::SemanticTypes => SEMANTIC_TYPE_COLUMNS,
            Dataset::Relationships => RELATIONSHIP_COLUMNS,
            Dataset::SourceLinks => SOURCE_LINK_COLUMNS,
            Dataset::Definitions => DEFINITION_COLUMNS,
        }
    }

    /// Business-key column names, in declaration order.
    pub fn business_key(&self) -> Vec<&'static str> {
        self.columns()
            .iter()
            .filter(|c| c.business_key)
            .map(|c| c.name)
            .collect()
    }

    /// Non-key domain column names, in declaration order.
    pub fn payload_columns(&self) -> Vec<&'static str> {
        self.columns()
            .iter()
            .filter(|c| !c.business_key)
            .map(|c| c.name)
            .collect()
    }

    /// Parse a dataset name as it appears on the CLI or in audit rows.
    pub fn from_name(name: &str) -> Result<Dataset, MirrorError> {
        ALL_DATASETS
            .iter()
            .copied()
            .find(|d| d.name() == name)
            .ok_or_else(|| MirrorError::Config(format!("unknown dataset: {name}")))
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_order_starts_with_concepts() {
        assert_eq!(ALL_DATASETS[0], Dataset::Concepts);
    }

    #[test]
    fn test_business_keys_match_contract() {
        assert_eq!(Dataset::Concepts.business_key(), vec!["cui"]);
        assert_eq!(
            Dataset::Names.business_key(),
            vec!["cui", "name", "source", "term_type"]
        );
        assert_eq!(Dataset::SemanticTypes.business_key(), vec!["cui", "sty"]);
        assert_eq!(
            Dataset::Relationships.business_key(),
            vec!["cui1", "relationship", "cui2", "source"]
        );
        assert_eq!(
            Dataset::SourceLinks.business_key(),
            vec!["cui", "source", "source_id"]
        );
        assert_eq!(Dataset::Definitions.business_key(), vec!["cui", "source"]);
    }

    #[test]
    fn test_every_dataset_has_payload() {
        // The CDC row hash needs at least one non-key column per dataset.
        for ds in ALL_DATASETS {
            assert!(
                !ds.payload_columns().is_empty(),
                "{ds} has no payload columns"
            );
        }
    }

    #[test]
    fn test_from_name_round_trip() {
        for ds in ALL_DATASETS {
            assert_eq!(Dataset::from_name(ds.name()).unwrap(), ds);
        }
        assert!(Dataset::from_name("genes").is_err());
    }

    #[test]
    fn test_source_files_are_distinct() {
        let mut files: Vec<_> = ALL_DATASETS.iter().map(|d| d.source_file()).collect();
        files.sort_unstable();
        files.dedup();
        assert_eq!(files.len(), ALL_DATASETS.len());
    }

    #[test]
    fn test_column_order_is_keys_then_stable() {
        // Staging DDL, COPY column lists, and the encoder all iterate
        // columns() directly; a reorder here is a wire-format change.
        let cols: Vec<_> = Dataset::Concepts.columns().iter().map(|c| c.name).collect();
        assert_eq!(
            cols,
            vec!["cui", "preferred_name", "source", "suppress", "definition"]
        );
    }
}
