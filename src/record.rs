//! Typed records parsed from the MedGen distribution files.
//!
//! Each variant of [`MedgenRecord`] corresponds to one dataset and carries
//! the original unparsed line. `fields()` returns the staging column values
//! in exactly the order declared by [`Dataset::columns`]; the encoder
//! relies on that ordering for the COPY wire format.

use crate::dataset::Dataset;

/// Reason a single source line could not be turned into a record.
///
/// Line-level failures are tolerated up to the configured budget; they are
/// counted by the parser rather than aborting the stream immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineError {
    ColumnCount { expected: usize, got: usize },
    EmptyKeyField { column: &'static str },
}

impl std::fmt::Display for LineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineError::ColumnCount { expected, got } => {
                write!(f, "expected {expected} columns, got {got}")
            }
            LineError::EmptyKeyField { column } => {
                write!(f, "business-key column {column} is empty")
            }
        }
    }
}

/// A row from `NAMES.RRF`: `CUI|name|source|SUPPRESS|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    pub cui: String,
    pub preferred_name: String,
    pub source: Option<String>,
    pub suppress: Option<String>,
}

/// A row from `MGCONSO.RRF` (one synonym/term variant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConceptName {
    pub cui: String,
    pub name: String,
    pub source: String,
    pub term_type: String,
    pub suppress: Option<String>,
}

/// A row from `MGSTY.RRF`: `CUI|TUI|STY|ATUI|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticType {
    pub cui: String,
    pub sty: String,
    pub tui: Option<String>,
    pub atui: Option<String>,
}

/// A row from `MGREL.RRF`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub cui1: String,
    pub relationship: String,
    pub cui2: String,
    pub source: String,
    pub rela: Option<String>,
}

/// A row from `MedGenIDMappings.txt`: `CUI|pref_name|source_id|source|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub cui: String,
    pub source: String,
    pub source_id: String,
    pub pref_name: Option<String>,
}

/// A row from `MGDEF.RRF`: `CUI|DEF|source|SUPPRESS|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub cui: String,
    pub source: String,
    pub definition: Option<String>,
    pub suppress: Option<String>,
}

/// One parsed record plus its original source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MedgenRecord {
    pub row: MedgenRow,
    /// The source line exactly as read, without the trailing newline.
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MedgenRow {
    Concept(Concept),
    Name(ConceptName),
    SemanticType(SemanticType),
    Relationship(Relationship),
    SourceLink(SourceLink),
    Definition(Definition),
}

/// Split a pipe-delimited line into fields, tolerating one trailing `|`.
fn split_fields(line: &str) -> Vec<&str> {
    let trimmed = line.strip_suffix('|').unwrap_or(line);
    trimmed.split('|').collect()
}

fn opt(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

fn req(field: &str, column: &'static str) -> Result<String, LineError> {
    if field.is_empty() {
        Err(LineError::EmptyKeyField { column })
    } else {
        Ok(field.to_string())
    }
}

fn expect_columns(fields: &[&str], expected: usize) -> Result<(), LineError> {
    if fields.len() == expected {
        Ok(())
    } else {
        Err(LineError::ColumnCount {
            expected,
            got: fields.len(),
        })
    }
}

impl MedgenRecord {
    /// Parse one source line for the given dataset.
    pub fn parse(dataset: Dataset, line: &str) -> Result<MedgenRecord, LineError> {
        let f = split_fields(line);
        let row = match dataset {
            Dataset::Concepts => {
                expect_columns(&f, 4)?;
                MedgenRow::Concept(Concept {
                    cui: req(f[0], "cui")?,
                    preferred_name: req(f[1], "preferred_name")?,
                    source: opt(f[2]),
                    suppress: opt(f[3]),
                })
            }
            Dataset::Names => {
                expect_columns(&f, 13)?;
                MedgenRow::Name(ConceptName {
                    cui: req(f[0], "cui")?,
                    name: req(f[11], "name")?,
                    source: req(f[8], "source")?,
                    term_type: req(f[9], "term_type")?,
                    suppress: opt(f[12]),
                })
            }
            Dataset::SemanticTypes => {
                expect_columns(&f, 4)?;
                MedgenRow::SemanticType(SemanticType {
                    cui: req(f[0], "cui")?,
                    sty: req(f[2], "sty")?,
                    tui: opt(f[1]),
                    atui: opt(f[3]),
                })
            }
            Dataset::Relationships => {
                expect_columns(&f, 11)?;
                MedgenRow::Relationship(Relationship {
                    cui1: req(f[0], "cui1")?,
                    relationship: req(f[3], "relationship")?,
                    cui2: req(f[5], "cui2")?,
                    source: req(f[8], "source")?,
                    rela: opt(f[4]),
                })
            }
            Dataset::SourceLinks => {
                expect_columns(&f, 4)?;
                MedgenRow::SourceLink(SourceLink {
                    cui: req(f[0], "cui")?,
                    source: req(f[3], "source")?,
                    source_id: req(f[2], "source_id")?,
                    pref_name: opt(f[1]),
                })
            }
            Dataset::Definitions => {
                expect_columns(&f, 4)?;
                MedgenRow::Definition(Definition {
                    cui: req(f[0], "cui")?,
                    source: req(f[2], "source")?,
                    definition: opt(f[1]),
                    suppress: opt(f[3]),
                })
            }
        };
        Ok(MedgenRecord {
            row,
            raw: line.to_string(),
        })
    }

    /// The dataset this record belongs to.
    pub fn dataset(&self) -> Dataset {
        match self.row {
            MedgenRow::Concept(_) => Dataset::Concepts,
            MedgenRow::Name(_) => Dataset::Names,
            MedgenRow::SemanticType(_) => Dataset::SemanticTypes,
            MedgenRow::Relationship(_) => Dataset::Relationships,
            MedgenRow::SourceLink(_) => Dataset::SourceLinks,
            MedgenRow::Definition(_) => Dataset::Definitions,
        }
    }

    /// Staging column values in [`Dataset::columns`] order.
    pub fn fields(&self) -> Vec<Option<&str>> {
        match &self.row {
            MedgenRow::Concept(c) => vec![
                Some(c.cui.as_str()),
                Some(c.preferred_name.as_str()),
                c.source.as_deref(),
                c.suppress.as_deref(),
                None, // definition: not carried by NAMES.RRF
            ],
            MedgenRow::Name(n) => vec![
                Some(n.cui.as_str()),
                Some(n.name.as_str()),
                Some(n.source.as_str()),
                Some(n.term_type.as_str()),
                n.suppress.as_deref(),
            ],
            MedgenRow::SemanticType(s) => vec![
                Some(s.cui.as_str()),
                Some(s.sty.as_str()),
                s.tui.as_deref(),
                s.atui.as_deref(),
            ],
            MedgenRow::Relationship(r) => vec![
                Some(r.cui1.as_str()),
                Some(r.relationship.as_str()),
                Some(r.cui2.as_str()),
                Some(r.source.as_str()),
                r.rela.as_deref(),
            ],
            MedgenRow::SourceLink(l) => vec![
                Some(l.cui.as_str()),
                Some(l.source.as_str()),
                Some(l.source_id.as_str()),
                l.pref_name.as_deref(),
            ],
            MedgenRow::Definition(d) => vec![
                Some(d.cui.as_str()),
                Some(d.source.as_str()),
                d.definition.as_deref(),
                d.suppress.as_deref(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_concept_line() {
        let rec = MedgenRecord::parse(Dataset::Concepts, "C0001|Neoplasm|GTR|N|").unwrap();
        match &rec.row {
            MedgenRow::Concept(c) => {
                assert_eq!(c.cui, "C0001");
                assert_eq!(c.preferred_name, "Neoplasm");
                assert_eq!(c.source.as_deref(), Some("GTR"));
                assert_eq!(c.suppress.as_deref(), Some("N"));
            }
            other => panic!("wrong row: {other:?}"),
        }
        assert_eq!(rec.raw, "C0001|Neoplasm|GTR|N|");
    }

    #[test]
    fn test_parse_tolerates_missing_trailing_pipe() {
        let rec = MedgenRecord::parse(Dataset::Concepts, "C0001|Neoplasm|GTR|N").unwrap();
        assert_eq!(rec.fields()[0], Some("C0001"));
    }

    #[test]
    fn test_parse_name_line_picks_sab_tty_str() {
        let line = "C0001|P|PF|Y|A001|||S001|MSH|PT|D0001|Neoplasm of liver|N|";
        let rec = MedgenRecord::parse(Dataset::Names, line).unwrap();
        match &rec.row {
            MedgenRow::Name(n) => {
                assert_eq!(n.name, "Neoplasm of liver");
                assert_eq!(n.source, "MSH");
                assert_eq!(n.term_type, "PT");
            }
            other => panic!("wrong row: {other:?}"),
        }
    }

    #[test]
    fn test_parse_wrong_column_count() {
        let err = MedgenRecord::parse(Dataset::Concepts, "C0001|Neoplasm|").unwrap_err();
        assert_eq!(
            err,
            LineError::ColumnCount {
                expected: 4,
                got: 2
            }
        );
    }

    #[test]
    fn test_parse_empty_business_key() {
        let err = MedgenRecord::parse(Dataset::Concepts, "|Neoplasm|GTR|N|").unwrap_err();
        assert_eq!(err, LineError::EmptyKeyField { column: "cui" });
    }

    #[test]
    fn test_empty_payload_becomes_none() {
        let rec = MedgenRecord::parse(Dataset::Definitions, "C0001||MSH|N|").unwrap();
        match &rec.row {
            MedgenRow::Definition(d) => assert_eq!(d.definition, None),
            other => panic!("wrong row: {other:?}"),
        }
    }

    #[test]
    fn test_fields_match_catalog_arity() {
        let samples = [
            (Dataset::Concepts, "C0001|Neoplasm|GTR|N|"),
            (
                Dataset::Names,
                "C0001|P|PF|Y|A001|||S001|MSH|PT|D0001|Neoplasm|N|",
            ),
            (Dataset::SemanticTypes, "C0001|T191|Neoplastic Process|AT01|"),
            (Dataset::Relationships, "C0001|A1|SCUI|RB|inverse_isa|C0002|A2|SCUI|MSH|N|N|"),
            (Dataset::SourceLinks, "C0001|Neoplasm|D0001|MeSH|"),
            (Dataset::Definitions, "C0001|A malignant growth.|MSH|N|"),
        ];
        for (ds, line) in samples {
            let rec = MedgenRecord::parse(ds, line).unwrap();
            assert_eq!(rec.dataset(), ds);
            assert_eq!(
                rec.fields().len(),
                ds.columns().len(),
                "field arity mismatch for {ds}"
            );
            // Business-key positions must be present.
            for (col, val) in ds.columns().iter().zip(rec.fields()) {
                if col.business_key {
                    assert!(val.is_some(), "{ds}: key column {} missing", col.name);
                }
            }
        }
    }
}
