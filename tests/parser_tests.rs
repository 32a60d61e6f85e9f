//! Parser fixtures for every dataset file, written to temp directories the
//! way a downloaded snapshot would look on disk.

use std::fs::File;
use std::io::Write;

use tempfile::TempDir;

use medgen_mirror::dataset::{ALL_DATASETS, Dataset};
use medgen_mirror::error::MirrorError;
use medgen_mirror::parser::open_dataset;
use medgen_mirror::record::MedgenRow;

fn snapshot(files: &[(&str, &[&str])]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, lines) in files {
        let mut f = File::create(dir.path().join(name)).unwrap();
        for line in *lines {
            writeln!(f, "{line}").unwrap();
        }
    }
    dir
}

#[test]
fn every_dataset_parses_a_realistic_snapshot() {
    let dir = snapshot(&[
        (
            "NAMES.RRF",
            &[
                "#CUI|name|source|SUPPRESS|",
                "C0001|Hepatic neoplasm|GTR|N|",
                "C0002|Melanoma|GTR|N|",
            ],
        ),
        (
            "MGCONSO.RRF",
            &[
                "#CUI|TS|STT|ISPREF|AUI|SAUI|SCUI|SDUI|SAB|TTY|CODE|STR|SUPPRESS|",
                "C0001|P|PF|Y|A001|||D0001|MSH|PT|D0001|Hepatic neoplasm|N|",
                "C0001|S|VO|N|A002|||D0001|MSH|SY|D0001|Liver neoplasm|N|",
            ],
        ),
        (
            "MGSTY.RRF",
            &[
                "#CUI|TUI|STY|ATUI|",
                "C0001|T191|Neoplastic Process|AT001|",
            ],
        ),
        (
            "MGREL.RRF",
            &[
                "#CUI1|AUI1|STYPE1|REL|RELA|CUI2|AUI2|STYPE2|SAB|SL|SUPPRESS|",
                "C0001|A001|SCUI|RB|inverse_isa|C0002|A002|SCUI|MSH|N|N|",
            ],
        ),
        (
            "MedGenIDMappings.txt",
            &[
                "#CUI|pref_name|source_id|source|",
                "C0001|Hepatic neoplasm|D008113|MeSH|",
            ],
        ),
        (
            "MGDEF.RRF",
            &[
                "#CUI|DEF|source|SUPPRESS|",
                "C0001|A tumor of the liver.|MSH|N|",
            ],
        ),
    ]);

    let expected_rows = [2usize, 2, 1, 1, 1, 1];
    for (ds, expected) in ALL_DATASETS.iter().zip(expected_rows) {
        let stream = open_dataset(*ds, dir.path(), 0).unwrap();
        let records: Vec<_> = stream.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), expected, "row count for {ds}");
        for rec in &records {
            assert_eq!(rec.dataset(), *ds);
            assert_eq!(rec.fields().len(), ds.columns().len());
        }
    }
}

#[test]
fn raw_lines_are_preserved_byte_for_byte() {
    let line = "C0001|A definition with  double spaces & symbols <>|MSH|N|";
    let dir = snapshot(&[("MGDEF.RRF", &[line])]);
    let mut stream = open_dataset(Dataset::Definitions, dir.path(), 0).unwrap();
    let rec = stream.next().unwrap().unwrap();
    assert_eq!(rec.raw, line);
}

#[test]
fn relationship_fields_map_to_business_key() {
    let dir = snapshot(&[(
        "MGREL.RRF",
        &["C0001|A001|SCUI|RB|inverse_isa|C0002|A002|SCUI|MSH|N|N|"],
    )]);
    let mut stream = open_dataset(Dataset::Relationships, dir.path(), 0).unwrap();
    let rec = stream.next().unwrap().unwrap();
    match &rec.row {
        MedgenRow::Relationship(r) => {
            assert_eq!(r.cui1, "C0001");
            assert_eq!(r.relationship, "RB");
            assert_eq!(r.cui2, "C0002");
            assert_eq!(r.source, "MSH");
            assert_eq!(r.rela.as_deref(), Some("inverse_isa"));
        }
        other => panic!("wrong row: {other:?}"),
    }
}

#[test]
fn source_link_columns_follow_id_mappings_layout() {
    let dir = snapshot(&[(
        "MedGenIDMappings.txt",
        &["C0001|Hepatic neoplasm|D008113|MeSH|"],
    )]);
    let mut stream = open_dataset(Dataset::SourceLinks, dir.path(), 0).unwrap();
    let rec = stream.next().unwrap().unwrap();
    match &rec.row {
        MedgenRow::SourceLink(l) => {
            assert_eq!(l.source, "MeSH");
            assert_eq!(l.source_id, "D008113");
            assert_eq!(l.pref_name.as_deref(), Some("Hepatic neoplasm"));
        }
        other => panic!("wrong row: {other:?}"),
    }
}

#[test]
fn header_is_only_skipped_on_first_line() {
    // A '#' line later in the file has the wrong column count and counts
    // against the parse budget instead of being silently dropped.
    let dir = snapshot(&[(
        "NAMES.RRF",
        &["C0001|Neoplasm|GTR|N|", "#CUI|name|source|SUPPRESS|"],
    )]);
    let mut stream = open_dataset(Dataset::Concepts, dir.path(), 5).unwrap();
    let records: Vec<_> = stream.by_ref().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    match &records[1].row {
        MedgenRow::Concept(c) => assert_eq!(c.cui, "#CUI"),
        other => panic!("wrong row: {other:?}"),
    }
}

#[test]
fn exhausted_budget_is_a_data_error_with_context() {
    let dir = snapshot(&[(
        "NAMES.RRF",
        &["bad-line", "another bad line", "C0001|Neoplasm|GTR|N|"],
    )]);
    let stream = open_dataset(Dataset::Concepts, dir.path(), 1).unwrap();
    let err = stream
        .filter_map(|r| r.err())
        .next()
        .expect("budget of 1 with 2 bad lines must fail");
    match err {
        MirrorError::Data(msg) => {
            assert!(msg.contains("NAMES.RRF"));
            assert!(msg.contains("tolerance of 1"));
        }
        other => panic!("expected data error, got {other:?}"),
    }
}
