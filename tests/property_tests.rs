//! Property tests for the COPY text encoding.
//!
//! The escaping must be reversible (what the server reconstructs equals the
//! original field) and must never leak a raw delimiter, newline, or
//! carriage return into the wire format.

use proptest::prelude::*;

use medgen_mirror::dataset::Dataset;
use medgen_mirror::encoder::{NULL_SENTINEL, encode_row, escape_field};
use medgen_mirror::record::MedgenRecord;

/// Inverse of `escape_field`, as the COPY text reader would apply it.
fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('t') => out.push('\t'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }
    out
}

proptest! {
    #[test]
    fn escape_round_trips(value in "\\PC*") {
        let mut escaped = String::new();
        escape_field(&mut escaped, &value);
        prop_assert_eq!(unescape(&escaped), value);
    }

    #[test]
    fn escaped_fields_contain_no_raw_separators(value in "\\PC*") {
        let mut escaped = String::new();
        escape_field(&mut escaped, &value);
        prop_assert!(!escaped.contains('\t'));
        prop_assert!(!escaped.contains('\n'));
        prop_assert!(!escaped.contains('\r'));
    }

    #[test]
    fn escaping_is_identity_on_plain_text(value in "[a-zA-Z0-9 .,;|-]*") {
        let mut escaped = String::new();
        escape_field(&mut escaped, &value);
        prop_assert_eq!(escaped, value);
    }

    #[test]
    fn encoded_rows_have_fixed_column_count(
        name in "[a-zA-Z0-9 \\t\\\\-]{1,40}",
        source in "[A-Z]{1,8}",
    ) {
        let line = format!("C0001|{}|{}|N|", name.replace('|', " "), source);
        let rec = MedgenRecord::parse(Dataset::Concepts, &line).unwrap();
        let row = encode_row(&rec, true);
        let text = std::str::from_utf8(&row).unwrap();
        prop_assert!(text.ends_with('\n'));
        let body = &text[..text.len() - 1];
        // Raw tabs are escaped, so the remaining tabs are exactly the
        // column separators.
        let columns = body.split('\t').count();
        prop_assert_eq!(columns, Dataset::Concepts.columns().len() + 1);
    }

    #[test]
    fn raw_record_round_trips_byte_for_byte(
        name in "[a-zA-Z0-9 \\\\-]{1,40}",
    ) {
        let line = format!("C0001|{name}|GTR|N|");
        let rec = MedgenRecord::parse(Dataset::Concepts, &line).unwrap();
        let row = encode_row(&rec, true);
        let text = std::str::from_utf8(&row).unwrap();
        let body = text.strip_suffix('\n').unwrap();
        let raw_col = body.split('\t').next_back().unwrap();
        prop_assert_ne!(raw_col, NULL_SENTINEL);
        prop_assert_eq!(unescape(raw_col), line);
    }
}
