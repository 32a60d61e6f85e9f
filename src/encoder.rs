//! Record encoder — COPY `FORMAT text` wire encoding (C1).
//!
//! Turns a stream of typed records into the byte rows PostgreSQL's
//! `COPY ... FROM STDIN (FORMAT text)` expects: tab-separated fields,
//! `\N` for NULL, backslash escapes for the delimiter, backslashes, and
//! line endings, one LF-terminated line per row. The `raw_record` column is
//! emitted last, after the domain columns.
//!
//! Encoding is purely transformational: no I/O, no buffering beyond the row
//! being assembled. A column-count mismatch between a record and its
//! dataset's catalog entry is an internal invariant violation and panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::error::MirrorError;
use crate::record::MedgenRecord;

/// The NULL sentinel of the COPY text format.
pub const NULL_SENTINEL: &str = "\\N";

/// Escape one field value into `out` per the COPY text rules.
///
/// Backslash, tab, LF, and CR become two-character backslash sequences;
/// everything else passes through. This keeps embedded newlines escaped,
/// never literal.
pub fn escape_field(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}

/// Encode one record into a COPY text row, domain columns first and the
/// raw source line (or NULL when capture is off) last.
pub fn encode_row(record: &MedgenRecord, capture_raw: bool) -> Bytes {
    let fields = record.fields();
    let expected = record.dataset().columns().len();
    assert_eq!(
        fields.len(),
        expected,
        "record for {} produced {} fields, catalog declares {}",
        record.dataset(),
        fields.len(),
        expected,
    );

    let mut row = String::with_capacity(record.raw.len() * 2 + 16);
    for field in fields {
        match field {
            Some(value) => escape_field(&mut row, value),
            None => row.push_str(NULL_SENTINEL),
        }
        row.push('\t');
    }
    if capture_raw {
        escape_field(&mut row, &record.raw);
    } else {
        row.push_str(NULL_SENTINEL);
    }
    row.push('\n');
    Bytes::from(row.into_bytes())
}

/// Shared row/byte counters threaded through an [`EncodedRows`] stream so
/// the orchestrator can report audit metrics after the driver has consumed
/// the iterator.
#[derive(Debug, Clone, Default)]
pub struct StreamCounters {
    rows: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
}

impl StreamCounters {
    pub fn rows(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Adapter from a record stream to encoded COPY rows, counting as it goes.
pub struct EncodedRows<I> {
    records: I,
    capture_raw: bool,
    counters: StreamCounters,
}

impl<I> EncodedRows<I>
where
    I: Iterator<Item = Result<MedgenRecord, MirrorError>>,
{
    pub fn new(records: I, capture_raw: bool) -> (Self, StreamCounters) {
        let counters = StreamCounters::default();
        (
            EncodedRows {
                records,
                capture_raw,
                counters: counters.clone(),
            },
            counters,
        )
    }
}

impl<I> Iterator for EncodedRows<I>
where
    I: Iterator<Item = Result<MedgenRecord, MirrorError>>,
{
    type Item = Result<Bytes, MirrorError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.records.next()? {
            Ok(record) => {
                let row = encode_row(&record, self.capture_raw);
                self.counters.rows.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes
                    .fetch_add(row.len() as u64, Ordering::Relaxed);
                Some(Ok(row))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
