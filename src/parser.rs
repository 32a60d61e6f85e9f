//! Lazy parsers for the pipe-delimited MedGen distribution files.
//!
//! [`RecordStream`] reads one source file line by line and yields typed
//! [`MedgenRecord`]s. Header lines (leading `#`) are skipped. Malformed
//! lines are counted against the configured budget: each one is logged and
//! skipped, and once the budget is exhausted the stream yields a terminal
//! data error so the run aborts before any apply.
//!
//! While streaming, the raw bytes of every line are folded into a SHA-256
//! digest that is reported when the file is exhausted, giving operators a
//! cheap way to tie a run to a snapshot.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::error::MirrorError;
use crate::record::MedgenRecord;

/// Open the source file for `dataset` under the snapshot directory.
pub fn open_dataset(
    dataset: Dataset,
    data_dir: &Path,
    max_parse_errors: u64,
) -> Result<RecordStream, MirrorError> {
    let path = data_dir.join(dataset.source_file());
    let file = File::open(&path).map_err(|e| {
        MirrorError::Load(format!(
            "cannot open source file {} for {dataset}: {e}",
            path.display()
        ))
    })?;
    Ok(RecordStream {
        dataset,
        path,
        lines: BufReader::new(file).lines(),
        digest: Some(Sha256::new()),
        line_no: 0,
        parse_errors: 0,
        max_parse_errors,
        done: false,
    })
}

/// Lazy iterator of parsed records for one dataset file.
#[derive(Debug)]
pub struct RecordStream {
    dataset: Dataset,
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    digest: Option<Sha256>,
    line_no: u64,
    parse_errors: u64,
    max_parse_errors: u64,
    done: bool,
}

impl RecordStream {
    /// Malformed lines seen so far.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors
    }

    fn finish(&mut self) {
        if let Some(digest) = self.digest.take() {
            info!(
                dataset = %self.dataset,
                file = %self.path.display(),
                lines = self.line_no,
                skipped = self.parse_errors,
                sha256 = %hex_digest(digest),
                "source file exhausted"
            );
        }
    }
}

fn hex_digest(digest: Sha256) -> String {
    format!("{:x}", digest.finalize())
}

impl Iterator for RecordStream {
    type Item = Result<MedgenRecord, MirrorError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.lines.next() {
                None => {
                    self.done = true;
                    self.finish();
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(MirrorError::Load(format!(
                        "i/o error reading {}: {e}",
                        self.path.display()
                    ))));
                }
                Some(Ok(line)) => line,
            };
            self.line_no += 1;
            if let Some(digest) = self.digest.as_mut() {
                digest.update(line.as_bytes());
                digest.update(b"\n");
            }

            if self.line_no == 1 && line.starts_with('#') {
                continue;
            }
            if line.is_empty() {
                continue;
            }

            match MedgenRecord::parse(self.dataset, &line) {
                Ok(rec) => return Some(Ok(rec)),
                Err(e) => {
                    self.parse_errors += 1;
                    warn!(
                        dataset = %self.dataset,
                        line = self.line_no,
                        error = %e,
                        "skipping malformed line"
                    );
                    if self.parse_errors > self.max_parse_errors {
                        self.done = true;
                        return Some(Err(MirrorError::Data(format!(
                            "{}: {} malformed lines exceed the tolerance of {} (last: line {}: {e})",
                            self.path.display(),
                            self.parse_errors,
                            self.max_parse_errors,
                            self.line_no,
                        ))));
                    }
                }
            }
        }
    }
}
