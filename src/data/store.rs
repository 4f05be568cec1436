use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::types::Record;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read corpus {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Immutable snapshot of the corpus as read at one instant.
#[derive(Debug, Clone, Default)]
pub struct CorpusSnapshot {
    pub records: Vec<Record>,
    /// Non-blank lines that were not a JSON object with a string `source`.
    pub skipped: usize,
}

impl CorpusSnapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read a line-delimited JSON corpus from disk.
pub fn read_corpus(path: impl AsRef<Path>) -> Result<CorpusSnapshot, CorpusError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => CorpusError::NotFound(path.to_path_buf()),
        _ => CorpusError::Io {
            path: path.to_path_buf(),
            source: e,
        },
    })?;

    let snapshot = parse_lines(BufReader::new(file)).map_err(|source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        "Loaded {} records from {} ({} malformed lines skipped)",
        snapshot.records.len(),
        path.display(),
        snapshot.skipped
    );
    Ok(snapshot)
}

/// Parse each line independently. Lines are split on raw bytes so invalid
/// UTF-8 or a torn trailing write only costs that one line.
pub fn parse_lines<R: BufRead>(reader: R) -> io::Result<CorpusSnapshot> {
    let mut snapshot = CorpusSnapshot::default();

    for (index, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let line = line.strip_suffix(b"\r").unwrap_or(&line);

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<Record>(line) {
            Ok(record) => snapshot.records.push(record),
            Err(e) => {
                debug!("Skipping corpus line {}: {}", index + 1, e);
                snapshot.skipped += 1;
            }
        }
    }

    if snapshot.skipped > 0 {
        warn!("{} corpus lines could not be parsed", snapshot.skipped);
    }

    Ok(snapshot)
}
