//! Corpus archive: one `{"text": ..., "meta": {...}}` JSON object per line,
//! gzip-compressed.
//!
//! Records stream into a `.part` file in the data directory. Committing
//! finishes the gzip stream and renames it to `data_<timestamp>.jsonl.gz`;
//! only files with that extension are complete archives.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use nauka_core::{ArchiveError, ArchiveSink, DocumentStats};

#[derive(Serialize)]
struct RecordRef<'a> {
    text: &'a str,
    meta: &'a DocumentStats,
}

/// One line of a committed archive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchiveRecord {
    pub text: String,
    pub meta: DocumentStats,
}

/// Append-only gzip JSONL writer implementing [`ArchiveSink`].
pub struct JsonlArchive {
    data_dir: PathBuf,
    part_path: PathBuf,
    writer: Option<GzEncoder<BufWriter<File>>>,
    records: u64,
}

impl JsonlArchive {
    /// Start a new archive chunk in `data_dir`, creating the directory if needed.
    pub fn create(data_dir: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let part_path = data_dir.join(format!("current_chunk_{}.jsonl.gz.part", std::process::id()));
        let file = File::create(&part_path)?;
        tracing::debug!(path = %part_path.display(), "archive chunk opened");

        Ok(Self {
            data_dir,
            part_path,
            writer: Some(GzEncoder::new(BufWriter::new(file), Compression::default())),
            records: 0,
        })
    }

    /// Records added so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    fn committed_path(&self) -> PathBuf {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.data_dir.join(format!("data_{}_{}.jsonl.gz", secs, std::process::id()))
    }
}

impl ArchiveSink for JsonlArchive {
    fn add(&mut self, text: &str, meta: &DocumentStats) -> Result<(), ArchiveError> {
        let writer = self.writer.as_mut().ok_or(ArchiveError::Committed)?;
        serde_json::to_writer(&mut *writer, &RecordRef { text, meta })?;
        writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<PathBuf, ArchiveError> {
        let writer = self.writer.take().ok_or(ArchiveError::Committed)?;
        let file = writer
            .finish()?
            .into_inner()
            .map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        let path = self.committed_path();
        std::fs::rename(&self.part_path, &path)?;
        tracing::info!(path = %path.display(), records = self.records, "archive committed");
        Ok(path)
    }
}

impl Drop for JsonlArchive {
    fn drop(&mut self) {
        // An uncommitted chunk is never a valid archive.
        if self.writer.take().is_some()
            && let Err(e) = std::fs::remove_file(&self.part_path)
        {
            tracing::warn!(path = %self.part_path.display(), error = %e, "failed to remove archive chunk");
        }
    }
}

/// Read every record of a committed archive.
pub fn read_records(path: &Path) -> Result<Vec<ArchiveRecord>, ArchiveError> {
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
