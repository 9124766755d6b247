//! CSV logs: the size-ranked catalog and the append-only download log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};

use tracing::warn;

use crate::domain::{DownloadRecord, FileDescriptor};
use crate::error::PdcError;

pub const DOWNLOAD_LOG_HEADER: [&str; 8] = [
    "study_id",
    "pdc_study_id",
    "file_id",
    "file_name",
    "file_size",
    "md5sum",
    "generated_md5sum",
    "download_url",
];

pub const CATALOG_HEADER: [&str; 7] = [
    "study_id",
    "pdc_study_id",
    "file_id",
    "file_name",
    "file_size",
    "md5sum",
    "signedUrl",
];

/// Storage behind a [`DownloadLog`].
pub trait LogTarget: Send {
    /// Current length in bytes; an append starts here.
    fn end_offset(&mut self) -> io::Result<u64>;
    /// Writes `bytes` at the end and syncs them to disk.
    fn write_durable(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Cuts the target back to `len` bytes and positions writes there.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogTarget for File {
    fn end_offset(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn write_durable(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.sync_data()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        self.sync_data()
    }
}

/// Shared append-only log of completed downloads.
///
/// Every append holds the lock until the row is written and synced, so rows
/// never interleave and a crash after N appends leaves N complete rows. A
/// failed append is rolled back and leaves no trace in the log.
pub struct DownloadLog {
    path: Utf8PathBuf,
    target: Mutex<Box<dyn LogTarget>>,
    rows: AtomicUsize,
}

impl DownloadLog {
    /// Creates (or truncates) the log and writes the header.
    pub fn create(path: &Utf8Path) -> Result<Self, PdcError> {
        ensure_parent(path)?;
        let mut file = File::create(path.as_std_path())
            .map_err(|err| PdcError::Filesystem(format!("create {path}: {err}")))?;
        let header = encode_row(|writer| writer.write_record(DOWNLOAD_LOG_HEADER))?;
        file.write_durable(&header)
            .map_err(|err| PdcError::Filesystem(format!("write {path}: {err}")))?;
        Ok(Self::with_target(path, Box::new(file)))
    }

    /// Opens an existing log for appending; the header is not rewritten.
    pub fn open_append(path: &Utf8Path) -> Result<Self, PdcError> {
        let file = OpenOptions::new()
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| PdcError::Filesystem(format!("open {path}: {err}")))?;
        Ok(Self::with_target(path, Box::new(file)))
    }

    /// Appends rows to `target`, reporting `path` in errors.
    pub fn with_target(path: &Utf8Path, target: Box<dyn LogTarget>) -> Self {
        Self {
            path: path.to_owned(),
            target: Mutex::new(target),
            rows: AtomicUsize::new(0),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Rows appended through this handle.
    pub fn rows_written(&self) -> usize {
        self.rows.load(Ordering::Acquire)
    }

    pub fn append(&self, record: &DownloadRecord) -> Result<(), PdcError> {
        let row = encode_row(|writer| writer.serialize(record))?;
        let mut target = self
            .target
            .lock()
            .map_err(|_| PdcError::Filesystem(format!("download log {} poisoned", self.path)))?;
        let start = target
            .end_offset()
            .map_err(|err| PdcError::Filesystem(format!("stat {}: {err}", self.path)))?;
        if let Err(err) = target.write_durable(&row) {
            if let Err(rollback) = target.truncate_to(start) {
                warn!(path = %self.path, "Failed to roll back partial log row: {rollback}");
            }
            return Err(PdcError::Filesystem(format!(
                "append to {}: {err}",
                self.path
            )));
        }
        self.rows.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Renders one CSV record into an owned buffer.
fn encode_row(
    write: impl FnOnce(&mut csv::Writer<Vec<u8>>) -> Result<(), csv::Error>,
) -> Result<Vec<u8>, PdcError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    write(&mut writer)?;
    writer
        .into_inner()
        .map_err(|err| PdcError::Csv(err.to_string()))
}

/// Writes the catalog CSV through a temp file in the same directory, so a
/// reader never sees a half-written catalog.
pub fn write_catalog(path: &Utf8Path, files: &[FileDescriptor]) -> Result<(), PdcError> {
    let parent = ensure_parent(path)?;
    let temp = tempfile::Builder::new()
        .prefix("kira-pdc-catalog")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| PdcError::Filesystem(err.to_string()))?;
    {
        let mut writer = csv::Writer::from_writer(temp.as_file());
        if files.is_empty() {
            writer.write_record(CATALOG_HEADER)?;
        }
        for file in files {
            writer.serialize(file)?;
        }
        writer
            .flush()
            .map_err(|err| PdcError::Filesystem(err.to_string()))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| PdcError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| PdcError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

pub fn read_catalog(path: &Utf8Path) -> Result<Vec<FileDescriptor>, PdcError> {
    read_rows(path)
}

pub fn read_download_log(path: &Utf8Path) -> Result<Vec<DownloadRecord>, PdcError> {
    read_rows(path)
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Utf8Path) -> Result<Vec<T>, PdcError> {
    let mut reader = csv::Reader::from_path(path.as_std_path())?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(PdcError::from)
}

fn ensure_parent(path: &Utf8Path) -> Result<Utf8PathBuf, PdcError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_owned(),
        _ => Utf8PathBuf::from("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| PdcError::Filesystem(format!("create {parent}: {err}")))?;
    Ok(parent)
}
