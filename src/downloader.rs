//! Bounded worker pool that downloads, checksums, stores and records files.
//!
//! One task is queued per [`FileDescriptor`]. `concurrency` scoped worker
//! threads pull task indices from a shared queue and run each task to
//! completion: fetch, MD5, claim a target path, write, record. A task failure
//! is captured as a [`TaskOutcome::Failure`] and never reaches sibling tasks.
//! [`Downloader::run`] returns only after every worker has been joined, so the
//! report always accounts for every input descriptor.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::checksum;
use crate::domain::{DownloadRecord, FileDescriptor, FileLabel};
use crate::error::{ErrorKind, PdcError};
use crate::fetcher::FileFetcher;
use crate::paths::{self, ClaimedTarget};
use crate::recorder::DownloadLog;

pub const DEFAULT_CONCURRENCY: usize = 4;

/// What to do when the downloaded bytes do not match the catalog MD5.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityPolicy {
    /// Keep the file and record both digests; the mismatch is logged.
    #[default]
    Record,
    /// Fail the task before anything is written.
    Reject,
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub concurrency: usize,
    pub output_dir: Utf8PathBuf,
    pub integrity: IntegrityPolicy,
}

impl DownloadOptions {
    pub fn new(output_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            output_dir: output_dir.into(),
            integrity: IntegrityPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct TaskFailure {
    pub file_id: String,
    pub pdc_study_id: String,
    pub file_name: String,
    pub error: PdcError,
}

impl TaskFailure {
    fn new(file: &FileDescriptor, error: PdcError) -> Self {
        Self {
            file_id: file.file_id.clone(),
            pdc_study_id: file.pdc_study_id.clone(),
            file_name: file.file_name.clone(),
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn label(&self) -> FileLabel<'_> {
        FileLabel::new(&self.pdc_study_id, &self.file_name)
    }
}

#[derive(Debug)]
pub enum TaskOutcome {
    Success(DownloadRecord),
    Failure(TaskFailure),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub completed: Vec<DownloadRecord>,
    pub failed: Vec<TaskFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Completed downloads whose bytes did not match the catalog digest.
    pub fn mismatched(&self) -> impl Iterator<Item = &DownloadRecord> {
        self.completed
            .iter()
            .filter(|record| !record.checksum_matches())
    }

    pub fn into_result(self) -> Result<Self, PdcError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(PdcError::BatchFailed {
                failed: self.failed.len(),
                total: self.total(),
            })
        }
    }
}

/// Everything a task borrows from the batch.
struct TaskContext<'a, F: FileFetcher> {
    fetcher: &'a F,
    log: &'a DownloadLog,
    options: &'a DownloadOptions,
    sink: &'a dyn ProgressSink,
}

pub struct Downloader<F: FileFetcher> {
    fetcher: F,
    options: DownloadOptions,
}

impl<F: FileFetcher> Downloader<F> {
    pub fn new(fetcher: F, options: DownloadOptions) -> Self {
        Self { fetcher, options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Downloads every descriptor and returns once all tasks have settled.
    ///
    /// Only setup failures (the output directory cannot be created) are
    /// returned as `Err`; per-file failures are collected in the report.
    pub fn run(
        &self,
        files: &[FileDescriptor],
        log: &DownloadLog,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, PdcError> {
        let output_dir = &self.options.output_dir;
        fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| PdcError::Filesystem(format!("create {output_dir}: {err}")))?;

        let total = files.len();
        if total == 0 {
            return Ok(BatchReport::default());
        }

        let workers = self.options.concurrency.clamp(1, total);
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {total} files, {workers} workers"),
            elapsed: None,
        });
        info!(files = total, workers, output_dir = %output_dir, "Starting downloads");

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<usize>();
        for index in 0..total {
            // job_rx is still held here, so the queue cannot be disconnected.
            let _ = job_tx.send(index);
        }
        drop(job_tx);

        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded::<(usize, TaskOutcome)>();
        let ctx = TaskContext {
            fetcher: &self.fetcher,
            log,
            options: &self.options,
            sink,
        };

        let started = Instant::now();
        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let ctx = &ctx;
                scope.spawn(move || {
                    for index in job_rx.iter() {
                        let file = &files[index];
                        debug!(worker, file = %file.label(), "Picked up task");
                        let outcome = run_task_guarded(ctx, file);
                        let _ = outcome_tx.send((index, outcome));
                    }
                });
            }
        });
        drop(outcome_tx);

        let report = collect_outcomes(files, outcome_rx.iter());
        for failure in &report.failed {
            warn!(
                file_id = %failure.file_id,
                file = %failure.label(),
                kind = ?failure.kind(),
                "Download failed: {}",
                failure.error
            );
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Downloads finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; {} downloaded, {} failed",
                report.completed.len(),
                report.failed.len()
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }
}

/// Partitions outcomes after the barrier. A descriptor that produced no
/// outcome is reported as failed rather than dropped.
fn collect_outcomes(
    files: &[FileDescriptor],
    outcomes: impl Iterator<Item = (usize, TaskOutcome)>,
) -> BatchReport {
    let mut settled = vec![false; files.len()];
    let mut report = BatchReport::default();
    for (index, outcome) in outcomes {
        settled[index] = true;
        match outcome {
            TaskOutcome::Success(record) => report.completed.push(record),
            TaskOutcome::Failure(failure) => report.failed.push(failure),
        }
    }
    for (index, _) in settled.iter().enumerate().filter(|(_, done)| !**done) {
        report.failed.push(TaskFailure::new(
            &files[index],
            PdcError::TaskPanicked("task did not report an outcome".to_string()),
        ));
    }
    report
}

fn run_task_guarded<F: FileFetcher>(
    ctx: &TaskContext<'_, F>,
    file: &FileDescriptor,
) -> TaskOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| run_task(ctx, file))) {
        Ok(Ok(record)) => TaskOutcome::Success(record),
        Ok(Err(error)) => TaskOutcome::Failure(TaskFailure::new(file, error)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|value| value.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failure(TaskFailure::new(file, PdcError::TaskPanicked(message)))
        }
    }
}

fn run_task<F: FileFetcher>(
    ctx: &TaskContext<'_, F>,
    file: &FileDescriptor,
) -> Result<DownloadRecord, PdcError> {
    let started = Instant::now();
    let bytes = ctx.fetcher.fetch(&file.download_url)?;
    let generated_md5sum = checksum::md5_hex(&bytes);
    let matches = checksum::digests_match(&file.md5sum, &generated_md5sum);

    if !matches && ctx.options.integrity == IntegrityPolicy::Reject {
        return Err(PdcError::IntegrityMismatch {
            file_id: file.file_id.clone(),
            expected: file.md5sum.clone(),
            actual: generated_md5sum,
        });
    }

    let mut target =
        paths::claim_target(&ctx.options.output_dir, &file.pdc_study_id, &file.file_name)?;
    if let Err(err) = target.write_all(&bytes) {
        return Err(discard_after(target, err));
    }

    let record = DownloadRecord::new(file, generated_md5sum, target.path().to_owned());
    if let Err(err) = ctx.log.append(&record) {
        return Err(discard_after(target, err));
    }
    let path = target.into_path();

    if !matches {
        warn!(
            file_id = %file.file_id,
            path = %path,
            expected = %file.md5sum,
            actual = %record.generated_md5sum,
            "Checksum mismatch"
        );
    }
    info!(
        file_id = %file.file_id,
        path = %path,
        bytes = bytes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Downloaded"
    );
    ctx.sink.event(ProgressEvent {
        message: format!("downloaded {}", path.file_name().unwrap_or(path.as_str())),
        elapsed: Some(started.elapsed()),
    });
    Ok(record)
}

fn discard_after(target: ClaimedTarget, err: PdcError) -> PdcError {
    let path = target.path().to_owned();
    if let Err(cleanup) = target.discard() {
        warn!(path = %path, "Failed to remove partial download: {cleanup}");
    }
    err
}
