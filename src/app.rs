use std::time::Duration;

use camino::Utf8Path;
use serde::Serialize;
use tracing::info;

use crate::catalog::{self, PdcClient};
use crate::config::ResolvedConfig;
use crate::domain::FileDescriptor;
use crate::downloader::{BatchReport, DownloadOptions, Downloader};
use crate::error::{ErrorKind, PdcError};
use crate::fetcher::FileFetcher;
use crate::recorder::{self, DownloadLog};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

/// Receives phase and per-file events. Shared by all download workers.
pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub studies: usize,
    pub study_versions: usize,
    pub files: usize,
    pub total_bytes: u64,
    pub catalog_csv: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: String,
    pub finished_at: String,
    pub catalog_files: usize,
    pub selected: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub mismatched: usize,
    pub output_dir: String,
    pub download_log: String,
    pub downloads: Vec<DownloadSummary>,
    pub failures: Vec<FailureSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub file_id: String,
    pub path: String,
    pub file_size: u64,
    pub checksum_ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureSummary {
    pub file_id: String,
    pub file: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl RunSummary {
    fn from_report(
        started_at: String,
        catalog_files: usize,
        report: &BatchReport,
        config: &ResolvedConfig,
    ) -> Self {
        Self {
            started_at,
            finished_at: iso_timestamp(),
            catalog_files,
            selected: report.total(),
            downloaded: report.completed.len(),
            failed: report.failed.len(),
            mismatched: report.mismatched().count(),
            output_dir: config.output_dir.to_string(),
            download_log: config.download_log.to_string(),
            downloads: report
                .completed
                .iter()
                .map(|record| DownloadSummary {
                    file_id: record.file_id.clone(),
                    path: record.target_path.to_string(),
                    file_size: record.file_size,
                    checksum_ok: record.checksum_matches(),
                })
                .collect(),
            failures: report
                .failed
                .iter()
                .map(|failure| FailureSummary {
                    file_id: failure.file_id.clone(),
                    file: failure.label().to_string(),
                    kind: failure.kind(),
                    message: failure.error.to_string(),
                })
                .collect(),
        }
    }

    /// Turns a run with failed downloads into [`PdcError::BatchFailed`].
    pub fn ensure_success(&self) -> Result<(), PdcError> {
        if self.failed == 0 {
            Ok(())
        } else {
            Err(PdcError::BatchFailed {
                failed: self.failed,
                total: self.selected,
            })
        }
    }
}

pub struct App<C: PdcClient, F: FileFetcher> {
    client: C,
    fetcher: F,
}

impl<C: PdcClient, F: FileFetcher> App<C, F> {
    pub fn new(client: C, fetcher: F) -> Self {
        Self { client, fetcher }
    }

    /// Catalog → sorted catalog CSV → smallest `limit` files → downloads.
    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, PdcError> {
        let started_at = iso_timestamp();
        let (files, _) = self.build_catalog(config, sink)?;
        let selected = catalog::select_smallest(&files, config.limit);
        let report = self.download(selected, config, sink)?;
        Ok(RunSummary::from_report(
            started_at,
            files.len(),
            &report,
            config,
        ))
    }

    /// Writes the size-ranked catalog CSV without downloading anything.
    pub fn catalog(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<CatalogSummary, PdcError> {
        let (_, summary) = self.build_catalog(config, sink)?;
        Ok(summary)
    }

    /// Downloads the smallest `limit` files of a previously written catalog CSV.
    pub fn download_from_catalog(
        &self,
        catalog_csv: &Utf8Path,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, PdcError> {
        let started_at = iso_timestamp();
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; reading {catalog_csv}"),
            elapsed: None,
        });
        let mut files = recorder::read_catalog(catalog_csv)?;
        catalog::sort_by_size(&mut files);
        let selected = catalog::select_smallest(&files, config.limit);
        let report = self.download(selected, config, sink)?;
        Ok(RunSummary::from_report(
            started_at,
            files.len(),
            &report,
            config,
        ))
    }

    fn build_catalog(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<(Vec<FileDescriptor>, CatalogSummary), PdcError> {
        sink.event(ProgressEvent {
            message: "phase=Resolve; querying study catalog".to_string(),
            elapsed: None,
        });
        let start = std::time::Instant::now();
        let studies = self.client.fetch_study_catalog(config.accept_dua)?;
        let study_ids = catalog::study_ids(&studies);
        sink.event(ProgressEvent {
            message: format!(
                "pdc.response studies={} versions={}",
                studies.len(),
                study_ids.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let mut files = catalog::collect_files(&self.client, &study_ids, sink)?;
        catalog::sort_by_size(&mut files);

        sink.event(ProgressEvent {
            message: format!("phase=Store; writing {}", config.catalog_csv),
            elapsed: None,
        });
        recorder::write_catalog(&config.catalog_csv, &files)?;
        let total_bytes: u64 = files.iter().map(|file| file.file_size).sum();
        info!(
            studies = studies.len(),
            files = files.len(),
            total_bytes,
            catalog_csv = %config.catalog_csv,
            "Catalog written"
        );

        let summary = CatalogSummary {
            studies: studies.len(),
            study_versions: study_ids.len(),
            files: files.len(),
            total_bytes,
            catalog_csv: config.catalog_csv.to_string(),
        };
        Ok((files, summary))
    }

    fn download(
        &self,
        files: &[FileDescriptor],
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<BatchReport, PdcError> {
        sink.event(ProgressEvent {
            message: "phase=Prepare; creating download log".to_string(),
            elapsed: None,
        });
        let log = DownloadLog::create(&config.download_log)?;
        let options = DownloadOptions {
            concurrency: config.concurrency,
            output_dir: config.output_dir.clone(),
            integrity: config.integrity,
        };
        Downloader::new(&self.fetcher, options).run(files, &log, sink)
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
