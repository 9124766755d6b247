use std::fmt;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::checksum;

/// One remote file as listed by the PDC `filesPerStudy` query.
///
/// The serialized shape is a row of the catalog CSV, where the signed URL
/// lives under the `signedUrl` column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub study_id: String,
    pub pdc_study_id: String,
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub md5sum: String,
    #[serde(rename = "signedUrl")]
    pub download_url: String,
}

impl FileDescriptor {
    pub fn label(&self) -> FileLabel<'_> {
        FileLabel::new(&self.pdc_study_id, &self.file_name)
    }
}

/// Short `{pdc_study_id}/{file_name}` form used in logs and failure reports.
#[derive(Debug, Clone, Copy)]
pub struct FileLabel<'a> {
    pdc_study_id: &'a str,
    file_name: &'a str,
}

impl<'a> FileLabel<'a> {
    pub fn new(pdc_study_id: &'a str, file_name: &'a str) -> Self {
        Self {
            pdc_study_id,
            file_name,
        }
    }
}

impl fmt::Display for FileLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pdc_study_id, self.file_name)
    }
}

/// A row of the download log. Written exactly once per completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub study_id: String,
    pub pdc_study_id: String,
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub md5sum: String,
    pub generated_md5sum: String,
    pub download_url: String,
    #[serde(skip)]
    pub target_path: Utf8PathBuf,
}

impl DownloadRecord {
    pub fn new(
        descriptor: &FileDescriptor,
        generated_md5sum: String,
        target_path: Utf8PathBuf,
    ) -> Self {
        Self {
            study_id: descriptor.study_id.clone(),
            pdc_study_id: descriptor.pdc_study_id.clone(),
            file_id: descriptor.file_id.clone(),
            file_name: descriptor.file_name.clone(),
            file_size: descriptor.file_size,
            md5sum: descriptor.md5sum.clone(),
            generated_md5sum,
            download_url: descriptor.download_url.clone(),
            target_path,
        }
    }

    pub fn checksum_matches(&self) -> bool {
        checksum::digests_match(&self.md5sum, &self.generated_md5sum)
    }
}
