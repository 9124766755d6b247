use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::FileDescriptor;
use crate::error::PdcError;

pub const DEFAULT_ENDPOINT: &str = "https://pdc.cancer.gov/graphql";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyCatalogEntry {
    pub pdc_study_id: String,
    #[serde(default)]
    pub versions: Vec<StudyVersion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyVersion {
    pub study_id: String,
}

pub trait PdcClient: Send + Sync {
    fn fetch_study_catalog(&self, accept_dua: bool) -> Result<Vec<StudyCatalogEntry>, PdcError>;
    fn fetch_files_per_study(&self, study_id: &str) -> Result<Vec<FileDescriptor>, PdcError>;
}

#[derive(Clone)]
pub struct PdcHttpClient {
    client: Client,
    endpoint: String,
}

impl PdcHttpClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, PdcError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-pdc/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PdcError::InvalidConfig(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| PdcError::Catalog(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn query<T: DeserializeOwned>(&self, query: &str) -> Result<T, PdcError> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("query", query)])
            .send()
            .map_err(|err| PdcError::Catalog(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "PDC request failed".to_string());
            return Err(PdcError::CatalogStatus { status, message });
        }
        let body: GraphQlResponse<T> = response
            .json()
            .map_err(|err| PdcError::Catalog(err.to_string()))?;
        body.into_data()
    }
}

impl PdcClient for PdcHttpClient {
    fn fetch_study_catalog(&self, accept_dua: bool) -> Result<Vec<StudyCatalogEntry>, PdcError> {
        let data: StudyCatalogData = self.query(&study_catalog_query(accept_dua))?;
        Ok(data.study_catalog.unwrap_or_default())
    }

    fn fetch_files_per_study(&self, study_id: &str) -> Result<Vec<FileDescriptor>, PdcError> {
        let data: FilesPerStudyData = self.query(&files_per_study_query(study_id))?;
        Ok(data
            .files_per_study
            .unwrap_or_default()
            .into_iter()
            .filter_map(FileEntry::into_descriptor)
            .collect())
    }
}

pub fn study_catalog_query(accept_dua: bool) -> String {
    format!(
        "{{ studyCatalog(acceptDUA: {accept_dua}) {{ pdc_study_id versions {{ study_id }} }} }}"
    )
}

pub fn files_per_study_query(study_id: &str) -> String {
    // A JSON string literal is also a valid GraphQL string literal.
    let literal = serde_json::to_string(study_id).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "{{ filesPerStudy(study_id: {literal}) {{ study_id pdc_study_id file_id file_name file_size md5sum signedUrl {{ url }} }} }}"
    )
}

/// Every `study_id` of every version, in catalog order.
pub fn study_ids(catalog: &[StudyCatalogEntry]) -> Vec<String> {
    catalog
        .iter()
        .flat_map(|study| study.versions.iter().map(|version| version.study_id.clone()))
        .collect()
}

/// Queries each study in turn. Any failure aborts: without a complete
/// listing the size ranking is meaningless.
pub fn collect_files<C: PdcClient + ?Sized>(
    client: &C,
    study_ids: &[String],
    sink: &dyn ProgressSink,
) -> Result<Vec<FileDescriptor>, PdcError> {
    let mut files = Vec::new();
    for study_id in study_ids {
        let start = Instant::now();
        let study_files = client.fetch_files_per_study(study_id)?;
        info!(study_id = %study_id, files = study_files.len(), "Listed study files");
        sink.event(ProgressEvent {
            message: format!("catalog study={study_id} files={}", study_files.len()),
            elapsed: Some(start.elapsed()),
        });
        files.extend(study_files);
    }
    Ok(files)
}

/// Stable ascending sort on `file_size`.
pub fn sort_by_size(files: &mut [FileDescriptor]) {
    files.sort_by_key(|file| file.file_size);
}

pub fn select_smallest(sorted: &[FileDescriptor], limit: usize) -> &[FileDescriptor] {
    &sorted[..limit.min(sorted.len())]
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

impl<T> GraphQlResponse<T> {
    fn into_data(self) -> Result<T, PdcError> {
        if !self.errors.is_empty() {
            let messages = self
                .errors
                .into_iter()
                .map(|err| err.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PdcError::Catalog(messages));
        }
        self.data
            .ok_or_else(|| PdcError::Catalog("response contained no data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct StudyCatalogData {
    #[serde(rename = "studyCatalog")]
    study_catalog: Option<Vec<StudyCatalogEntry>>,
}

#[derive(Debug, Deserialize)]
struct FilesPerStudyData {
    #[serde(rename = "filesPerStudy")]
    files_per_study: Option<Vec<FileEntry>>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    study_id: String,
    pdc_study_id: String,
    file_id: String,
    file_name: String,
    #[serde(deserialize_with = "file_size_from_number_or_string")]
    file_size: u64,
    #[serde(default)]
    md5sum: Option<String>,
    #[serde(rename = "signedUrl", default)]
    signed_url: Option<SignedUrl>,
}

#[derive(Debug, Deserialize)]
struct SignedUrl {
    url: Option<String>,
}

impl FileEntry {
    fn into_descriptor(self) -> Option<FileDescriptor> {
        let Some(download_url) = self.signed_url.and_then(|signed| signed.url) else {
            warn!(file_id = %self.file_id, file = %self.file_name, "No signed URL, skipping");
            return None;
        };
        Some(FileDescriptor {
            study_id: self.study_id,
            pdc_study_id: self.pdc_study_id,
            file_id: self.file_id,
            file_name: self.file_name,
            file_size: self.file_size,
            md5sum: self.md5sum.unwrap_or_default(),
            download_url,
        })
    }
}

fn file_size_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(value) => Ok(value),
        Size::Text(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_files_per_study_response() {
        let raw = r#"{
            "data": {
                "filesPerStudy": [
                    {
                        "study_id": "s1", "pdc_study_id": "PDC000121", "file_id": "f1",
                        "file_name": "a.txt", "file_size": "120", "md5sum": "abc",
                        "signedUrl": { "url": "https://example.org/a" }
                    },
                    {
                        "study_id": "s1", "pdc_study_id": "PDC000121", "file_id": "f2",
                        "file_name": "b.txt", "file_size": 7, "md5sum": null,
                        "signedUrl": null
                    }
                ]
            }
        }"#;
        let body: GraphQlResponse<FilesPerStudyData> = serde_json::from_str(raw).unwrap();
        let files: Vec<_> = body
            .into_data()
            .unwrap()
            .files_per_study
            .unwrap()
            .into_iter()
            .filter_map(FileEntry::into_descriptor)
            .collect();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_size, 120);
        assert_eq!(files[0].download_url, "https://example.org/a");
    }

    #[test]
    fn graphql_errors_surface() {
        let raw = r#"{ "data": null, "errors": [{ "message": "bad DUA" }] }"#;
        let body: GraphQlResponse<StudyCatalogData> = serde_json::from_str(raw).unwrap();
        let err = body.into_data().unwrap_err();
        assert_matches!(err, PdcError::Catalog(message) if message == "bad DUA");
    }

    #[test]
    fn queries_embed_arguments() {
        assert!(study_catalog_query(true).contains("acceptDUA: true"));
        assert!(study_catalog_query(false).contains("acceptDUA: false"));
        assert!(files_per_study_query("ab\"c").contains(r#"study_id: "ab\"c""#));
    }
}
