use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::PdcError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Retrieves the full body behind a signed download URL.
pub trait FileFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PdcError>;
}

impl<T: FileFetcher + ?Sized> FileFetcher for &T {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PdcError> {
        (**self).fetch(url)
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, PdcError> {
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
            .map_err(client_build_error)?;
        Ok(Self { client })
    }
}

fn client_build_error(err: reqwest::Error) -> PdcError {
    PdcError::InvalidConfig(format!("cannot build HTTP client: {err}"))
}

impl FileFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, PdcError> {
        let network_error = |err: reqwest::Error| PdcError::Network {
            url: url.to_string(),
            message: err.to_string(),
        };
        let response = self.client.get(url).send().map_err(network_error)?;
        if !response.status().is_success() {
            return Err(PdcError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().map_err(network_error)?;
        Ok(bytes.to_vec())
    }
}
