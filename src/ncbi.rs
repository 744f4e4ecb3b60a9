use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tempfile::Builder;

use crate::domain::Accession;
use crate::error::KiraError;

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// The external authority: existence checks, flat-file retrieval, and plain
/// downloads of the source spreadsheet.
pub trait NcbiClient: Send + Sync {
    /// Returns `ACCESSION.VERSION` strings for the queried accessions that exist.
    fn check_accessions(&self, accessions: &[Accession]) -> Result<Vec<String>, KiraError>;
    /// Returns the GenBank flat-file text for the queried accessions.
    fn fetch_genbank(&self, accessions: &[Accession]) -> Result<String, KiraError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError>;
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NcbiHttpClient {
    pub fn new() -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-vmr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::NcbiHttp(err.to_string()))?,
        );

        let api_key = std::env::var("NCBI_API_KEY")
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: EUTILS_BASE_URL.to_string(),
            api_key,
        })
    }

    /// POST with the id list in a form body; the query string stays empty.
    fn efetch_request(
        &self,
        accessions: &[Accession],
        rettype: &str,
    ) -> reqwest::blocking::RequestBuilder {
        let url = format!("{}/efetch.fcgi", self.base_url);
        let ids = join_ids(accessions);
        let mut params = vec![
            ("db", "nuccore"),
            ("id", ids.as_str()),
            ("rettype", rettype),
            ("retmode", "text"),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.as_str()));
        }
        self.client.post(url).form(&params)
    }

    fn efetch(&self, accessions: &[Accession], rettype: &str) -> Result<String, KiraError> {
        let response = self.send_with_retries(|| self.efetch_request(accessions, rettype))?;
        let response = Self::handle_status(response)?;
        response
            .text()
            .map_err(|err| KiraError::NcbiHttp(err.to_string()))
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "NCBI request failed".to_string());
        Err(KiraError::NcbiStatus { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, KiraError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(status, delay_ms = delay, "retrying NCBI request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::debug!(error = %err, delay_ms = delay, "retrying NCBI request");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(KiraError::NcbiHttp(err.to_string()));
                }
            }
        }
    }
}

impl NcbiClient for NcbiHttpClient {
    fn check_accessions(&self, accessions: &[Accession]) -> Result<Vec<String>, KiraError> {
        let body = self.efetch(accessions, "acc")?;
        Ok(body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch_genbank(&self, accessions: &[Accession]) -> Result<String, KiraError> {
        self.efetch(accessions, "gb")
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), KiraError> {
        let mut response = self
            .send_with_retries(|| self.client.get(url))
            .map_err(|err| KiraError::SheetDownload(err.to_string()))?;
        if !response.status().is_success() {
            return Err(KiraError::SheetDownload(format!(
                "{url} returned status {}",
                response.status().as_u16()
            )));
        }
        let parent = destination
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-vmr-download")
            .tempfile_in(parent)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut temp)
            .map_err(|err| KiraError::SheetDownload(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

pub fn join_ids(accessions: &[Accession]) -> String {
    accessions
        .iter()
        .map(Accession::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Accession part of an `ACCESSION.VERSION` string.
pub fn accession_prefix(value: &str) -> &str {
    value
        .trim()
        .split_once('.')
        .map(|(prefix, _)| prefix)
        .unwrap_or(value.trim())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
