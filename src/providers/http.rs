use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{Archive, Credentials};
use crate::error::SkyError;
use crate::transfer::TransferStream;

/// Blocking HTTP client shared by the archive backends.
#[derive(Clone)]
pub struct ArchiveHttp {
    client: Client,
    archive: Archive,
}

impl ArchiveHttp {
    pub fn new(archive: Archive) -> Result<Self, SkyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("skyfetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SkyError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|err| SkyError::ArchiveHttp {
                archive: archive.label().to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { client, archive })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, SkyError> {
        let response = self.send_with_retries(|| self.client.get(url).query(query))?;
        let response = self.handle_status(response)?;
        response.text().map_err(|err| self.http_error(err))
    }

    /// Starts a download without checking the status, which the caller reports.
    pub fn open(&self, url: &str, credentials: Option<&Credentials>) -> Result<TransferStream, SkyError> {
        let response = self.send_with_retries(|| with_auth(self.client.get(url), credentials))?;
        Ok(TransferStream {
            status: response.status().as_u16(),
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }

    pub fn handle_status(&self, response: Response) -> Result<Response, SkyError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| format!("{} request failed", self.archive));
        Err(SkyError::ArchiveStatus {
            archive: self.archive.label().to_string(),
            status,
            message: truncate(&message, 300),
        })
    }

    pub fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, SkyError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(self.http_error(err));
                }
            }
        }
    }

    pub fn http_error(&self, err: reqwest::Error) -> SkyError {
        SkyError::ArchiveHttp {
            archive: self.archive.label().to_string(),
            message: err.to_string(),
        }
    }
}

pub fn with_auth(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
    match credentials {
        Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
        None => request,
    }
}

fn truncate(message: &str, max: usize) -> String {
    let trimmed = message.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
