use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::CellError;
use crate::http::{RequestPacer, build_client, user_agent};
use crate::process::{failure_message, find_in_path, require_tool, run_capture};

const CURL_STATUS_MARKER: &str = "\n__ncbi_cell_status__:";

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    pub body: String,
}

impl FetchedPage {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

pub trait PageFetcher: Send + Sync {
    fn name(&self) -> &str;
    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError>;
}

#[derive(Clone)]
pub struct HttpPageFetcher {
    client: Client,
    pacer: RequestPacer,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration, pacer: RequestPacer) -> Result<Self, CellError> {
        let client = build_client(timeout, CellError::PageFetch)?;
        Ok(Self { client, pacer })
    }
}

impl PageFetcher for HttpPageFetcher {
    fn name(&self) -> &str {
        "reqwest"
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        self.pacer.wait();
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CellError::PageFetch(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| CellError::PageFetch(err.to_string()))?;
        debug!(url, status, bytes = body.len(), "fetched page");
        Ok(FetchedPage { status, body })
    }
}

#[derive(Clone)]
pub struct CurlPageFetcher {
    program: Option<PathBuf>,
    pacer: RequestPacer,
}

impl CurlPageFetcher {
    pub fn new(program: &str, pacer: RequestPacer) -> Self {
        Self {
            program: find_in_path(program),
            pacer,
        }
    }
}

impl PageFetcher for CurlPageFetcher {
    fn name(&self) -> &str {
        "curl"
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        let program = require_tool(self.program.as_ref(), "curl")?;
        let args = vec![
            "-sSL".to_string(),
            "-A".to_string(),
            user_agent(),
            "-w".to_string(),
            format!("{CURL_STATUS_MARKER}%{{http_code}}"),
            url.to_string(),
        ];
        self.pacer.wait();
        let output =
            run_capture(&program, &args).map_err(|err| CellError::PageFetch(err.to_string()))?;
        if !output.status.success() {
            return Err(CellError::PageFetch(failure_message(&program, &output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let (body, status) = split_status_trailer(&stdout);
        debug!(url, status, bytes = body.len(), "fetched page with curl");
        Ok(FetchedPage {
            status: status.unwrap_or(200),
            body: body.to_string(),
        })
    }
}

/// Separates the status trailer written by `curl -w` from the page body.
pub fn split_status_trailer(output: &str) -> (&str, Option<u16>) {
    match output.rsplit_once(CURL_STATUS_MARKER) {
        Some((body, code)) => (body, code.trim().parse().ok()),
        None => (output, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailer_is_split_from_body() {
        let raw = format!("<html></html>{CURL_STATUS_MARKER}404");
        let (body, status) = split_status_trailer(&raw);
        assert_eq!(body, "<html></html>");
        assert_eq!(status, Some(404));
    }

    #[test]
    fn missing_trailer_keeps_body() {
        let (body, status) = split_status_trailer("<html></html>");
        assert_eq!(body, "<html></html>");
        assert_eq!(status, None);
    }

    #[test]
    fn missing_curl_is_reported() {
        let fetcher = CurlPageFetcher {
            program: None,
            pacer: RequestPacer::disabled(),
        };
        let err = fetcher.fetch("https://example.org").unwrap_err();
        assert!(matches!(err, CellError::MissingTool(_)));
    }
}
