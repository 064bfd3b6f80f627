use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::ResolvedConfig;
use crate::domain::DatasetId;
use crate::error::CellError;
use crate::http::{RequestPacer, build_client};
use crate::workspace::Workspace;

pub const H5AD_FILETYPE: &str = "H5AD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub dataset_id: DatasetId,
    pub collection_id: String,
    pub citation: String,
}

pub fn load_catalog(path: &Path) -> Result<Vec<DatasetRecord>, CellError> {
    let file = File::open(path)
        .map_err(|err| CellError::CatalogParse(format!("open {}: {err}", path.display())))?;
    read_catalog(file)
}

pub fn read_catalog<R: Read>(reader: R) -> Result<Vec<DatasetRecord>, CellError> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for (line, record) in reader.deserialize::<DatasetRecord>().enumerate() {
        let record =
            record.map_err(|err| CellError::CatalogParse(format!("record {}: {err}", line + 1)))?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetAsset {
    pub filetype: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_id: String,
    #[serde(default)]
    pub assets: Vec<DatasetAsset>,
}

pub trait CellxgeneClient: Send + Sync {
    fn fetch_dataset(
        &self,
        collection_id: &str,
        dataset_id: &DatasetId,
    ) -> Result<DatasetMetadata, CellError>;
    fn download_asset(&self, url: &str, destination: &Path) -> Result<(), CellError>;
}

#[derive(Clone)]
pub struct CellxgeneHttpClient {
    client: Client,
    base_url: String,
    pacer: RequestPacer,
}

impl CellxgeneHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, CellError> {
        let client = build_client(config.timeout, CellError::CellxgeneHttp)?;
        Ok(Self {
            client,
            base_url: config.cellxgene_base_url.clone(),
            pacer: RequestPacer::new(config.request_delay),
        })
    }

    pub fn dataset_url(&self, collection_id: &str, dataset_id: &DatasetId) -> String {
        format!(
            "{}/curation/v1/collections/{collection_id}/datasets/{dataset_id}",
            self.base_url
        )
    }

    fn handle_status(response: Response) -> Result<Response, CellError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "CELLxGENE request failed".to_string());
        Err(CellError::CellxgeneStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, CellError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        self.pacer.wait();
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && (err.is_timeout() || err.is_connect()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(CellError::CellxgeneHttp(err.to_string()));
                }
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl CellxgeneClient for CellxgeneHttpClient {
    fn fetch_dataset(
        &self,
        collection_id: &str,
        dataset_id: &DatasetId,
    ) -> Result<DatasetMetadata, CellError> {
        let url = self.dataset_url(collection_id, dataset_id);
        let response = self.send_with_retries(|| self.client.get(&url))?;
        Self::handle_status(response)?
            .json()
            .map_err(|err| CellError::CellxgeneHttp(err.to_string()))
    }

    fn download_asset(&self, url: &str, destination: &Path) -> Result<(), CellError> {
        let response = self.send_with_retries(|| self.client.get(url))?;
        let mut response = Self::handle_status(response)?;
        let mut file =
            File::create(destination).map_err(|err| CellError::Filesystem(err.to_string()))?;
        response
            .copy_to(&mut file)
            .map_err(|err| CellError::CellxgeneHttp(format!("download {url}: {err}")))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Downloaded { path: Utf8PathBuf },
    Exists { path: Utf8PathBuf },
    NoAsset,
    IdMismatch { returned: String },
}

pub struct DatasetDownloader<C: CellxgeneClient> {
    client: C,
    output_dir: Utf8PathBuf,
}

impl<C: CellxgeneClient> DatasetDownloader<C> {
    pub fn new(client: C, output_dir: Utf8PathBuf) -> Self {
        Self { client, output_dir }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    pub fn asset_path(&self, dataset_id: &DatasetId, filetype: &str) -> Utf8PathBuf {
        self.output_dir.join(format!("{dataset_id}.{filetype}"))
    }

    pub fn download(&self, record: &DatasetRecord) -> Result<DownloadOutcome, CellError> {
        let dataset_id = &record.dataset_id;
        let path = self.asset_path(dataset_id, H5AD_FILETYPE);
        if path.as_std_path().exists() {
            info!(dataset_id = %dataset_id, path = %path, "dataset file exists");
            return Ok(DownloadOutcome::Exists { path });
        }

        let metadata = self.client.fetch_dataset(&record.collection_id, dataset_id)?;
        if metadata.dataset_id != dataset_id.as_str() {
            error!(
                dataset_id = %dataset_id,
                returned = %metadata.dataset_id,
                "response dataset id does not equal requested dataset id"
            );
            return Ok(DownloadOutcome::IdMismatch {
                returned: metadata.dataset_id,
            });
        }

        let Some(asset) = metadata
            .assets
            .iter()
            .find(|asset| asset.filetype == H5AD_FILETYPE)
        else {
            info!(dataset_id = %dataset_id, "dataset has no H5AD asset");
            return Ok(DownloadOutcome::NoAsset);
        };

        info!(dataset_id = %dataset_id, path = %path, "downloading dataset file");
        let temp = Workspace::temp_file_for(&path)?;
        self.client.download_asset(&asset.url, temp.path())?;
        Workspace::persist(temp, &path)?;
        info!(dataset_id = %dataset_id, path = %path, "dataset file downloaded");
        Ok(DownloadOutcome::Downloaded { path })
    }
}
