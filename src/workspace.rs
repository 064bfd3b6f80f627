use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::{Builder, NamedTempFile};

use crate::domain::DatasetId;
use crate::error::CellError;

#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn current() -> Result<Self, CellError> {
        let cwd = std::env::current_dir().map_err(|err| CellError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| CellError::Filesystem("invalid workspace path".to_string()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn titles_path(&self) -> Utf8PathBuf {
        self.root.join("titles.json")
    }

    pub fn pmids_path(&self) -> Utf8PathBuf {
        self.root.join("pmids.json")
    }

    pub fn annotation_dir(&self) -> Utf8PathBuf {
        self.root.join("ontogpt")
    }

    pub fn cellxgene_dir(&self) -> Utf8PathBuf {
        self.root.join("cellxgene")
    }

    pub fn dataset_asset_path(&self, dataset_id: &DatasetId, filetype: &str) -> Utf8PathBuf {
        self.cellxgene_dir().join(format!("{dataset_id}.{filetype}"))
    }

    pub fn results_dir(&self) -> Utf8PathBuf {
        self.root.join("nsforest")
    }

    pub fn graph_dir(&self) -> Utf8PathBuf {
        self.root.join("graph")
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), CellError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| CellError::Filesystem(err.to_string()))
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CellError> {
        let content =
            serde_json::to_vec_pretty(value).map_err(|err| CellError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, CellError> {
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CellError::Filesystem(format!("read {path}: {err}")))?;
        let value = serde_json::from_str(&content)
            .map_err(|err| CellError::Filesystem(format!("parse {path}: {err}")))?;
        Ok(Some(value))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CellError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CellError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("tmp");
        fs::write(tmp_path.as_std_path(), content)
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Temp file next to `dest`, so that persisting it is a rename.
    pub fn temp_file_for(dest: &Utf8Path) -> Result<NamedTempFile, CellError> {
        let parent = dest
            .parent()
            .ok_or_else(|| CellError::Filesystem("invalid destination path".to_string()))?;
        Self::ensure_dir(parent)?;
        Builder::new()
            .prefix("ncbi-cell-download")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CellError::Filesystem(err.to_string()))
    }

    pub fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), CellError> {
        temp.persist(dest.as_std_path())
            .map_err(|err| CellError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn list_tables(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, CellError> {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| CellError::Filesystem(format!("read {dir}: {err}")))?;
        let mut tables = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| CellError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|_| CellError::Filesystem("non-utf8 result table path".to_string()))?;
            if path.is_file() && path.extension().map(|ext| ext == "csv").unwrap_or(false) {
                tables.push(path);
            }
        }
        tables.sort();
        Ok(tables)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCache<T> {
    pub generated_at: String,
    pub tool: String,
    pub entries: Vec<T>,
}

impl<T> StageCache<T> {
    pub fn new(entries: Vec<T>) -> Self {
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("ncbi-cell/{}", env!("CARGO_PKG_VERSION")),
            entries,
        }
    }
}
