use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::ProvenancePolicy;
use crate::error::CellError;

pub const DEFAULT_CONFIG_FILE: &str = "ncbi-cell.json";
pub const DEFAULT_EUTILS_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
pub const DEFAULT_CELLXGENE_URL: &str = "https://api.cellxgene.cziscience.com";
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_TITLE_SELECTORS: &[&str] = &[
    "h1.c-article-title",
    "h1.article-header__title.smaller",
    "div.core-container h1",
    "h1.content-header__title.content-header__title--xx-long",
    "h1#page-title.highwire-cite-title",
];

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub eutils_base_url: Option<String>,
    #[serde(default)]
    pub cellxgene_base_url: Option<String>,
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub selectors: Option<Vec<String>>,
    #[serde(default)]
    pub curl_program: Option<String>,
    #[serde(default)]
    pub ontogpt: Option<OntogptEntry>,
    #[serde(default)]
    pub workspace_dir: Option<String>,
    #[serde(default)]
    pub graph: Option<GraphEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OntogptEntry {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct GraphEntry {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub graph_name: Option<String>,
    #[serde(default)]
    pub provenance: Option<ProvenancePolicy>,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OntogptSettings {
    pub program: String,
    pub template: String,
}

#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub database: String,
    pub graph_name: String,
    pub provenance: ProvenancePolicy,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub credentials: Credentials,
    pub eutils_base_url: String,
    pub cellxgene_base_url: String,
    pub request_delay: Duration,
    pub timeout: Duration,
    pub selectors: Vec<String>,
    pub curl_program: String,
    pub ontogpt: OntogptSettings,
    pub workspace_dir: Utf8PathBuf,
    pub graph: GraphSettings,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ConfigLoader::resolve_config_with_env(Config::default(), |_| None)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CellError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Self::resolve_config(Config::default()));
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CellError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CellError::ConfigParse(err.to_string()))?;

        Ok(Self::resolve_config(config))
    }

    pub fn resolve_config(config: Config) -> ResolvedConfig {
        Self::resolve_config_with_env(config, |name| std::env::var(name).ok())
    }

    pub fn resolve_config_with_env<F>(config: Config, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = |name: &str| {
            env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let credentials = Credentials {
            email: non_empty(config.email).or_else(|| from_env("NCBI_EMAIL")),
            api_key: non_empty(config.api_key).or_else(|| from_env("NCBI_API_KEY")),
        };

        let ontogpt = config.ontogpt.unwrap_or_default();
        let graph = config.graph.unwrap_or_default();

        ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            credentials,
            eutils_base_url: config
                .eutils_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_EUTILS_URL.to_string()),
            cellxgene_base_url: config
                .cellxgene_base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_CELLXGENE_URL.to_string()),
            request_delay: Duration::from_millis(
                config.request_delay_ms.unwrap_or(DEFAULT_REQUEST_DELAY_MS),
            ),
            timeout: Duration::from_secs(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            selectors: config.selectors.unwrap_or_else(default_title_selectors),
            curl_program: config.curl_program.unwrap_or_else(|| "curl".to_string()),
            ontogpt: OntogptSettings {
                program: ontogpt.program.unwrap_or_else(|| "ontogpt".to_string()),
                template: ontogpt.template.unwrap_or_else(|| "cell_type".to_string()),
            },
            workspace_dir: Utf8PathBuf::from(
                config.workspace_dir.unwrap_or_else(|| ".".to_string()),
            ),
            graph: GraphSettings {
                database: graph.database.unwrap_or_else(|| "ncbi-cell".to_string()),
                graph_name: graph.graph_name.unwrap_or_else(|| "cell-gene".to_string()),
                provenance: graph.provenance.unwrap_or_default(),
            },
        }
    }
}

pub fn default_title_selectors() -> Vec<String> {
    DEFAULT_TITLE_SELECTORS
        .iter()
        .map(|selector| selector.to_string())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let resolved = ConfigLoader::resolve_config_with_env(Config::default(), |_| None);
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.request_delay, Duration::from_secs(1));
        assert_eq!(resolved.selectors, default_title_selectors());
        assert_eq!(resolved.ontogpt.template, "cell_type");
        assert_eq!(resolved.graph.provenance, ProvenancePolicy::Dedup);
        assert!(resolved.credentials.api_key.is_none());
    }

    #[test]
    fn file_credentials_win_over_environment() {
        let config = Config {
            email: Some("curator@example.org".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config_with_env(config, |name| match name {
            "NCBI_EMAIL" => Some("env@example.org".to_string()),
            "NCBI_API_KEY" => Some(" abc123 ".to_string()),
            _ => None,
        });
        assert_eq!(
            resolved.credentials.email.as_deref(),
            Some("curator@example.org")
        );
        assert_eq!(resolved.credentials.api_key.as_deref(), Some("abc123"));
    }
}
