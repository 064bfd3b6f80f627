use serde::{Deserialize, Serialize};

pub const CELL_COLLECTION: &str = "cell";
pub const GENE_COLLECTION: &str = "gene";
pub const CELL_GENE_COLLECTION: &str = "cell-gene";

/// Vertex key for a cluster name: spaces become `_`, commas become `-`.
///
/// Distinct names can share a key (`"T cell, CD4"` and `"T cell- CD4"`); the
/// ingestor reports such collisions instead of splitting them.
pub fn cell_key(cluster_name: &str) -> String {
    cluster_name.replace(' ', "_").replace(',', "-")
}

pub fn gene_key(symbol: &str) -> String {
    symbol.to_string()
}

pub fn edge_key(cell_key: &str, gene_key: &str) -> String {
    format!("{cell_key}-{gene_key}")
}

pub fn vertex_handle(collection: &str, key: &str) -> String {
    format!("{collection}/{key}")
}

pub fn split_handle(handle: &str) -> Option<(&str, &str)> {
    handle
        .split_once('/')
        .filter(|(collection, key)| !collection.is_empty() && !key.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellVertex {
    #[serde(rename = "_key")]
    pub key: String,
    pub cluster_name: String,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
}

impl CellVertex {
    pub fn new(cluster_name: &str, dataset_id: &str) -> Self {
        Self {
            key: cell_key(cluster_name),
            cluster_name: cluster_name.to_string(),
            dataset_ids: vec![dataset_id.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneVertex {
    #[serde(rename = "_key")]
    pub key: String,
    pub gene: String,
    #[serde(default)]
    pub cluster_names: Vec<String>,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
}

impl GeneVertex {
    pub fn new(symbol: &str, cluster_name: &str, dataset_id: &str) -> Self {
        Self {
            key: gene_key(symbol),
            gene: symbol.to_string(),
            cluster_names: vec![cluster_name.to_string()],
            dataset_ids: vec![dataset_id.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellGeneEdge {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
}

impl CellGeneEdge {
    pub fn new(cell_key: &str, gene_key: &str) -> Self {
        Self {
            key: edge_key(cell_key, gene_key),
            from: vertex_handle(CELL_COLLECTION, cell_key),
            to: vertex_handle(GENE_COLLECTION, gene_key),
        }
    }
}
