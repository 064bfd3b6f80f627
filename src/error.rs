use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CellError {
    #[error("invalid PubMed identifier: {0}")]
    InvalidPmid(String),

    #[error("invalid dataset identifier: {0}")]
    InvalidDatasetId(String),

    #[error("invalid title selector `{selector}`: {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("invalid title pattern: {0}")]
    InvalidPattern(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("page request failed: {0}")]
    PageFetch(String),

    #[error("E-utilities request failed: {0}")]
    EutilsHttp(String),

    #[error("E-utilities returned status {status}: {message}")]
    EutilsStatus { status: u16, message: String },

    #[error("too many requests to NCBI E-utilities; try again later, or configure an API key")]
    #[diagnostic(help("set NCBI_API_KEY or `api_key` in ncbi-cell.json"))]
    RateLimited,

    #[error("CELLxGENE request failed: {0}")]
    CellxgeneHttp(String),

    #[error("CELLxGENE returned status {status}: {message}")]
    CellxgeneStatus { status: u16, message: String },

    #[error("failed to parse catalog snapshot: {0}")]
    CatalogParse(String),

    #[error("result table {table} is missing column `{column}`")]
    MissingColumn { table: String, column: String },

    #[error("malformed marker list `{literal}`: {message}")]
    MalformedMarkers { literal: String, message: String },

    #[error("malformed result table row: {0}")]
    MalformedRow(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("annotation for PMID {pmid} failed: {message}")]
    AnnotationFailed { pmid: String, message: String },

    #[error("unknown graph collection: {0}")]
    UnknownCollection(String),

    #[error("document {key} already exists in collection {collection}")]
    DuplicateKey { collection: String, key: String },

    #[error("document {key} not found in collection {collection}")]
    DocumentNotFound { collection: String, key: String },

    #[error("edge {key} references missing vertex {vertex}")]
    DanglingEdge { key: String, vertex: String },

    #[error("invalid graph document: {0}")]
    InvalidDocument(String),

    #[error("graph snapshot error: {0}")]
    GraphSnapshot(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
