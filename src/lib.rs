pub mod annotate;
pub mod app;
pub mod cellxgene;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod http;
pub mod markers;
pub mod output;
pub mod process;
pub mod pubmed;
pub mod title;
pub mod workspace;
