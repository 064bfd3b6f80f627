pub mod ingest;
pub mod model;
pub mod store;

pub use ingest::{GraphIngestor, IngestSummary, KeyCollision};
pub use model::{
    CELL_COLLECTION, CELL_GENE_COLLECTION, CellGeneEdge, CellVertex, GENE_COLLECTION, GeneVertex,
    cell_key, edge_key, gene_key,
};
pub use store::{
    Document, EdgeDefinition, FileGraphStore, GraphStore, MemoryGraphStore, dangling_edges,
};
