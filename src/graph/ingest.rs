use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::domain::{DatasetId, ProvenancePolicy};
use crate::error::CellError;
use crate::graph::model::{
    CELL_COLLECTION, CELL_GENE_COLLECTION, CellGeneEdge, CellVertex, GENE_COLLECTION, GeneVertex,
    cell_key, gene_key, vertex_handle,
};
use crate::graph::store::{
    Document, EdgeDefinition, FROM_FIELD, GraphStore, TO_FIELD, string_field,
};
use crate::markers::{MarkerRow, MarkerTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCollision {
    pub collection: String,
    pub key: String,
    pub existing: String,
    pub incoming: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub dataset_id: String,
    pub source: String,
    pub rows: usize,
    pub cells_created: usize,
    pub cells_updated: usize,
    pub genes_created: usize,
    pub genes_updated: usize,
    pub edges_created: usize,
    pub edges_existing: usize,
    pub key_collisions: Vec<KeyCollision>,
}

impl IngestSummary {
    fn absorb(&mut self, row: RowCounts) {
        self.rows += 1;
        self.cells_created += row.cells_created;
        self.cells_updated += row.cells_updated;
        self.genes_created += row.genes_created;
        self.genes_updated += row.genes_updated;
        self.edges_created += row.edges_created;
        self.edges_existing += row.edges_existing;
        self.key_collisions.extend(row.key_collisions);
    }
}

#[derive(Debug, Default)]
struct RowCounts {
    cells_created: usize,
    cells_updated: usize,
    genes_created: usize,
    genes_updated: usize,
    edges_created: usize,
    edges_existing: usize,
    key_collisions: Vec<KeyCollision>,
}

#[derive(Debug, Clone)]
pub struct GraphIngestor {
    policy: ProvenancePolicy,
    graph_name: String,
}

impl GraphIngestor {
    pub fn new(graph_name: &str, policy: ProvenancePolicy) -> Self {
        Self {
            policy,
            graph_name: graph_name.to_string(),
        }
    }

    pub fn policy(&self) -> ProvenancePolicy {
        self.policy
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    pub fn prepare<S: GraphStore + ?Sized>(&self, store: &mut S) -> Result<(), CellError> {
        store.ensure_graph(
            &self.graph_name,
            &[CELL_COLLECTION, GENE_COLLECTION],
            &[EdgeDefinition::new(
                CELL_GENE_COLLECTION,
                &[CELL_COLLECTION],
                &[GENE_COLLECTION],
            )],
        )
    }

    pub fn ingest<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        table: &MarkerTable,
        dataset_id: &DatasetId,
    ) -> Result<IngestSummary, CellError> {
        self.prepare(store)?;
        let mut summary = IngestSummary {
            dataset_id: dataset_id.to_string(),
            source: table.source.clone(),
            ..IngestSummary::default()
        };
        info!(
            dataset_id = %dataset_id,
            source = %table.source,
            rows = table.rows.len(),
            "ingesting marker table"
        );

        for (index, row) in table.rows.iter().enumerate() {
            let counts = self.ingest_row(store, row, dataset_id).map_err(|err| {
                warn!(
                    dataset_id = %dataset_id,
                    row = index + 1,
                    error = %err,
                    "aborting table at malformed row"
                );
                err
            })?;
            summary.absorb(counts);
        }
        store.commit()?;

        for collision in &summary.key_collisions {
            warn!(
                collection = %collision.collection,
                key = %collision.key,
                existing = %collision.existing,
                incoming = %collision.incoming,
                "distinct values share a document key"
            );
        }
        info!(
            dataset_id = %dataset_id,
            cells_created = summary.cells_created,
            genes_created = summary.genes_created,
            edges_created = summary.edges_created,
            "ingested marker table"
        );
        Ok(summary)
    }

    fn ingest_row<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        row: &MarkerRow,
        dataset_id: &DatasetId,
    ) -> Result<RowCounts, CellError> {
        let cluster_name = row.cluster_name.as_str();
        if cluster_name.trim().is_empty() {
            return Err(CellError::MalformedRow(
                "row has an empty `clusterName`".to_string(),
            ));
        }
        let markers = row.markers()?;
        if let Some(empty) = markers.iter().find(|symbol| symbol.trim().is_empty()) {
            return Err(CellError::MalformedMarkers {
                literal: row.markers_literal.clone(),
                message: format!("empty gene symbol `{empty}`"),
            });
        }

        let mut counts = RowCounts::default();
        let mut txn = RowTransaction::new(&*store);
        let dataset = dataset_id.as_str();

        let cell = cell_key(cluster_name);
        match txn.read::<CellVertex>(CELL_COLLECTION, &cell)? {
            Some(mut vertex) => {
                if vertex.cluster_name != cluster_name {
                    counts.key_collisions.push(KeyCollision {
                        collection: CELL_COLLECTION.to_string(),
                        key: cell.clone(),
                        existing: vertex.cluster_name.clone(),
                        incoming: cluster_name.to_string(),
                    });
                }
                if self.policy.apply(&mut vertex.dataset_ids, dataset) {
                    txn.stage(CELL_COLLECTION, &cell, &vertex)?;
                    counts.cells_updated += 1;
                }
            }
            None => {
                txn.stage(CELL_COLLECTION, &cell, &CellVertex::new(cluster_name, dataset))?;
                counts.cells_created += 1;
            }
        }

        let mut gene_keys = Vec::with_capacity(markers.len());
        for symbol in &markers {
            let gene = gene_key(symbol);
            match txn.read::<GeneVertex>(GENE_COLLECTION, &gene)? {
                Some(mut vertex) => {
                    let clusters = self.policy.apply(&mut vertex.cluster_names, cluster_name);
                    let datasets = self.policy.apply(&mut vertex.dataset_ids, dataset);
                    if clusters || datasets {
                        txn.stage(GENE_COLLECTION, &gene, &vertex)?;
                        counts.genes_updated += 1;
                    }
                }
                None => {
                    txn.stage(
                        GENE_COLLECTION,
                        &gene,
                        &GeneVertex::new(symbol, cluster_name, dataset),
                    )?;
                    counts.genes_created += 1;
                }
            }
            gene_keys.push(gene);
        }

        for gene in &gene_keys {
            let mut edge = CellGeneEdge::new(&cell, gene);
            if txn.find_edge(CELL_GENE_COLLECTION, &edge.from, &edge.to)? {
                counts.edges_existing += 1;
                continue;
            }
            if let Some(other) = txn.read_document(CELL_GENE_COLLECTION, &edge.key)? {
                counts.key_collisions.push(KeyCollision {
                    collection: CELL_GENE_COLLECTION.to_string(),
                    key: edge.key.clone(),
                    existing: edge_label(&other),
                    incoming: format!("{} -> {}", edge.from, edge.to),
                });
                edge.key = txn.free_key(CELL_GENE_COLLECTION, &edge.key)?;
            }
            txn.stage(CELL_GENE_COLLECTION, &edge.key, &edge)?;
            counts.edges_created += 1;
        }

        let writes = txn.into_writes();
        commit_writes(store, writes)?;
        debug!(cluster_name, genes = gene_keys.len(), "ingested row");
        Ok(counts)
    }
}

fn edge_label(document: &Document) -> String {
    format!(
        "{} -> {}",
        string_field(document, FROM_FIELD).unwrap_or_default(),
        string_field(document, TO_FIELD).unwrap_or_default()
    )
}

#[derive(Debug)]
struct StagedWrite {
    collection: &'static str,
    document: Document,
    exists: bool,
}

/// Writes of one row, staged against a read-only view of the store.
///
/// Reads see staged documents first, so a gene listed twice in one row is
/// created once.
struct RowTransaction<'a, S: GraphStore + ?Sized> {
    store: &'a S,
    writes: Vec<StagedWrite>,
    index: HashMap<String, usize>,
}

impl<'a, S: GraphStore + ?Sized> RowTransaction<'a, S> {
    fn new(store: &'a S) -> Self {
        Self {
            store,
            writes: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn read_document(&self, collection: &str, key: &str) -> Result<Option<Document>, CellError> {
        let staged = self
            .index
            .get(&vertex_handle(collection, key))
            .map(|position| self.writes[*position].document.clone());
        match staged {
            Some(document) => Ok(Some(document)),
            None => self.store.get_document(collection, key),
        }
    }

    fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
        key: &str,
    ) -> Result<Option<T>, CellError> {
        self.read_document(collection, key)?
            .map(|document| {
                serde_json::from_value(Value::Object(document)).map_err(|err| {
                    CellError::InvalidDocument(format!("{collection}/{key}: {err}"))
                })
            })
            .transpose()
    }

    /// First `<base>:<n>` key, from 2 up, that no document holds.
    fn free_key(&self, collection: &str, base: &str) -> Result<String, CellError> {
        let mut suffix = 2usize;
        loop {
            let candidate = format!("{base}:{suffix}");
            if self.read_document(collection, &candidate)?.is_none() {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    fn find_edge(&self, collection: &str, from: &str, to: &str) -> Result<bool, CellError> {
        let staged = self.writes.iter().any(|write| {
            write.collection == collection
                && string_field(&write.document, FROM_FIELD) == Some(from)
                && string_field(&write.document, TO_FIELD) == Some(to)
        });
        Ok(staged || self.store.find_edge(collection, from, to)?.is_some())
    }

    fn stage<T: Serialize>(
        &mut self,
        collection: &'static str,
        key: &str,
        value: &T,
    ) -> Result<(), CellError> {
        let document = match serde_json::to_value(value) {
            Ok(Value::Object(document)) => document,
            Ok(_) => {
                return Err(CellError::InvalidDocument(format!(
                    "{collection}/{key} is not an object"
                )));
            }
            Err(err) => return Err(CellError::InvalidDocument(err.to_string())),
        };
        let handle = vertex_handle(collection, key);
        match self.index.get(&handle) {
            Some(position) => self.writes[*position].document = document,
            None => {
                let exists = self.store.has_document(collection, key)?;
                self.index.insert(handle, self.writes.len());
                self.writes.push(StagedWrite {
                    collection,
                    document,
                    exists,
                });
            }
        }
        Ok(())
    }

    fn into_writes(self) -> Vec<StagedWrite> {
        self.writes
    }
}

/// Applies vertex writes before edge writes so edge endpoints always exist.
fn commit_writes<S: GraphStore + ?Sized>(
    store: &mut S,
    writes: Vec<StagedWrite>,
) -> Result<(), CellError> {
    let (edges, vertices): (Vec<_>, Vec<_>) = writes
        .into_iter()
        .partition(|write| write.collection == CELL_GENE_COLLECTION);
    for write in vertices.into_iter().chain(edges) {
        if write.exists {
            store.update_document(write.collection, write.document)?;
        } else {
            store.insert_document(write.collection, write.document)?;
        }
    }
    Ok(())
}
