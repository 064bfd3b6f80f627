use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::CellError;
use crate::graph::model::split_handle;
use crate::workspace::Workspace;

pub type Document = Map<String, Value>;

pub const KEY_FIELD: &str = "_key";
pub const FROM_FIELD: &str = "_from";
pub const TO_FIELD: &str = "_to";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub collection: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
}

impl EdgeDefinition {
    pub fn new(collection: &str, from: &[&str], to: &[&str]) -> Self {
        Self {
            collection: collection.to_string(),
            from: from.iter().map(|name| name.to_string()).collect(),
            to: to.iter().map(|name| name.to_string()).collect(),
        }
    }
}

pub trait GraphStore {
    fn database(&self) -> &str;

    fn ensure_graph(
        &mut self,
        name: &str,
        vertex_collections: &[&str],
        edges: &[EdgeDefinition],
    ) -> Result<(), CellError>;

    fn has_document(&self, collection: &str, key: &str) -> Result<bool, CellError>;

    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, CellError>;

    fn insert_document(&mut self, collection: &str, document: Document) -> Result<(), CellError>;

    fn update_document(&mut self, collection: &str, document: Document) -> Result<(), CellError>;

    fn find_edge(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<Document>, CellError>;

    fn documents(&self, collection: &str) -> Result<Vec<Document>, CellError>;

    fn count(&self, collection: &str) -> Result<usize, CellError> {
        Ok(self.documents(collection)?.len())
    }

    fn commit(&mut self) -> Result<(), CellError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CollectionKind {
    Vertex,
    Edge { from: Vec<String>, to: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredCollection")]
struct Collection {
    kind: CollectionKind,
    documents: BTreeMap<String, Document>,
    // (from, to) -> edge key; empty for vertex collections
    #[serde(skip)]
    endpoints: HashMap<(String, String), String>,
}

#[derive(Deserialize)]
struct StoredCollection {
    kind: CollectionKind,
    #[serde(default)]
    documents: BTreeMap<String, Document>,
}

impl From<StoredCollection> for Collection {
    fn from(stored: StoredCollection) -> Self {
        let mut collection = Collection::new(stored.kind);
        for (key, document) in stored.documents {
            collection.index(&key, &document);
            collection.documents.insert(key, document);
        }
        collection
    }
}

impl Collection {
    fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            documents: BTreeMap::new(),
            endpoints: HashMap::new(),
        }
    }

    fn index(&mut self, key: &str, document: &Document) {
        if let Some(pair) = edge_endpoints(document)
            && matches!(self.kind, CollectionKind::Edge { .. })
        {
            self.endpoints.insert(pair, key.to_string());
        }
    }

    fn unindex(&mut self, key: &str, document: &Document) {
        if let Some(pair) = edge_endpoints(document)
            && self.endpoints.get(&pair).is_some_and(|indexed| indexed == key)
        {
            self.endpoints.remove(&pair);
        }
    }
}

fn edge_endpoints(document: &Document) -> Option<(String, String)> {
    let from = string_field(document, FROM_FIELD)?;
    let to = string_field(document, TO_FIELD)?;
    Some((from.to_string(), to.to_string()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryGraphStore {
    database: String,
    #[serde(default)]
    graphs: BTreeMap<String, Vec<EdgeDefinition>>,
    #[serde(default)]
    collections: BTreeMap<String, Collection>,
}

impl MemoryGraphStore {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn graph_names(&self) -> Vec<&str> {
        self.graphs.keys().map(String::as_str).collect()
    }

    fn collection(&self, name: &str) -> Result<&Collection, CellError> {
        self.collections
            .get(name)
            .ok_or_else(|| CellError::UnknownCollection(name.to_string()))
    }

    fn collection_mut(&mut self, name: &str) -> Result<&mut Collection, CellError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| CellError::UnknownCollection(name.to_string()))
    }

    fn ensure_collection(&mut self, name: &str, kind: CollectionKind) -> Result<(), CellError> {
        match self.collections.get(name) {
            Some(existing) if existing.kind == kind => Ok(()),
            Some(_) => Err(CellError::InvalidDocument(format!(
                "collection {name} already exists with a different type"
            ))),
            None => {
                debug!(collection = name, "creating collection");
                self.collections
                    .insert(name.to_string(), Collection::new(kind));
                Ok(())
            }
        }
    }

    fn check_endpoint(
        &self,
        edge_key: &str,
        handle: &str,
        allowed: &[String],
    ) -> Result<(), CellError> {
        let (collection, key) = split_handle(handle).ok_or_else(|| {
            CellError::InvalidDocument(format!("edge {edge_key} has malformed handle `{handle}`"))
        })?;
        if !allowed.iter().any(|name| name == collection) {
            return Err(CellError::InvalidDocument(format!(
                "edge {edge_key} may not reference collection {collection}"
            )));
        }
        let exists = self
            .collections
            .get(collection)
            .is_some_and(|target| target.documents.contains_key(key));
        if !exists {
            return Err(CellError::DanglingEdge {
                key: edge_key.to_string(),
                vertex: handle.to_string(),
            });
        }
        Ok(())
    }
}

fn document_key(document: &Document) -> Result<String, CellError> {
    string_field(document, KEY_FIELD)
        .map(str::to_string)
        .ok_or_else(|| CellError::InvalidDocument("document has no string `_key`".to_string()))
}

pub fn string_field<'a>(document: &'a Document, field: &str) -> Option<&'a str> {
    document
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
}

impl GraphStore for MemoryGraphStore {
    fn database(&self) -> &str {
        &self.database
    }

    fn ensure_graph(
        &mut self,
        name: &str,
        vertex_collections: &[&str],
        edges: &[EdgeDefinition],
    ) -> Result<(), CellError> {
        for collection in vertex_collections {
            self.ensure_collection(collection, CollectionKind::Vertex)?;
        }
        for edge in edges {
            for vertex in edge.from.iter().chain(edge.to.iter()) {
                self.ensure_collection(vertex, CollectionKind::Vertex)?;
            }
            self.ensure_collection(
                &edge.collection,
                CollectionKind::Edge {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                },
            )?;
        }
        if !self.graphs.contains_key(name) {
            info!(graph = name, database = %self.database, "creating graph");
            self.graphs.insert(name.to_string(), edges.to_vec());
        }
        Ok(())
    }

    fn has_document(&self, collection: &str, key: &str) -> Result<bool, CellError> {
        Ok(self.collection(collection)?.documents.contains_key(key))
    }

    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, CellError> {
        Ok(self.collection(collection)?.documents.get(key).cloned())
    }

    fn insert_document(&mut self, collection: &str, document: Document) -> Result<(), CellError> {
        let key = document_key(&document)?;
        let target = self.collection(collection)?;
        if target.documents.contains_key(&key) {
            return Err(CellError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        if let CollectionKind::Edge { from, to } = &target.kind {
            let from_handle = string_field(&document, FROM_FIELD).ok_or_else(|| {
                CellError::InvalidDocument(format!("edge {key} has no `_from`"))
            })?;
            let to_handle = string_field(&document, TO_FIELD)
                .ok_or_else(|| CellError::InvalidDocument(format!("edge {key} has no `_to`")))?;
            self.check_endpoint(&key, from_handle, from)?;
            self.check_endpoint(&key, to_handle, to)?;
        }
        let target = self.collection_mut(collection)?;
        target.index(&key, &document);
        target.documents.insert(key, document);
        Ok(())
    }

    fn update_document(&mut self, collection: &str, document: Document) -> Result<(), CellError> {
        let key = document_key(&document)?;
        let target = self.collection_mut(collection)?;
        let Some(previous) = target.documents.remove(&key) else {
            return Err(CellError::DocumentNotFound {
                collection: collection.to_string(),
                key,
            });
        };
        target.unindex(&key, &previous);
        target.index(&key, &document);
        target.documents.insert(key, document);
        Ok(())
    }

    fn find_edge(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<Document>, CellError> {
        let target = self.collection(collection)?;
        Ok(target
            .endpoints
            .get(&(from.to_string(), to.to_string()))
            .and_then(|key| target.documents.get(key))
            .cloned())
    }

    fn documents(&self, collection: &str) -> Result<Vec<Document>, CellError> {
        Ok(self
            .collection(collection)?
            .documents
            .values()
            .cloned()
            .collect())
    }

    fn count(&self, collection: &str) -> Result<usize, CellError> {
        Ok(self.collection(collection)?.documents.len())
    }
}

/// Graph store persisted as a JSON snapshot at `<dir>/<database>.graph.json`.
///
/// Changes are written on `commit`, on `close`, and as a last resort on drop.
#[derive(Debug)]
pub struct FileGraphStore {
    path: Utf8PathBuf,
    inner: MemoryGraphStore,
    dirty: bool,
}

impl FileGraphStore {
    pub fn open(dir: &Utf8Path, database: &str) -> Result<Self, CellError> {
        let path = snapshot_path(dir, database);
        let inner = match Workspace::read_json::<MemoryGraphStore>(&path) {
            Ok(Some(snapshot)) => {
                if snapshot.database != database {
                    return Err(CellError::GraphSnapshot(format!(
                        "{path} holds database {}, expected {database}",
                        snapshot.database
                    )));
                }
                info!(path = %path, "opened graph snapshot");
                snapshot
            }
            Ok(None) => {
                info!(path = %path, database, "creating database");
                MemoryGraphStore::new(database)
            }
            Err(err) => return Err(CellError::GraphSnapshot(err.to_string())),
        };
        Ok(Self {
            path,
            inner,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn close(mut self) -> Result<(), CellError> {
        self.commit()
    }

    fn mark_dirty<T>(&mut self, result: Result<T, CellError>) -> Result<T, CellError> {
        if result.is_ok() {
            self.dirty = true;
        }
        result
    }
}

pub fn snapshot_path(dir: &Utf8Path, database: &str) -> Utf8PathBuf {
    dir.join(format!("{database}.graph.json"))
}

impl GraphStore for FileGraphStore {
    fn database(&self) -> &str {
        self.inner.database()
    }

    fn ensure_graph(
        &mut self,
        name: &str,
        vertex_collections: &[&str],
        edges: &[EdgeDefinition],
    ) -> Result<(), CellError> {
        let result = self.inner.ensure_graph(name, vertex_collections, edges);
        self.mark_dirty(result)
    }

    fn has_document(&self, collection: &str, key: &str) -> Result<bool, CellError> {
        self.inner.has_document(collection, key)
    }

    fn get_document(&self, collection: &str, key: &str) -> Result<Option<Document>, CellError> {
        self.inner.get_document(collection, key)
    }

    fn insert_document(&mut self, collection: &str, document: Document) -> Result<(), CellError> {
        let result = self.inner.insert_document(collection, document);
        self.mark_dirty(result)
    }

    fn update_document(&mut self, collection: &str, document: Document) -> Result<(), CellError> {
        let result = self.inner.update_document(collection, document);
        self.mark_dirty(result)
    }

    fn find_edge(
        &self,
        collection: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<Document>, CellError> {
        self.inner.find_edge(collection, from, to)
    }

    fn documents(&self, collection: &str) -> Result<Vec<Document>, CellError> {
        self.inner.documents(collection)
    }

    fn count(&self, collection: &str) -> Result<usize, CellError> {
        self.inner.count(collection)
    }

    fn commit(&mut self) -> Result<(), CellError> {
        if !self.dirty {
            return Ok(());
        }
        Workspace::write_json(&self.path, &self.inner)
            .map_err(|err| CellError::GraphSnapshot(err.to_string()))?;
        self.dirty = false;
        debug!(path = %self.path, "wrote graph snapshot");
        Ok(())
    }
}

impl Drop for FileGraphStore {
    fn drop(&mut self) {
        if self.dirty
            && let Err(err) = self.commit()
        {
            warn!(path = %self.path, error = %err, "failed to flush graph snapshot");
        }
    }
}

pub fn dangling_edges<S: GraphStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<Vec<String>, CellError> {
    let mut dangling = Vec::new();
    for edge in store.documents(collection)? {
        let key = document_key(&edge)?;
        for field in [FROM_FIELD, TO_FIELD] {
            let resolved = match string_field(&edge, field).and_then(split_handle) {
                Some((vertex_collection, vertex_key)) => {
                    store.has_document(vertex_collection, vertex_key)?
                }
                None => false,
            };
            if !resolved {
                dangling.push(key.clone());
                break;
            }
        }
    }
    Ok(dangling)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn store() -> MemoryGraphStore {
        let mut store = MemoryGraphStore::new("test");
        store
            .ensure_graph(
                "g",
                &["cell", "gene"],
                &[EdgeDefinition::new("cell-gene", &["cell"], &["gene"])],
            )
            .unwrap();
        store
    }

    #[test]
    fn insert_rejects_duplicate_key() {
        let mut store = store();
        store
            .insert_document("gene", doc(json!({"_key": "SFTPC"})))
            .unwrap();
        let err = store
            .insert_document("gene", doc(json!({"_key": "SFTPC"})))
            .unwrap_err();
        assert_matches!(err, CellError::DuplicateKey { .. });
    }

    #[test]
    fn update_requires_existing_document() {
        let mut store = store();
        let err = store
            .update_document("cell", doc(json!({"_key": "AT2"})))
            .unwrap_err();
        assert_matches!(err, CellError::DocumentNotFound { .. });
    }

    #[test]
    fn edge_requires_both_endpoints() {
        let mut store = store();
        store
            .insert_document("cell", doc(json!({"_key": "AT2"})))
            .unwrap();
        let edge = doc(json!({"_key": "AT2-SFTPC", "_from": "cell/AT2", "_to": "gene/SFTPC"}));
        let err = store.insert_document("cell-gene", edge).unwrap_err();
        assert_matches!(err, CellError::DanglingEdge { vertex, .. } if vertex == "gene/SFTPC");
    }

    #[test]
    fn edge_respects_collection_typing() {
        let mut store = store();
        store
            .insert_document("cell", doc(json!({"_key": "AT2"})))
            .unwrap();
        let edge = doc(json!({"_key": "x", "_from": "cell/AT2", "_to": "cell/AT2"}));
        let err = store.insert_document("cell-gene", edge).unwrap_err();
        assert_matches!(err, CellError::InvalidDocument(_));
    }

    #[test]
    fn edge_lookup_follows_updates_and_snapshots() {
        let mut store = store();
        for (collection, key) in [("cell", "AT2"), ("gene", "SFTPC"), ("gene", "NAPSA")] {
            store
                .insert_document(collection, doc(json!({"_key": key})))
                .unwrap();
        }
        let edge = json!({"_key": "e1", "_from": "cell/AT2", "_to": "gene/SFTPC"});
        store.insert_document("cell-gene", doc(edge)).unwrap();
        let moved = json!({"_key": "e1", "_from": "cell/AT2", "_to": "gene/NAPSA"});
        store.update_document("cell-gene", doc(moved)).unwrap();

        assert!(store.find_edge("cell-gene", "cell/AT2", "gene/SFTPC").unwrap().is_none());
        let reloaded: MemoryGraphStore =
            serde_json::from_str(&serde_json::to_string(&store).unwrap()).unwrap();
        let found = reloaded
            .find_edge("cell-gene", "cell/AT2", "gene/NAPSA")
            .unwrap()
            .unwrap();
        assert_eq!(found["_key"], "e1");
    }

    #[test]
    fn unknown_collection_is_an_error() {
        let store = store();
        assert_matches!(
            store.has_document("protein", "P1"),
            Err(CellError::UnknownCollection(name)) if name == "protein"
        );
    }

    #[test]
    fn ensure_graph_is_idempotent() {
        let mut store = store();
        store
            .insert_document("cell", doc(json!({"_key": "AT2"})))
            .unwrap();
        store
            .ensure_graph(
                "g",
                &["cell", "gene"],
                &[EdgeDefinition::new("cell-gene", &["cell"], &["gene"])],
            )
            .unwrap();
        assert_eq!(store.count("cell").unwrap(), 1);
        assert_eq!(store.graph_names(), vec!["g"]);
    }
}
