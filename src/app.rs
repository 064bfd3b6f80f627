use std::collections::HashSet;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::annotate::{AnnotationGate, AnnotationOutcome, AnnotationProcess};
use crate::cellxgene::{CellxgeneClient, DatasetDownloader, DatasetRecord, DownloadOutcome};
use crate::domain::Pmid;
use crate::error::CellError;
use crate::graph::{GraphIngestor, GraphStore, IngestSummary};
use crate::markers::{MarkerTable, dataset_id_for_table};
use crate::pubmed::{EutilsClient, IdentifierOutcome, PmidResolver};
use crate::title::{TitleOutcome, TitleResolver};
use crate::workspace::{StageCache, Workspace};

#[derive(Debug, Clone, Default)]
pub struct StageOptions {
    pub refresh: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitlesResult {
    pub cached: bool,
    pub path: String,
    pub records: Vec<TitleItem>,
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleItem {
    pub dataset_id: String,
    pub outcome: TitleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct PmidsResult {
    pub cached: bool,
    pub path: String,
    pub lookups: Vec<PmidItem>,
    pub pmids: Vec<Pmid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PmidItem {
    pub title: String,
    pub outcome: IdentifierOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateResult {
    pub items: Vec<AnnotateItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnnotateItem {
    pub pmid: Pmid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<AnnotationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub items: Vec<DownloadItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadItem {
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DownloadOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub tables: Vec<TableResult>,
}

impl IngestResult {
    pub fn failed(&self) -> usize {
        self.tables.iter().filter(|table| table.error.is_some()).count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TableResult {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<IngestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub titles: TitlesResult,
    pub pmids: PmidsResult,
    pub annotations: AnnotateResult,
    pub downloads: DownloadResult,
    pub ingest: Option<IngestResult>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: None,
    });
}

pub struct Pipeline<E: EutilsClient, P: AnnotationProcess, C: CellxgeneClient> {
    workspace: Workspace,
    titles: TitleResolver,
    pmids: PmidResolver<E>,
    annotations: AnnotationGate<P>,
    downloads: DatasetDownloader<C>,
    ingestor: GraphIngestor,
}

impl<E: EutilsClient, P: AnnotationProcess, C: CellxgeneClient> Pipeline<E, P, C> {
    pub fn new(
        workspace: Workspace,
        titles: TitleResolver,
        eutils: E,
        process: P,
        cellxgene: C,
        ingestor: GraphIngestor,
    ) -> Self {
        let annotations = AnnotationGate::new(process, workspace.annotation_dir());
        let downloads = DatasetDownloader::new(cellxgene, workspace.cellxgene_dir());
        Self {
            workspace,
            titles,
            pmids: PmidResolver::new(eutils),
            annotations,
            downloads,
            ingestor,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn resolve_titles(
        &self,
        records: &[DatasetRecord],
        options: &StageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<TitlesResult, CellError> {
        let path = self.workspace.titles_path();
        if !options.refresh
            && let Some(cache) = Workspace::read_json::<StageCache<String>>(&path)?
        {
            info!(path = %path, titles = cache.entries.len(), "loading titles");
            return Ok(TitlesResult {
                cached: true,
                path: path.to_string(),
                records: Vec::new(),
                titles: cache.entries,
            });
        }

        phase(sink, format!("phase=Titles; resolving {} citations", records.len()));
        let start = Instant::now();
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let outcome = self.titles.resolve(&record.citation);
            items.push(TitleItem {
                dataset_id: record.dataset_id.to_string(),
                outcome,
            });
        }
        let titles = unique(items.iter().filter_map(|item| item.outcome.title()));
        Workspace::write_json(&path, &StageCache::new(titles.clone()))?;
        sink.event(ProgressEvent {
            message: format!("phase=Titles; resolved {} unique titles", titles.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(TitlesResult {
            cached: false,
            path: path.to_string(),
            records: items,
            titles,
        })
    }

    pub fn resolve_pmids(
        &self,
        titles: &[String],
        options: &StageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PmidsResult, CellError> {
        let path = self.workspace.pmids_path();
        if !options.refresh
            && let Some(cache) = Workspace::read_json::<StageCache<Pmid>>(&path)?
        {
            info!(path = %path, pmids = cache.entries.len(), "loading PMIDs");
            return Ok(PmidsResult {
                cached: true,
                path: path.to_string(),
                lookups: Vec::new(),
                pmids: cache.entries,
            });
        }

        phase(sink, format!("phase=Pmids; searching {} titles", titles.len()));
        let start = Instant::now();
        let mut lookups = Vec::with_capacity(titles.len());
        for title in titles {
            let outcome = self.pmids.resolve(title)?;
            lookups.push(PmidItem {
                title: title.clone(),
                outcome,
            });
        }
        let mut seen = HashSet::new();
        let pmids: Vec<Pmid> = lookups
            .iter()
            .filter_map(|item| item.outcome.pmid())
            .filter(|pmid| seen.insert(pmid.as_str().to_string()))
            .cloned()
            .collect();
        Workspace::write_json(&path, &StageCache::new(pmids.clone()))?;
        sink.event(ProgressEvent {
            message: format!("phase=Pmids; resolved {} unique PMIDs", pmids.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(PmidsResult {
            cached: false,
            path: path.to_string(),
            lookups,
            pmids,
        })
    }

    pub fn annotate(
        &self,
        pmids: &[Pmid],
        sink: &dyn ProgressSink,
    ) -> Result<AnnotateResult, CellError> {
        phase(sink, format!("phase=Annotate; {} PMIDs", pmids.len()));
        let mut items = Vec::with_capacity(pmids.len());
        for pmid in pmids {
            match self.annotations.ensure_annotation(Some(pmid)) {
                Ok(outcome) => items.push(AnnotateItem {
                    pmid: pmid.clone(),
                    outcome: Some(outcome),
                    error: None,
                }),
                Err(err @ CellError::AnnotationFailed { .. }) => {
                    error!(pmid = %pmid, error = %err, "annotation failed");
                    items.push(AnnotateItem {
                        pmid: pmid.clone(),
                        outcome: None,
                        error: Some(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(AnnotateResult { items })
    }

    pub fn download(
        &self,
        records: &[DatasetRecord],
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, CellError> {
        phase(sink, format!("phase=Download; {} datasets", records.len()));
        Workspace::ensure_dir(self.downloads.output_dir())?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            let item = match self.downloads.download(record) {
                Ok(outcome) => DownloadItem {
                    dataset_id: record.dataset_id.to_string(),
                    outcome: Some(outcome),
                    error: None,
                },
                Err(err @ CellError::Filesystem(_)) => return Err(err),
                Err(err) => {
                    error!(dataset_id = %record.dataset_id, error = %err, "could not get dataset");
                    DownloadItem {
                        dataset_id: record.dataset_id.to_string(),
                        outcome: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            items.push(item);
        }
        Ok(DownloadResult { items })
    }

    pub fn ingest<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<IngestResult, CellError> {
        let tables = Workspace::list_tables(dir)?;
        phase(sink, format!("phase=Ingest; {} result tables", tables.len()));
        self.ingestor.prepare(store)?;
        let mut results = Vec::with_capacity(tables.len());
        for path in tables {
            let outcome = self.ingest_table(store, &path);
            if let Err(err) = &outcome {
                warn!(path = %path, error = %err, "skipping result table");
            }
            results.push(TableResult {
                path: path.to_string(),
                error: outcome.as_ref().err().map(|err| err.to_string()),
                summary: outcome.ok(),
            });
        }
        store.commit()?;
        Ok(IngestResult { tables: results })
    }

    fn ingest_table<S: GraphStore + ?Sized>(
        &self,
        store: &mut S,
        path: &Utf8Path,
    ) -> Result<IngestSummary, CellError> {
        let dataset_id = dataset_id_for_table(path.as_std_path())?;
        let table = MarkerTable::from_path(path.as_std_path())?;
        self.ingestor.ingest(store, &table, &dataset_id)
    }

    pub fn run<S: GraphStore + ?Sized>(
        &self,
        records: &[DatasetRecord],
        store: &mut S,
        options: &StageOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, CellError> {
        let titles = self.resolve_titles(records, options, sink)?;
        let pmids = self.resolve_pmids(&titles.titles, options, sink)?;
        let annotations = self.annotate(&pmids.pmids, sink)?;
        let downloads = self.download(records, sink)?;
        let results_dir = self.workspace.results_dir();
        let ingest = if results_dir.as_std_path().is_dir() {
            Some(self.ingest(store, &results_dir, sink)?)
        } else {
            info!(path = %results_dir, "no result tables to ingest");
            None
        };
        Ok(RunResult {
            titles,
            pmids,
            annotations,
            downloads,
            ingest,
        })
    }
}

fn unique<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_keeps_first_seen_order() {
        let values = ["b", "a", "b", "c", "a"];
        assert_eq!(unique(values.into_iter()), vec!["b", "a", "c"]);
    }
}
