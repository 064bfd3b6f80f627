use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use ncbi_cell::annotate::{AnnotationOutcome, AnnotationProcess};
use ncbi_cell::app::{Pipeline, ProgressEvent, ProgressSink, StageOptions};
use ncbi_cell::cellxgene::{
    CellxgeneClient, DatasetAsset, DatasetMetadata, DatasetRecord, DownloadOutcome,
};
use ncbi_cell::config::default_title_selectors;
use ncbi_cell::domain::{DatasetId, Pmid, ProvenancePolicy};
use ncbi_cell::error::CellError;
use ncbi_cell::graph::{CELL_COLLECTION, GraphIngestor, GraphStore, MemoryGraphStore};
use ncbi_cell::output::JsonOutput;
use ncbi_cell::pubmed::{EutilsClient, SearchResult};
use ncbi_cell::title::{
    FetchedPage, PageFetcher, ScriptPatternStrategy, SelectorStrategy, TitleResolver,
    TitleStrategy,
};
use ncbi_cell::workspace::Workspace;

const ARTICLE_URL: &str = "https://example.org/article123";

struct MockPages;

impl PageFetcher for MockPages {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch(&self, url: &str) -> Result<FetchedPage, CellError> {
        if url != ARTICLE_URL {
            return Err(CellError::PageFetch(format!("unreachable: {url}")));
        }
        Ok(FetchedPage {
            status: 200,
            body: "<html><body><h1 class=\"c-article-title\">Foo Bar</h1></body></html>"
                .to_string(),
        })
    }
}

#[derive(Default)]
struct MockEutils {
    rate_limited: bool,
    searches: Mutex<usize>,
}

impl EutilsClient for MockEutils {
    fn search_title(&self, title: &str) -> Result<SearchResult, CellError> {
        *self.searches.lock().unwrap() += 1;
        if self.rate_limited {
            return Err(CellError::RateLimited);
        }
        match title {
            "Foo Bar" => Ok(SearchResult {
                count: 2,
                ids: vec!["111".to_string(), "222".to_string()],
            }),
            _ => Ok(SearchResult {
                count: 0,
                ids: Vec::new(),
            }),
        }
    }

    fn fetch_article_title(&self, pmid: &Pmid) -> Result<Option<String>, CellError> {
        Ok(Some(match pmid.as_str() {
            "222" => "Foo Bar.".to_string(),
            _ => "Other.".to_string(),
        }))
    }
}

#[derive(Default)]
struct FakeOntogpt {
    calls: Mutex<usize>,
}

impl AnnotationProcess for FakeOntogpt {
    fn annotate(&self, _pmid: &Pmid, output: &Path) -> Result<(), CellError> {
        *self.calls.lock().unwrap() += 1;
        std::fs::write(output, "annotation").unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct MockCellxgene {
    interrupted: Option<&'static str>,
}

impl CellxgeneClient for MockCellxgene {
    fn fetch_dataset(
        &self,
        _collection_id: &str,
        dataset_id: &DatasetId,
    ) -> Result<DatasetMetadata, CellError> {
        if dataset_id.as_str() == "ds-3" {
            return Err(CellError::CellxgeneStatus {
                status: 404,
                message: "not found".to_string(),
            });
        }
        Ok(DatasetMetadata {
            dataset_id: dataset_id.to_string(),
            assets: vec![DatasetAsset {
                filetype: "H5AD".to_string(),
                url: format!("https://example.org/{dataset_id}.h5ad"),
            }],
        })
    }

    fn download_asset(&self, url: &str, destination: &Path) -> Result<(), CellError> {
        if self.interrupted.is_some_and(|id| url.contains(id)) {
            return Err(CellError::CellxgeneHttp(format!("download {url}: connection reset")));
        }
        std::fs::write(destination, b"h5ad").unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event.message);
    }
}

fn workspace() -> (tempfile::TempDir, Workspace) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Workspace::new(root))
}

fn pipeline(
    workspace: Workspace,
    eutils: MockEutils,
) -> Pipeline<MockEutils, FakeOntogpt, MockCellxgene> {
    pipeline_with(workspace, eutils, MockCellxgene::default())
}

fn pipeline_with(
    workspace: Workspace,
    eutils: MockEutils,
    cellxgene: MockCellxgene,
) -> Pipeline<MockEutils, FakeOntogpt, MockCellxgene> {
    let strategies: Vec<Box<dyn TitleStrategy>> = vec![
        Box::new(SelectorStrategy::new(Box::new(MockPages), &default_title_selectors()).unwrap()),
        Box::new(ScriptPatternStrategy::new(Box::new(MockPages)).unwrap()),
    ];
    Pipeline::new(
        workspace,
        TitleResolver::new(strategies),
        eutils,
        FakeOntogpt::default(),
        cellxgene,
        GraphIngestor::new("cell-gene", ProvenancePolicy::Dedup),
    )
}

fn records() -> Vec<DatasetRecord> {
    let citation = format!("Publication: {ARTICLE_URL} Dataset Version: 2");
    vec![
        DatasetRecord {
            dataset_id: "ds-1".parse().unwrap(),
            collection_id: "col-1".to_string(),
            citation: citation.clone(),
        },
        DatasetRecord {
            dataset_id: "ds-2".parse().unwrap(),
            collection_id: "col-1".to_string(),
            citation,
        },
        DatasetRecord {
            dataset_id: "ds-3".parse().unwrap(),
            collection_id: "col-2".to_string(),
            citation: "Dataset Version: 3".to_string(),
        },
    ]
}

fn write_results(workspace: &Workspace) {
    let dir = workspace.results_dir();
    std::fs::create_dir_all(dir.as_std_path()).unwrap();
    std::fs::write(
        dir.join("dsA_results.csv").as_std_path(),
        "clusterName,NSForest_markers\nAlveolar Type 2,\"['SFTPC','NAPSA']\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("dsB_results.csv").as_std_path(),
        "clusterName,markers\nBasal,\"['KRT5']\"\n",
    )
    .unwrap();
}

#[test]
fn run_links_catalog_to_graph() {
    let (_temp, workspace) = workspace();
    write_results(&workspace);
    let pipeline = pipeline(workspace.clone(), MockEutils::default());
    let mut store = MemoryGraphStore::new("ncbi-cell");
    let sink = RecordingSink::default();

    let result = pipeline
        .run(&records(), &mut store, &StageOptions::default(), &sink)
        .unwrap();

    assert_eq!(result.titles.titles, vec!["Foo Bar"]);
    assert_eq!(result.titles.records.len(), 3);
    assert_eq!(result.pmids.pmids, vec!["222".parse::<Pmid>().unwrap()]);
    assert_eq!(result.annotations.items.len(), 1);
    assert_matches!(
        result.annotations.items[0].outcome,
        Some(AnnotationOutcome::Annotated { .. })
    );

    assert_eq!(result.downloads.items.len(), 3);
    assert_matches!(
        result.downloads.items[0].outcome,
        Some(DownloadOutcome::Downloaded { .. })
    );
    assert!(result.downloads.items[2].error.is_some());

    let ingest = result.ingest.as_ref().unwrap();
    assert_eq!(ingest.tables.len(), 2);
    assert_eq!(ingest.failed(), 1);
    assert_eq!(ingest.tables[0].summary.as_ref().unwrap().dataset_id, "dsA");
    assert!(ingest.tables[1].error.as_ref().unwrap().contains("NSForest_markers"));
    assert!(store.has_document(CELL_COLLECTION, "Alveolar_Type_2").unwrap());

    assert!(workspace.titles_path().as_std_path().exists());
    assert!(workspace.pmids_path().as_std_path().exists());
    assert!(
        sink.events
            .lock()
            .unwrap()
            .iter()
            .any(|message| message.starts_with("phase=Ingest"))
    );
    JsonOutput::print_run(&result).unwrap();
}

#[test]
fn second_run_reuses_cached_stages() {
    let (_temp, workspace) = workspace();
    let mut store = MemoryGraphStore::new("ncbi-cell");
    let sink = RecordingSink::default();

    let first = pipeline(workspace.clone(), MockEutils::default());
    first
        .run(&records(), &mut store, &StageOptions::default(), &sink)
        .unwrap();

    let second = pipeline(workspace.clone(), MockEutils::default());
    let result = second
        .run(&records(), &mut store, &StageOptions::default(), &sink)
        .unwrap();
    assert!(result.titles.cached);
    assert!(result.pmids.cached);
    assert_eq!(result.pmids.pmids, vec!["222".parse::<Pmid>().unwrap()]);
    assert_matches!(
        result.annotations.items[0].outcome,
        Some(AnnotationOutcome::Cached { .. })
    );
    assert!(result.ingest.is_none());
}

#[test]
fn rate_limit_stops_the_run_without_caching_pmids() {
    let (_temp, workspace) = workspace();
    let eutils = MockEutils {
        rate_limited: true,
        ..MockEutils::default()
    };
    let pipeline = pipeline(workspace.clone(), eutils);
    let mut store = MemoryGraphStore::new("ncbi-cell");

    let err = pipeline
        .run(
            &records(),
            &mut store,
            &StageOptions::default(),
            &RecordingSink::default(),
        )
        .unwrap_err();
    assert_matches!(err, CellError::RateLimited);
    assert!(workspace.titles_path().as_std_path().exists());
    assert!(!workspace.pmids_path().as_std_path().exists());
}

#[test]
fn refresh_ignores_cached_titles() {
    let (_temp, workspace) = workspace();
    let sink = RecordingSink::default();
    let pipeline = pipeline(workspace.clone(), MockEutils::default());
    pipeline
        .resolve_titles(&records(), &StageOptions::default(), &sink)
        .unwrap();
    let refreshed = pipeline
        .resolve_titles(&records(), &StageOptions { refresh: true }, &sink)
        .unwrap();
    assert!(!refreshed.cached);
    assert_eq!(refreshed.titles, vec!["Foo Bar"]);
}

#[test]
fn interrupted_download_is_recorded_per_dataset() {
    let (_temp, workspace) = workspace();
    let cellxgene = MockCellxgene {
        interrupted: Some("ds-1"),
    };
    let pipeline = pipeline_with(workspace.clone(), MockEutils::default(), cellxgene);

    let result = pipeline
        .download(&records(), &RecordingSink::default())
        .unwrap();
    assert_eq!(result.items.len(), 3);
    assert!(result.items[0].error.as_ref().unwrap().contains("connection reset"));
    assert_matches!(
        result.items[1].outcome,
        Some(DownloadOutcome::Downloaded { .. })
    );
    assert!(!workspace.cellxgene_dir().join("ds-1.H5AD").as_std_path().exists());
}
