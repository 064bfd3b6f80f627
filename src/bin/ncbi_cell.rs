use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ncbi_cell::annotate::OntogptProcess;
use ncbi_cell::app::{Pipeline, StageOptions};
use ncbi_cell::cellxgene::{CellxgeneHttpClient, DatasetRecord, load_catalog};
use ncbi_cell::config::{ConfigLoader, ResolvedConfig};
use ncbi_cell::domain::{Pmid, ProvenancePolicy};
use ncbi_cell::error::CellError;
use ncbi_cell::graph::{FileGraphStore, GraphIngestor};
use ncbi_cell::output::{JsonOutput, OutputMode, sink_for};
use ncbi_cell::pubmed::EutilsHttpClient;
use ncbi_cell::title::TitleResolver;
use ncbi_cell::workspace::{StageCache, Workspace};

#[derive(Parser)]
#[command(name = "ncbi-cell")]
#[command(about = "Link single-cell datasets to PubMed and load cell-type marker genes into a graph")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "JSON config file (default: ./ncbi-cell.json)")]
    config: Option<String>,

    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve publication titles for catalog citations")]
    Titles(CatalogArgs),
    #[command(about = "Resolve PubMed identifiers for resolved titles")]
    Pmids(PmidsArgs),
    #[command(about = "Run OntoGPT annotation for each PMID")]
    Annotate(AnnotateArgs),
    #[command(about = "Download H5AD files for catalog datasets")]
    Download(DownloadArgs),
    #[command(about = "Load NS-Forest result tables into the graph")]
    Ingest(IngestArgs),
    #[command(about = "Run every stage")]
    Run(RunArgs),
}

#[derive(Args)]
struct CatalogArgs {
    #[arg(long, help = "Dataset catalog CSV with dataset_id, collection_id and citation columns")]
    catalog: Utf8PathBuf,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct PmidsArgs {
    #[arg(long, help = "Catalog used to resolve titles when titles.json does not exist yet")]
    catalog: Option<Utf8PathBuf>,

    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct AnnotateArgs {
    #[arg(long = "pmid", help = "PMIDs to annotate (default: the cached pmids.json)")]
    pmids: Vec<Pmid>,
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long)]
    catalog: Utf8PathBuf,
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long, help = "Directory of result tables (default: <workspace>/nsforest)")]
    results: Option<Utf8PathBuf>,

    #[arg(long, value_enum)]
    provenance: Option<ProvenancePolicy>,
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    catalog: Utf8PathBuf,

    #[arg(long)]
    refresh: bool,

    #[arg(long, value_enum)]
    provenance: Option<ProvenancePolicy>,
}

type HttpPipeline = Pipeline<EutilsHttpClient, OntogptProcess, CellxgeneHttpClient>;

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CellError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CellError) -> u8 {
    match error {
        CellError::RateLimited => 4,
        CellError::InvalidPmid(_)
        | CellError::InvalidDatasetId(_)
        | CellError::InvalidSelector { .. }
        | CellError::InvalidPattern(_)
        | CellError::ConfigRead(_)
        | CellError::ConfigParse(_)
        | CellError::CatalogParse(_)
        | CellError::MissingColumn { .. }
        | CellError::MalformedMarkers { .. }
        | CellError::MalformedRow(_) => 2,
        CellError::PageFetch(_)
        | CellError::EutilsHttp(_)
        | CellError::EutilsStatus { .. }
        | CellError::CellxgeneHttp(_)
        | CellError::CellxgeneStatus { .. }
        | CellError::MissingTool(_)
        | CellError::AnnotationFailed { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = OutputMode::from_flag(cli.non_interactive);
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Titles(args) => run_titles(args, &config, output_mode),
        Commands::Pmids(args) => run_pmids(args, &config, output_mode),
        Commands::Annotate(args) => run_annotate(args, &config, output_mode),
        Commands::Download(args) => run_download(args, &config, output_mode),
        Commands::Ingest(args) => run_ingest(args, &config, output_mode),
        Commands::Run(args) => run_all(args, &config, output_mode),
    }
}

fn build_pipeline(
    config: &ResolvedConfig,
    provenance: Option<ProvenancePolicy>,
) -> Result<HttpPipeline, CellError> {
    let workspace = Workspace::new(config.workspace_dir.clone());
    let titles = TitleResolver::from_config(config)?;
    let eutils = EutilsHttpClient::new(config)?;
    let ontogpt = OntogptProcess::new(&config.ontogpt);
    let cellxgene = CellxgeneHttpClient::new(config)?;
    let ingestor = GraphIngestor::new(
        &config.graph.graph_name,
        provenance.unwrap_or(config.graph.provenance),
    );
    Ok(Pipeline::new(
        workspace, titles, eutils, ontogpt, cellxgene, ingestor,
    ))
}

fn read_catalog(path: &Utf8PathBuf) -> Result<Vec<DatasetRecord>, CellError> {
    load_catalog(path.as_std_path())
}

fn run_titles(
    args: CatalogArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let pipeline = build_pipeline(config, None)?;
    let records = read_catalog(&args.catalog)?;
    let options = StageOptions {
        refresh: args.refresh,
    };
    let sink = sink_for(output_mode);
    let result = pipeline.resolve_titles(&records, &options, sink.as_ref())?;
    JsonOutput::print_titles(&result).into_diagnostic()?;
    Ok(())
}

fn run_pmids(
    args: PmidsArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let pipeline = build_pipeline(config, None)?;
    let sink = sink_for(output_mode);
    let cached = Workspace::read_json::<StageCache<String>>(&pipeline.workspace().titles_path())?;
    let titles = match (cached, args.catalog) {
        (Some(cache), _) => cache.entries,
        (None, Some(catalog)) => {
            let records = read_catalog(&catalog)?;
            pipeline
                .resolve_titles(&records, &StageOptions::default(), sink.as_ref())?
                .titles
        }
        (None, None) => {
            return Err(miette::Report::msg(
                "titles.json not found; run `ncbi-cell titles` or pass --catalog",
            ));
        }
    };
    let options = StageOptions {
        refresh: args.refresh,
    };
    let result = pipeline.resolve_pmids(&titles, &options, sink.as_ref())?;
    JsonOutput::print_pmids(&result).into_diagnostic()?;
    Ok(())
}

fn run_annotate(
    args: AnnotateArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let pipeline = build_pipeline(config, None)?;
    let pmids = if args.pmids.is_empty() {
        let path = pipeline.workspace().pmids_path();
        match Workspace::read_json::<StageCache<Pmid>>(&path)? {
            Some(cache) => cache.entries,
            None => {
                return Err(miette::Report::msg(
                    "pmids.json not found; run `ncbi-cell pmids` or pass --pmid",
                ));
            }
        }
    } else {
        args.pmids
    };
    let sink = sink_for(output_mode);
    let result = pipeline.annotate(&pmids, sink.as_ref())?;
    JsonOutput::print_annotate(&result).into_diagnostic()?;
    Ok(())
}

fn run_download(
    args: DownloadArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let pipeline = build_pipeline(config, None)?;
    let records = read_catalog(&args.catalog)?;
    let sink = sink_for(output_mode);
    let result = pipeline.download(&records, sink.as_ref())?;
    JsonOutput::print_download(&result).into_diagnostic()?;
    Ok(())
}

fn run_ingest(
    args: IngestArgs,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let pipeline = build_pipeline(config, args.provenance)?;
    let dir = args
        .results
        .unwrap_or_else(|| pipeline.workspace().results_dir());
    let mut store =
        FileGraphStore::open(&pipeline.workspace().graph_dir(), &config.graph.database)?;
    let sink = sink_for(output_mode);
    let result = pipeline.ingest(&mut store, &dir, sink.as_ref())?;
    store.close()?;
    if result.failed() > 0 {
        warn!(failed = result.failed(), "some result tables were not ingested");
    }
    JsonOutput::print_ingest(&result).into_diagnostic()?;
    Ok(())
}

fn run_all(args: RunArgs, config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let pipeline = build_pipeline(config, args.provenance)?;
    let records = read_catalog(&args.catalog)?;
    let options = StageOptions {
        refresh: args.refresh,
    };
    let mut store =
        FileGraphStore::open(&pipeline.workspace().graph_dir(), &config.graph.database)?;
    let sink = sink_for(output_mode);
    let result = pipeline.run(&records, &mut store, &options, sink.as_ref())?;
    store.close()?;
    JsonOutput::print_run(&result).into_diagnostic()?;
    Ok(())
}
