use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_vmr::app::{App, IngestResult, MarkerMatchResult, PrecomputeResult, ProgressSink};
use kira_vmr::config::{ConfigLoader, ConfigOverrides};
use kira_vmr::ncbi::NcbiHttpClient;
use kira_vmr::output::{JsonOutput, LogSink};
use kira_vmr::store::WorkDir;
use kira_vmr::tools::{SystemMarkerSearch, ToolStatus};

#[derive(Parser)]
#[command(name = "kira-vmr")]
#[command(about = "Incremental virus taxonomy sequence store and per-genus marker LLR models")]
#[command(version, author)]
struct Cli {
    /// Print the stage summary as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download, resolve, fetch, and assemble (alias: download)")]
    #[command(visible_alias = "download")]
    Ingest(StageArgs),
    #[command(about = "Call ORFs, search markers, and build the feature matrix")]
    MarkerMatch(StageArgs),
    #[command(about = "Compute per-genus LLR models from the feature matrix")]
    Precompute(StageArgs),
}

#[derive(Args, Clone)]
struct StageArgs {
    /// Working directory holding the cache and every artifact.
    #[arg(long)]
    workdir: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    source_url: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=100))]
    batch_size: Option<u16>,

    #[arg(long)]
    workers: Option<usize>,

    /// Remove tool temp files after the stage.
    #[arg(long)]
    cleanup: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let sink: &dyn ProgressSink = if cli.json { &JsonOutput } else { &LogSink };

    match cli.command {
        Commands::Ingest(args) => {
            let app = build_app(&args)?;
            let result = app.ingest(sink)?;
            if cli.json {
                JsonOutput::print_ingest(&result).into_diagnostic()?;
            } else {
                print_ingest_summary(&result);
            }
        }
        Commands::MarkerMatch(args) => {
            let app = build_app(&args)?;
            let result = app.marker_match(sink)?;
            if cli.json {
                JsonOutput::print_marker_match(&result).into_diagnostic()?;
            } else {
                print_marker_match_summary(&result);
            }
        }
        Commands::Precompute(args) => {
            let app = build_app(&args)?;
            let cancel = AtomicBool::new(false);
            let result = app.precompute(&cancel, sink)?;
            if cli.json {
                JsonOutput::print_precompute(&result).into_diagnostic()?;
            } else {
                print_precompute_summary(&result);
            }
        }
    }
    Ok(())
}

fn build_app(args: &StageArgs) -> miette::Result<App<NcbiHttpClient, SystemMarkerSearch>> {
    let workdir = WorkDir::new(args.workdir.as_str());
    workdir.ensure()?;
    let overrides = ConfigOverrides {
        source_url: args.source_url.clone(),
        batch_size: args.batch_size.map(usize::from),
        workers: args.workers,
        cleanup: args.cleanup,
    };
    let config = ConfigLoader::resolve(
        args.config.as_deref(),
        workdir.config_path().into_std_path_buf(),
        overrides,
    )?;
    tracing::debug!(?config, "resolved run configuration");

    let ncbi = NcbiHttpClient::new()?;
    let search = SystemMarkerSearch::new(config.workers);
    if let ToolStatus::Missing { message } = search.tool_status() {
        tracing::debug!("{message}");
    }
    Ok(App::new(workdir, config, ncbi, search))
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn print_ingest_summary(result: &IngestResult) {
    println!("{CYAN}KIRA-VMR ingest{RESET}");
    println!(
        "{GREEN}records: {} of {} rows{RESET}",
        result.records, result.rows
    );
    println!(
        "{GREEN}identifiers: {} cached, {} fetched{RESET}",
        result.fetch.cached, result.fetch.fetched
    );
    if result.fetch.fallback_batches > 0 {
        println!(
            "{YELLOW}batches retried one at a time: {}{RESET}",
            result.fetch.fallback_batches
        );
    }
    println!("{YELLOW}flagged: {}{RESET}", result.flagged);
    println!("   taxonomy: {}", result.taxonomy_path);
    println!("   sequences: {}", result.sequences_path);
}

fn print_marker_match_summary(result: &MarkerMatchResult) {
    println!("{CYAN}KIRA-VMR marker-match{RESET}");
    println!(
        "{GREEN}feature matrix: {} rows x {} markers{RESET}",
        result.rows, result.markers
    );
    println!("{YELLOW}flagged: {}{RESET}", result.flagged);
    println!("   matrix: {}", result.feature_matrix_path);
}

fn print_precompute_summary(result: &PrecomputeResult) {
    println!("{CYAN}KIRA-VMR precompute{RESET}");
    println!("{GREEN}models: {}{RESET}", result.models.len());
    for model in &result.models {
        println!("   {} ({}, {} members)", model.genus, model.tier, model.members);
    }
    if !result.excluded.is_empty() {
        println!(
            "{YELLOW}genera below minimum size: {}{RESET}",
            result.excluded.len()
        );
    }
    println!("   summary: {}", result.summary_path);
}
