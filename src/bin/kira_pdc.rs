use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_pdc_downloader::app::{App, CatalogSummary, ProgressSink, RunSummary};
use kira_pdc_downloader::catalog::PdcHttpClient;
use kira_pdc_downloader::config::{Config, ConfigLoader, ResolvedConfig};
use kira_pdc_downloader::downloader::IntegrityPolicy;
use kira_pdc_downloader::error::PdcError;
use kira_pdc_downloader::fetcher::HttpFetcher;
use kira_pdc_downloader::output::{JsonOutput, LogSink, OutputMode};

#[derive(Parser)]
#[command(name = "kira-pdc")]
#[command(about = "Download the smallest files of the Proteomic Data Commons catalog with MD5 verification")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true, help = "Print the summary as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Query the catalog, write it sorted by size and download the smallest files")]
    Run(SettingsArgs),
    #[command(about = "Query the catalog and write it sorted by size")]
    Catalog(SettingsArgs),
    #[command(about = "Download the smallest files listed in an existing catalog CSV")]
    Download(DownloadArgs),
}

#[derive(Args, Clone)]
struct SettingsArgs {
    #[arg(long, help = "Path to a kira-pdc.json config file")]
    config: Option<String>,

    #[arg(long, help = "PDC GraphQL endpoint")]
    endpoint: Option<String>,

    #[arg(long, value_name = "BOOL", help = "Accept the data use agreement in catalog queries")]
    accept_dua: Option<bool>,

    #[arg(short = 'j', long, help = "Number of parallel downloads [default: 4]")]
    concurrency: Option<usize>,

    #[arg(short = 'n', long, help = "Number of smallest files to download [default: 1000]")]
    limit: Option<usize>,

    #[arg(short = 'o', long, help = "Directory for downloaded files")]
    output_dir: Option<String>,

    #[arg(long, help = "Where to write the size-sorted catalog CSV")]
    catalog_csv: Option<String>,

    #[arg(long, help = "Where to write the download log CSV")]
    download_log: Option<String>,

    #[arg(long, help = "HTTP request timeout in seconds [default: 300]")]
    timeout_secs: Option<u64>,

    #[arg(long, help = "Fail downloads whose MD5 differs from the catalog")]
    strict_integrity: bool,
}

impl SettingsArgs {
    fn overrides(&self) -> Config {
        Config {
            schema_version: None,
            endpoint: self.endpoint.clone(),
            accept_dua: self.accept_dua,
            concurrency: self.concurrency,
            limit: self.limit,
            output_dir: self.output_dir.clone(),
            catalog_csv: self.catalog_csv.clone(),
            download_log: self.download_log.clone(),
            timeout_secs: self.timeout_secs,
            integrity: self.strict_integrity.then_some(IntegrityPolicy::Reject),
        }
    }

    fn resolve(&self) -> Result<ResolvedConfig, PdcError> {
        ConfigLoader::resolve(self.config.as_deref(), self.overrides())
    }
}

#[derive(Args, Clone)]
struct DownloadArgs {
    #[arg(help = "Catalog CSV written by `kira-pdc catalog`")]
    catalog: Utf8PathBuf,

    #[command(flatten)]
    settings: SettingsArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<PdcError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PdcError) -> u8 {
    match error {
        PdcError::ConfigRead(_) | PdcError::ConfigParse(_) | PdcError::InvalidConfig(_) => 2,
        PdcError::Catalog(_)
        | PdcError::CatalogStatus { .. }
        | PdcError::Network { .. }
        | PdcError::HttpStatus { .. } => 3,
        PdcError::BatchFailed { .. } => 4,
        _ => 1,
    }
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };

    match cli.command {
        Commands::Run(args) => {
            let config = args.resolve()?;
            let app = build_app(&config)?;
            let summary = app.run(&config, sink)?;
            report_run(&summary, output_mode)?;
            summary.ensure_success()?;
            Ok(())
        }
        Commands::Catalog(args) => {
            let config = args.resolve()?;
            let app = build_app(&config)?;
            let summary = app.catalog(&config, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_catalog(&summary).into_diagnostic()?,
                OutputMode::Human => print_catalog_summary(&summary),
            }
            Ok(())
        }
        Commands::Download(args) => {
            let config = args.settings.resolve()?;
            let app = build_app(&config)?;
            let summary = app.download_from_catalog(&args.catalog, &config, sink)?;
            report_run(&summary, output_mode)?;
            summary.ensure_success()?;
            Ok(())
        }
    }
}

fn build_app(config: &ResolvedConfig) -> Result<App<PdcHttpClient, HttpFetcher>, PdcError> {
    let client = PdcHttpClient::new(&config.endpoint, config.timeout)?;
    let fetcher = HttpFetcher::new(config.timeout)?;
    Ok(App::new(client, fetcher))
}

fn report_run(summary: &RunSummary, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => JsonOutput::print_run(summary).into_diagnostic(),
        OutputMode::Human => {
            print_run_summary(summary);
            Ok(())
        }
    }
}

fn print_catalog_summary(summary: &CatalogSummary) {
    let cyan = "\x1b[36m";
    let green = "\x1b[32m";
    let reset = "\x1b[0m";

    println!("{cyan}📦 KIRA-PDC catalog{reset}");
    println!(
        "{green}✅ {} files in {} studies ({} versions), {} bytes{reset}",
        summary.files, summary.studies, summary.study_versions, summary.total_bytes
    );
    println!("{cyan}   📄 catalog: {}{reset}", summary.catalog_csv);
}

fn print_run_summary(summary: &RunSummary) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}📦 KIRA-PDC summary{reset}");
    println!(
        "{green}✅ Downloaded files: {} of {} selected ({} in catalog){reset}",
        summary.downloaded, summary.selected, summary.catalog_files
    );
    if summary.mismatched > 0 {
        println!(
            "{yellow}⚠️ Checksum mismatches: {}{reset}",
            summary.mismatched
        );
        for item in summary.downloads.iter().filter(|item| !item.checksum_ok) {
            println!("{yellow}   • {} ({}){reset}", item.file_id, item.path);
        }
    }
    let color = if summary.failed > 0 { red } else { green };
    println!("{color}❌ Errors: {}{reset}", summary.failed);
    for failure in &summary.failures {
        println!(
            "{red}   • {} {}: {}{reset}",
            failure.file_id, failure.file, failure.message
        );
    }
    println!("{cyan}   📁 files: {}{reset}", summary.output_dir);
    println!("{cyan}   🗃️  log: {}{reset}", summary.download_log);
}
