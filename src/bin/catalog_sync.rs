use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use catalog_sync::app::{App, SyncOptions, SyncResult};
use catalog_sync::client::{CatalogHttpClient, DistributionClient};
use catalog_sync::config::{ConfigLoader, ConfigOverrides};
use catalog_sync::domain::DatasetId;
use catalog_sync::error::SyncError;
use catalog_sync::output::{ConsoleOutput, JsonOutput, OutputMode};
use catalog_sync::store::Store;

#[derive(Parser)]
#[command(name = "catalog-sync")]
#[command(about = "Download theme-matching CSV datasets from a catalog manifest when they change")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./catalog-sync.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Output directory holding datasets and the download ledger
    #[arg(long, global = true)]
    data_dir: Option<String>,

    /// Print a JSON document instead of console lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download new or updated datasets (default)")]
    Sync(SyncArgs),
    #[command(about = "Show the download ledger")]
    Ledger,
    #[command(about = "Show ledger entry and artifacts for one dataset")]
    Info(InfoArgs),
}

#[derive(Args, Clone, Default)]
struct SyncArgs {
    /// JSON manifest listing dataset records
    #[arg(long)]
    manifest: Option<String>,

    /// Theme a record must carry to be synced
    #[arg(long)]
    theme: Option<String>,

    /// Number of concurrent downloads
    #[arg(long)]
    workers: Option<usize>,

    /// Per-request timeout in seconds, 0 disables it
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Download every matching dataset regardless of the ledger
    #[arg(long)]
    force: bool,

    /// Report what would be downloaded without touching the network or disk
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct InfoArgs {
    identifier: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<SyncError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SyncError) -> u8 {
    match error {
        err if err.is_fatal_input() => 2,
        SyncError::DatasetNotFound(_) => 2,
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
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Console
    };

    match cli.command.unwrap_or_else(|| Commands::Sync(SyncArgs::default())) {
        Commands::Sync(args) => run_sync(args, cli.config, cli.data_dir, output_mode),
        Commands::Ledger => {
            let store = read_only_store(cli.config, cli.data_dir)?;
            run_ledger(App::new(store, NopClient), output_mode)
        }
        Commands::Info(args) => {
            let store = read_only_store(cli.config, cli.data_dir)?;
            run_info(args, App::new(store, NopClient), output_mode)
        }
    }
}

fn run_sync(
    args: SyncArgs,
    config: Option<String>,
    data_dir: Option<String>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(
        config.as_deref(),
        ConfigOverrides {
            manifest: args.manifest,
            data_dir,
            theme: args.theme,
            workers: args.workers,
            timeout_secs: args.timeout_secs,
        },
    )?;

    let client = CatalogHttpClient::new(resolved.timeout)?;
    let app = App::new(Store::new(resolved.data_dir.clone()), client);
    let options = SyncOptions {
        workers: resolved.workers,
        force: args.force,
        dry_run: args.dry_run,
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.run(&resolved.manifest, &resolved.theme, &options, &JsonOutput)?;
            JsonOutput::print_sync(&result).into_diagnostic()?;
        }
        OutputMode::Console => {
            let result = app.run(&resolved.manifest, &resolved.theme, &options, &ConsoleOutput)?;
            print_sync_summary(&result);
        }
    }
    Ok(())
}

fn run_ledger<C: DistributionClient>(app: App<C>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.ledger()?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_ledger(&result).into_diagnostic()?,
        OutputMode::Console => {
            println!("ledger: {} ({} entries)", result.path, result.entries.len());
            for entry in &result.entries {
                println!(
                    "{}  modified={}  downloaded={}",
                    entry.landing_page_code, entry.last_modified_date, entry.last_downloaded_date
                );
            }
        }
    }
    Ok(())
}

fn run_info<C: DistributionClient>(
    args: InfoArgs,
    app: App<C>,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let id: DatasetId = args.identifier.parse()?;
    let result = app.info(&id)?;
    match output_mode {
        OutputMode::Json => JsonOutput::print_info(&result).into_diagnostic()?,
        OutputMode::Console => {
            println!("dataset: {}", result.id);
            println!(
                "last modified: {}",
                result.last_modified_date.as_deref().unwrap_or("-")
            );
            println!(
                "last downloaded: {}",
                result.last_downloaded_date.as_deref().unwrap_or("-")
            );
            println!("artifacts: {}", result.artifacts.len());
            if let Some(path) = &result.latest_artifact {
                println!("latest: {path}");
            }
        }
    }
    Ok(())
}

fn read_only_store(config: Option<String>, data_dir: Option<String>) -> miette::Result<Store> {
    let data_dir = ConfigLoader::resolve_data_dir(config.as_deref(), data_dir)?;
    Ok(Store::new(data_dir))
}

fn print_sync_summary(result: &SyncResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}catalog-sync summary: {} of {} datasets matched theme {:?}{reset}",
        result.matched, result.total_records, result.theme
    );
    if result.dry_run {
        println!("{green}Would download: {}{reset}", result.would_download);
    } else {
        println!("{green}Downloaded: {}{reset}", result.downloaded);
    }
    println!("{yellow}No new data: {}{reset}", result.skipped);
    println!("{red}Errors: {}{reset}", result.failed);
    for failure in result.failures() {
        if let catalog_sync::app::RecordOutcome::Failed { id, reason, .. } = failure {
            println!(
                "{red}  {}: {reason}{reset}",
                id.as_deref().unwrap_or("<unknown>")
            );
        }
    }
    if !result.dry_run {
        println!("All downloads completed.");
    }
}

/// Client for commands that only read local state.
struct NopClient;

impl DistributionClient for NopClient {
    fn download(&self, _url: &str) -> Result<Vec<u8>, SyncError> {
        Err(SyncError::Http("download client not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn bad_input_exits_with_two() {
        assert_eq!(map_exit_code(&SyncError::MissingManifest), 2);
        assert_eq!(
            map_exit_code(&SyncError::ManifestParse("expected value".to_string())),
            2
        );
        assert_eq!(
            map_exit_code(&SyncError::ManifestRead(PathBuf::from("items.json"))),
            2
        );
        assert_eq!(
            map_exit_code(&SyncError::ConfigParse("trailing comma".to_string())),
            2
        );
        assert_eq!(
            map_exit_code(&SyncError::DatasetNotFound("abcd-1234".to_string())),
            2
        );
    }

    #[test]
    fn other_failures_exit_with_one() {
        assert_eq!(
            map_exit_code(&SyncError::LedgerRead("bad row".to_string())),
            1
        );
        assert_eq!(
            map_exit_code(&SyncError::Filesystem("permission denied".to_string())),
            1
        );
    }
}
