// Entrypoint for the CLI application.
// - Keeps `main` small: read flags and settings, build the API client and
//   hand it to the UI, either the interactive menu or a one-shot run.
// - Returns `anyhow::Result` so failures print with their context.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use copyrem_cli::{api::ApiClient, config::Settings, model::FlowKind, ui};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Fingerprint-modify audio files or split them into vocals and
/// instrumental, using a copyrem server.
#[derive(Parser, Debug)]
#[command(name = "copyrem", version, about)]
struct Cli {
    /// Base URL of the server, e.g. http://localhost:8080
    #[arg(long, env = "COPYREM_SERVER_URL", global = true)]
    server: Option<String>,

    /// Directory where results are saved
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Settings file [default: <config dir>/copyrem/config.json]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output on stderr (-v warn, -vv info, -vvv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-encode a file with a new fingerprint
    Convert { file: PathBuf },
    /// Split a file into vocals and instrumental
    Separate { file: PathBuf },
    /// Show the limits the server advertises
    Info,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("copyrem_cli={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load settings")?
    .with_overrides(cli.server, cli.output_dir);

    let api = ApiClient::from_settings(&settings).context("Failed to set up the HTTP client")?;

    match cli.command {
        None => ui::main_menu(api, &settings).await?,
        Some(Command::Convert { file }) => ui::run_once(api, &settings, FlowKind::Convert, &file).await?,
        Some(Command::Separate { file }) => ui::run_once(api, &settings, FlowKind::Separate, &file).await?,
        Some(Command::Info) => ui::show_info(&api).await,
    }
    Ok(())
}
