// UI layer: an interactive menu using `dialoguer`, a progress bar from
// `indicatif` while a job runs, and coloured outcome lines via `crossterm`.
// The same pieces back the one-shot `convert` / `separate` subcommands.

use crate::api::ApiClient;
use crate::backend::Backend;
use crate::blob::BlobStore;
use crate::config::Settings;
use crate::flow::{self, Flow, FlowObserver, NoopObserver, Phase, Status};
use crate::model::{Capabilities, FlowKind};
use crate::picker::{self, format_size, SelectedFile};
use anyhow::{bail, Context, Result};
use crossterm::style::Stylize;
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Progress bar for one job run.
struct TerminalObserver {
    bar: ProgressBar,
}

impl TerminalObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.green/238}] {pos:>3}%  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Arc::new(TerminalObserver { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl FlowObserver for TerminalObserver {
    fn on_phase(&self, phase: &Phase) {
        match phase {
            Phase::Submitting => self.bar.set_message("Uploading…"),
            Phase::Subscribed(job) => self.bar.set_message(format!("Processing… (job {job})")),
            Phase::Idle => self.bar.finish_and_clear(),
            Phase::Succeeded | Phase::Failed => {}
        }
    }

    fn on_progress(&self, percent: u8) {
        self.bar.set_position(u64::from(percent));
    }

    fn on_status(&self, status: &Status) {
        self.bar.finish_and_clear();
        print_status(status);
    }
}

fn print_status(status: &Status) {
    if status.is_error {
        eprintln!("{} {}", "✗".red(), status.message.as_str().red());
    } else {
        println!("{} {}", "✔".green(), status.message.as_str().green());
    }
}

/// Session-wide Ctrl-C listener. While a job runs, Ctrl-C cancels it;
/// otherwise the program exits as it would without a handler.
struct Interrupts {
    job_running: Arc<AtomicBool>,
    requests: UnboundedReceiver<()>,
}

impl Interrupts {
    fn install() -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        let job_running = Arc::new(AtomicBool::new(false));
        let running = job_running.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if running.load(Ordering::SeqCst) {
                    let _ = tx.send(());
                } else {
                    let mut stdout = std::io::stdout();
                    let _ = crossterm::execute!(stdout, crossterm::cursor::Show);
                    std::process::exit(130);
                }
            }
        });
        Interrupts {
            job_running,
            requests,
        }
    }

    /// Drop interrupts left over from an earlier job and start routing new
    /// ones to `cancelled`.
    fn start_job(&mut self) {
        while self.requests.try_recv().is_ok() {}
        self.job_running.store(true, Ordering::SeqCst);
    }

    fn end_job(&self) {
        self.job_running.store(false, Ordering::SeqCst);
    }

    /// Resolves on the next Ctrl-C. Never resolves if the listener is gone.
    async fn cancelled(&mut self) {
        if self.requests.recv().await.is_none() {
            futures::future::pending::<()>().await;
        }
    }
}

/// Run a job for the flow's selected file with a progress bar; Ctrl-C
/// cancels it.
async fn run_flow<B: Backend>(flow: &mut Flow<B>, interrupts: &mut Interrupts) {
    let observer = TerminalObserver::new();
    flow.set_observer(observer.clone());
    interrupts.start_job();
    flow.submit_until(interrupts.cancelled()).await;
    interrupts.end_job();
    flow.set_observer(Arc::new(NoopObserver));
    observer.finish();

    if *flow.phase() == Phase::Idle {
        println!("{}", "Cancelled.".dim());
    }
    for artifact in flow.results() {
        println!(
            "  • {} {}",
            artifact.name.as_str().bold(),
            format!("({}, {})", artifact.stem.label(), format_size(artifact.blob.len() as u64)).dim()
        );
    }
}

/// Reduce a server-supplied name to a bare file name.
fn safe_file_name(name: &str, fallback: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .unwrap_or(fallback)
        .to_string()
}

/// Write every result of the flow into `dir`. In interactive mode an
/// existing file is only replaced after confirmation.
pub fn save_results<B: Backend>(flow: &Flow<B>, dir: &Path, interactive: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let mut saved = Vec::new();
    for artifact in flow.results() {
        let fallback = format!("audio_{}.mp3", artifact.stem.label());
        let path = dir.join(safe_file_name(&artifact.name, &fallback));
        if interactive && path.exists() {
            let overwrite = Confirm::new()
                .with_prompt(format!("{} exists. Overwrite?", path.display()))
                .default(false)
                .interact()?;
            if !overwrite {
                continue;
            }
        }
        artifact
            .blob
            .save_to(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        saved.push(path);
    }
    Ok(saved)
}

fn print_capabilities(caps: &Capabilities) {
    println!("{}", "Server limits".bold());
    println!("  Max upload:   {} MB", caps.max_upload_mb);
    println!("  Formats:      {}", caps.allowed_extensions.join(", "));
    println!("  Output name:  <name>{}", caps.download_suffix());
}

/// `info` subcommand: show what the server advertises, or the defaults.
pub async fn show_info(api: &ApiClient) {
    match api.capabilities().await {
        Ok(caps) => print_capabilities(&caps),
        Err(e) => {
            println!("{}", format!("Server info unavailable ({e}); showing defaults.").dim());
            print_capabilities(&Capabilities::default());
        }
    }
}

/// Stat `path` and hand it to the flow, printing soft warnings.
fn pick_path<B: Backend>(flow: &mut Flow<B>, path: &Path) {
    match SelectedFile::open(path) {
        Ok(file) => {
            for note in file.advisories(flow.capabilities()) {
                println!("{}", note.as_str().dim());
            }
            flow.pick(Some(file));
        }
        Err(e) => println!("{}", e.to_string().red()),
    }
}

fn browse(caps: &Capabilities) -> Option<PathBuf> {
    let extensions: Vec<&str> = caps
        .allowed_extensions
        .iter()
        .map(|e| e.trim_start_matches('.'))
        .collect();
    rfd::FileDialog::new()
        .add_filter("Audio", extensions.as_slice())
        .pick_file()
}

#[derive(Clone, Copy)]
enum Action {
    Browse,
    Paste,
    Start,
    Save,
    Reset,
    Back,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::Browse => "Browse for a file",
            Action::Paste => "Drop or paste a file path",
            Action::Start => "Start",
            Action::Save => "Save results",
            Action::Reset => "Reset",
            Action::Back => "Back",
        }
    }
}

/// Menu for a single flow. Returns when the user picks "Back".
async fn flow_menu(
    flow: &mut Flow<ApiClient>,
    settings: &Settings,
    interrupts: &mut Interrupts,
) -> Result<()> {
    loop {
        if let Some(file) = flow.file() {
            println!(
                "{} {} {}",
                "Selected:".dim(),
                file.name().bold(),
                format!("({})", format_size(file.size())).dim()
            );
        }

        let mut actions = vec![Action::Browse, Action::Paste];
        if flow.file().is_some() {
            actions.push(Action::Start);
        }
        if !flow.results().is_empty() {
            actions.push(Action::Save);
        }
        if flow.can_reset() {
            actions.push(Action::Reset);
        }
        actions.push(Action::Back);

        let labels: Vec<&str> = actions.iter().map(|a| a.label()).collect();
        let selection = Select::new()
            .with_prompt(flow.kind().label())
            .items(&labels)
            .default(0)
            .interact()?;

        match actions[selection] {
            Action::Browse => {
                if let Some(path) = browse(flow.capabilities()) {
                    pick_path(flow, &path);
                }
            }
            Action::Paste => {
                let text: String = Input::new()
                    .with_prompt("Drop a file here or paste its path")
                    .allow_empty(true)
                    .interact_text()?;
                if let Some(path) = picker::parse_dropped(&text) {
                    pick_path(flow, &path);
                }
            }
            Action::Start => run_flow(flow, interrupts).await,
            Action::Save => {
                for path in save_results(flow, &settings.output_dir, true)? {
                    println!("{} {}", "Saved".green(), path.display());
                }
            }
            Action::Reset => flow.reset(),
            Action::Back => return Ok(()),
        }
    }
}

/// Main interactive menu. Loads the server capabilities once, then loops
/// until the user chooses "Exit".
pub async fn main_menu(api: ApiClient, settings: &Settings) -> Result<()> {
    let caps = flow::load_capabilities(&api).await;
    let mut interrupts = Interrupts::install();
    let blobs = BlobStore::new();
    let mut convert = Flow::new(FlowKind::Convert, api.clone())
        .with_capabilities(caps.clone())
        .with_blob_store(blobs.clone());
    let mut separate = Flow::new(FlowKind::Separate, api)
        .with_capabilities(caps.clone())
        .with_blob_store(blobs);

    loop {
        let items = vec![
            "Convert audio (new fingerprint)",
            "Separate vocals / instrumental",
            "Server limits",
            "Exit",
        ];
        let selection = Select::new().items(&items).default(0).interact()?;
        match selection {
            0 => flow_menu(&mut convert, settings, &mut interrupts).await?,
            1 => flow_menu(&mut separate, settings, &mut interrupts).await?,
            2 => print_capabilities(&caps),
            3 => break,
            _ => {}
        }
    }
    Ok(())
}

/// One-shot run: upload `path`, wait for the job, save the results into
/// the output directory.
pub async fn run_once(api: ApiClient, settings: &Settings, kind: FlowKind, path: &Path) -> Result<()> {
    let caps = flow::load_capabilities(&api).await;
    let file = SelectedFile::open(path)
        .with_context(|| format!("Cannot use {} as input", path.display()))?;
    for note in file.advisories(&caps) {
        eprintln!("{}", note.as_str().dim());
    }

    let mut flow = Flow::new(kind, api).with_capabilities(caps);
    flow.pick(Some(file));
    run_flow(&mut flow, &mut Interrupts::install()).await;

    match flow.phase() {
        Phase::Succeeded => {
            for saved in save_results(&flow, &settings.output_dir, false)? {
                println!("{} {}", "Saved".green(), saved.display());
            }
            Ok(())
        }
        Phase::Failed => bail!("{} job failed", kind.label()),
        _ => bail!("{} job cancelled", kind.label()),
    }
}
