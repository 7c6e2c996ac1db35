use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use mlready_core::config::{default_libraries, ArtifactCheck, LibraryCheck};
use mlready_core::probe::{CapabilityProber, SystemProber};
use mlready_core::{
    aggregate, ArtifactFetcher, ArtifactSpec, FetchConfig, FetchError, FetchFailure, FetchResult,
    ProbeConfig, ReadinessReport, Verdict,
};

mod render;
mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

const DEFAULT_MODEL_NAME: &str =
    "exp_ObjectNav-RGB-ClipResNet50GRU-DDPPO__stage_02__steps_000415481616.pt";
const DEFAULT_MODEL_URL: &str = concat!(
    "https://pub-fbf23a0d54a0460882efdb338eb7282c.r2.dev/",
    "exp_ObjectNav-RGB-ClipResNet50GRU-DDPPO__stage_02__steps_000415481616.pt"
);
/// Fine-tuned checkpoint that is accepted in place of the downloaded one.
const FINETUNED_MODEL_NAME: &str = "finetuned_floorplan1.pt";
const DEFAULT_MIN_SIZE: u64 = 30 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "mlready", about = "Check an ML workstation and provision its pretrained model")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    artifact: ArtifactArgs,

    #[command(flatten)]
    probe: ProbeArgs,

    #[command(flatten)]
    fetch: FetchArgs,

    /// Print machine-readable JSON instead of the text report
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Probe the environment, download the model if needed, summarize (default)
    Setup,
    /// Probe the environment only
    Check,
    /// Download the model only
    Fetch,
}

#[derive(Args)]
struct ArtifactArgs {
    /// Model download URL
    #[arg(long, global = true, env = "MLREADY_MODEL_URL", default_value = DEFAULT_MODEL_URL)]
    url: String,

    /// Destination path of the model file
    #[arg(long, global = true, env = "MLREADY_MODEL_PATH")]
    dest: Option<PathBuf>,

    /// Directory holding pretrained models
    #[arg(long, global = true, env = "MLREADY_MODEL_DIR", default_value = "pretrained_models")]
    model_dir: PathBuf,

    /// Logical artifact name used in messages
    #[arg(long, global = true, default_value = "pretrained model")]
    name: String,

    /// Files at or below this many bytes are treated as corrupt
    #[arg(long, global = true, env = "MLREADY_MIN_SIZE", default_value_t = DEFAULT_MIN_SIZE)]
    min_size: u64,
}

#[derive(Args)]
struct ProbeArgs {
    /// Python interpreter to probe
    #[arg(long, global = true, env = "MLREADY_PYTHON", default_value = "python3")]
    python: String,

    /// Required Python module as MODULE or MODULE=STATEMENT, where STATEMENT
    /// is a load check run after the import (repeatable; replaces the default list)
    #[arg(long = "library", global = true)]
    libraries: Vec<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// Seconds without received data before an attempt is abandoned
    #[arg(long, global = true, env = "MLREADY_STALL_TIMEOUT", default_value_t = 30)]
    stall_timeout: u64,

    /// Download attempts before giving up
    #[arg(long, global = true, env = "MLREADY_ATTEMPTS", default_value_t = 3)]
    attempts: u32,
}

impl ArtifactArgs {
    fn destination(&self) -> PathBuf {
        self.dest
            .clone()
            .unwrap_or_else(|| self.model_dir.join(DEFAULT_MODEL_NAME))
    }

    fn spec(&self) -> Result<ArtifactSpec, FetchError> {
        ArtifactSpec::new(&self.name, &self.url, self.destination())
            .map(|spec| spec.with_minimum_size(self.min_size))
    }

    fn check(&self) -> ArtifactCheck {
        let mut candidates = vec![self.model_dir.join(FINETUNED_MODEL_NAME)];
        let destination = self.destination();
        if !candidates.contains(&destination) {
            candidates.push(destination);
        }
        ArtifactCheck {
            name: self.name.clone(),
            candidates,
            minimum_size: Some(self.min_size),
        }
    }
}

impl Cli {
    fn probe_config(&self) -> ProbeConfig {
        let libraries = if self.probe.libraries.is_empty() {
            default_libraries()
        } else {
            self.probe.libraries.iter().map(|arg| parse_library(arg)).collect()
        };
        ProbeConfig {
            python: self.probe.python.clone(),
            libraries,
            artifact: Some(self.artifact.check()),
            ..ProbeConfig::default()
        }
    }

    fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            stall_timeout: Duration::from_secs(self.fetch.stall_timeout),
            max_attempts: self.fetch.attempts,
            ..FetchConfig::default()
        }
    }
}

/// `clip` or `clip=clip.load('RN50', device='cpu')`.
fn parse_library(arg: &str) -> LibraryCheck {
    match arg.split_once('=') {
        Some((module, statement)) if !statement.trim().is_empty() => {
            LibraryCheck::new(module.trim()).with_smoke_test(statement.trim())
        }
        Some((module, _)) => LibraryCheck::new(module.trim()),
        None => LibraryCheck::new(arg.trim()),
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: Option<&'a ReadinessReport>,
    fetch: Option<&'a FetchResult>,
    verdict: &'a Verdict,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Setup);

    let report = match command {
        Command::Setup | Command::Check => {
            let prober = SystemProber::new(cli.probe_config());
            Some(prober.probe().await)
        }
        Command::Fetch => None,
    };

    let wants_fetch = match (command, &report) {
        (Command::Fetch, _) => true,
        (Command::Setup, Some(report)) => report.needs_artifact(),
        _ => false,
    };

    let fetch = if wants_fetch {
        Some(run_fetch(&cli).await)
    } else {
        None
    };

    let verdict = match (&report, &fetch) {
        (Some(report), fetch) => aggregate(report, fetch.as_ref()),
        (None, Some(fetch)) => aggregate(&ReadinessReport::new(), Some(fetch)),
        (None, None) => Verdict::default(),
    };

    if cli.json {
        let output = JsonOutput {
            report: report.as_ref(),
            fetch: fetch.as_ref(),
            verdict: &verdict,
        };
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("could not serialize output: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        if let Some(report) = &report {
            println!("{}", render::render_report(report));
        }
        if let Some(fetch) = &fetch {
            println!("{}\n", render::render_fetch(fetch));
        }
        println!("{}", render::render_verdict(&verdict));
    }

    if verdict.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_fetch(cli: &Cli) -> FetchResult {
    let spec = match cli.artifact.spec() {
        Ok(spec) => spec,
        Err(e) => {
            return FetchResult::Failed(FetchFailure {
                artifact: cli.artifact.name.clone(),
                url: cli.artifact.url.clone(),
                destination: cli.artifact.destination(),
                error: e,
            })
        }
    };

    let mut fetcher = match ArtifactFetcher::new(cli.fetch_config()) {
        Ok(fetcher) => fetcher,
        Err(e) => return FetchResult::Failed(FetchFailure::new(&spec, e)),
    };
    if !cli.json {
        fetcher.add_observer(Arc::new(TerminalProgressObserver::new(spec.name())));
    }

    let cancel_token = fetcher.cancel_token().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling download");
            cancel_token.cancel();
        }
    });

    let result = fetcher.ensure(&spec).await;
    interrupt.abort();
    result
}
