use crate::{
    backend::HttpBackend,
    config::Config,
    error::AnalysisError,
    progress::ProgressDisplay,
    replay::{Fixture, ReplayServer},
    sequencer::{AnalysisEvent, Analyzer, Outcome},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "magic-price")]
#[command(about = "Probe a booking URL through every CID and report the lowest price")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./magic-price.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one analysis against the scrape backend.
    Run {
        url: String,
        /// Backend base URL, overriding the config.
        #[arg(long)]
        backend: Option<String>,
        /// Do not poll the backend for intra-step progress.
        #[arg(long)]
        no_sub_progress: bool,
        /// Wait for Enter before each step after the first.
        #[arg(long)]
        step_by_step: bool,
    },
    /// Print the effective probe plan.
    Probes {},
    /// Serve recorded replies as a stand-in backend.
    Replay {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long)]
        port: Option<u16>,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    init_logging(&args, &cfg)?;

    match args.cmd {
        Command::Run {
            url,
            backend,
            no_sub_progress,
            step_by_step,
        } => run(cfg, &url, backend, no_sub_progress, step_by_step).await,
        Command::Probes {} => probes(&cfg),
        Command::Replay { fixture, port } => replay(&cfg, &fixture, port).await,
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    if let Some(p) = user {
        return Config::load(p);
    }
    let default = PathBuf::from("magic-price.toml");
    if default.exists() {
        Config::load(&default)
    } else {
        Ok(Config::default())
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<()> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

async fn run(
    mut cfg: Config,
    url: &str,
    backend_override: Option<String>,
    no_sub_progress: bool,
    step_by_step: bool,
) -> Result<()> {
    if let Some(base) = backend_override {
        cfg.backend.base_url = base;
    }
    if no_sub_progress {
        cfg.progress.sub_progress = false;
    }
    if step_by_step {
        cfg.sequencer.auto_advance = false;
    }

    let plan = cfg.probe_plan().context("invalid probe plan")?;
    let backend = HttpBackend::new(&cfg.backend)?;
    let (tx, rx) = mpsc::channel::<AnalysisEvent>(32);
    let analyzer = Analyzer::with_events(backend, plan, cfg.sequencer.clone(), cfg.progress.clone(), tx);

    let printer = tokio::spawn(log_events(rx));
    let watcher = tokio::spawn(log_progress(analyzer.progress().subscribe()));

    let outcome = tokio::select! {
        outcome = drive(&analyzer, url) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping analysis");
            analyzer.stop().await;
            Ok(Outcome::Stopped)
        }
    };

    watcher.abort();
    let summary = analyzer.snapshot().await;
    drop(analyzer);
    let _ = printer.await;

    match outcome {
        Ok(Outcome::Completed(summary)) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Ok(_) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!("{}", e.user_message());
            if !e.is_input_error() {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Err(e.into())
        }
    }
}

async fn drive(analyzer: &Analyzer<HttpBackend>, url: &str) -> Result<Outcome, AnalysisError> {
    let mut outcome = analyzer.run(url).await?;
    loop {
        match outcome {
            Outcome::AwaitingContinue { next_step, label } => {
                info!("press Enter to run step {next_step} ({label})");
                wait_for_enter().await;
                outcome = analyzer.continue_step().await?;
            }
            done => return Ok(done),
        }
    }
}

async fn wait_for_enter() {
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    })
    .await;
    if let Ok(Err(e)) = read {
        warn!("reading stdin failed: {e}");
    }
}

async fn log_events(mut rx: mpsc::Receiver<AnalysisEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            AnalysisEvent::Started { url, total_steps } => {
                info!("START {url} ({total_steps} steps)")
            }
            AnalysisEvent::StepStarted { step, label, phase } => {
                info!("STEP {step} {label} [{phase:?}]")
            }
            AnalysisEvent::StepCompleted {
                step,
                cid_name,
                prices,
                ..
            } => info!("DONE {step} {cid_name}: {prices} price(s)"),
            AnalysisEvent::LowestPriceChanged { lowest, discount } => {
                info!("LOWEST {} via {} ({discount}) {}", lowest.price, lowest.cid_name, lowest.url)
            }
            AnalysisEvent::SearchPhaseCompleted => info!("search phase complete, card phase next"),
            AnalysisEvent::Completed { summary } => {
                info!("COMPLETE {} steps, {} prices found", summary.current_step, summary.total_found)
            }
            AnalysisEvent::Stopped => info!("STOPPED"),
            AnalysisEvent::InvalidLink { message } => warn!("INVALID LINK: {message}"),
            AnalysisEvent::Halted { message } => warn!("HALTED: {message}"),
            AnalysisEvent::AwaitingContinue { next_step, label } => {
                info!("PAUSED before step {next_step} {label}")
            }
        }
    }
}

async fn log_progress(mut rx: watch::Receiver<ProgressDisplay>) {
    let mut last_shown = -1i64;
    while rx.changed().await.is_ok() {
        let display = rx.borrow_and_update().clone();
        let shown = display.overall.round() as i64;
        if shown != last_shown {
            last_shown = shown;
            match &display.sub {
                Some(sub) => debug!("progress {shown}% (step: {})", sub.label),
                None => debug!("progress {shown}%"),
            }
        }
    }
}

fn probes(cfg: &Config) -> Result<()> {
    let plan = cfg.probe_plan().context("invalid probe plan")?;
    let rows: Vec<_> = plan
        .iter()
        .map(|(step, phase, probe)| {
            serde_json::json!({
                "step": step,
                "phase": phase,
                "name": probe.name,
                "cid": probe.cid,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn replay(cfg: &Config, fixture: &Path, port: Option<u16>) -> Result<()> {
    let fixture = Fixture::load(fixture)?;
    let server = ReplayServer::bind(fixture, &cfg.replay.bind, port.unwrap_or(cfg.replay.port))?;
    info!("replay backend listening on http://{}", server.addr());

    let handle = server.handle();
    tokio::select! {
        res = server.run() => res.context("replay server failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down replay backend");
            handle.stop(true).await;
        }
    }
    Ok(())
}
