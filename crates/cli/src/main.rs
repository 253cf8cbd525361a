//! CLI entrypoint and subcommand orchestration.

mod config;
mod daemon;
mod qr;
mod status;
#[cfg(test)]
mod test_support;

use clap::{Parser, Subcommand};

#[cfg(not(test))]
use std::sync::Arc;

#[cfg(not(test))]
use agent::CompletionGateway;
#[cfg(not(test))]
use channels::WhatsAppBridge;
#[cfg(not(test))]
use config::Config;
#[cfg(not(test))]
use gateway::{CredentialStore, Dispatcher, MessageRouter, SessionManager, SessionSnapshot};
#[cfg(not(test))]
use status::StatusLine;
#[cfg(not(test))]
use tokio::sync::{Notify, watch};
#[cfg(not(test))]
use tracing::{error, info, warn};
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Top-level command-line arguments for wagpt.
#[derive(Parser)]
#[command(name = "wagpt")]
#[command(about = "WhatsApp chat assistant gateway", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug logging to ~/.wagpt/logs/
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the gateway: keep the WhatsApp session alive and answer `!gpt` messages
    Start,
    /// Link this device (check prerequisites, install bridge, pair via QR) and exit
    Pair,
    /// Delete stored WhatsApp credentials
    Logout,
    /// Probe the configured completion backends and report which one answers
    Probe,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Start => "start",
            Commands::Pair => "pair",
            Commands::Logout => "logout",
            Commands::Probe => "probe",
        }
    }
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Start);

    // When --debug is passed, write debug-level logs to ~/.wagpt/logs/debug.YYYY-MM-DD.log
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let log_dir = config::wagpt_home().join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer().with_target(false).with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new(
                "debug,hyper_util=info,rustls=info,reqwest=info",
            ));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();

        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command.label(),
            log_level = %cli.log_level,
            "========== wagpt session start =========="
        );
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_target(false)
            .init();
    }

    let config = Config::load(cli.config.as_deref())?;

    match command {
        Commands::Start => cmd_start(config).await,
        Commands::Pair => cmd_pair(config).await,
        Commands::Logout => cmd_logout(config).await,
        Commands::Probe => cmd_probe(config).await,
    }
}

#[cfg(not(test))]
/// Builds the completion gateway from configured providers.
fn build_gateway(config: &Config) -> Arc<CompletionGateway> {
    let candidates = config.completion.candidates();
    if candidates.is_empty() {
        warn!(
            "No completion backend configured (set GEMINI_API_KEY or OPENAI_API_KEY); \
             requests will be answered as unavailable"
        );
    }
    let gateway = CompletionGateway::new(candidates, config.completion.mode);
    info!(
        mode = ?gateway.mode(),
        candidates = ?gateway.candidate_names(),
        "Completion gateway ready"
    );
    Arc::new(gateway)
}

#[cfg(not(test))]
fn build_session(config: &Config) -> SessionManager {
    let transport = Arc::new(WhatsAppBridge::new(config.whatsapp.bridge_config()));
    let store = CredentialStore::new(&config.whatsapp.session_dir);
    SessionManager::new(transport, store, config.reconnect.policy())
}

#[cfg(not(test))]
/// Prints the QR code whenever a new pairing code is published and logs
/// status transitions.
fn spawn_status_reporter(
    rx: watch::Receiver<SessionSnapshot>,
    gateway: Option<Arc<CompletionGateway>>,
    discovered: Arc<Notify>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(status::report_status(rx, gateway, discovered, |line| match line {
        StatusLine::Prompt(prompt) => println!("{prompt}"),
        StatusLine::Headline { generation, text } => info!(generation, "{text}"),
    }))
}

#[cfg(not(test))]
/// Runs the gateway daemon until SIGINT/SIGTERM.
async fn cmd_start(config: Config) -> anyhow::Result<()> {
    info!("Starting wagpt daemon");

    let gateway = build_gateway(&config);
    let dispatcher = Dispatcher::new(MessageRouter::new(config.router.policy()), gateway.clone());
    let manager = build_session(&config).with_dispatcher(dispatcher);

    // Eager discovery so the first `!gpt` does not pay for probing.
    let discovered = Arc::new(Notify::new());
    {
        let gateway = gateway.clone();
        let discovered = Arc::clone(&discovered);
        tokio::spawn(async move {
            if gateway.discover().await.is_none() {
                warn!("No completion backend available");
            }
            discovered.notify_one();
        });
    }

    spawn_status_reporter(manager.subscribe(), Some(gateway), discovered);

    let pid_file = daemon::PidFile::new(daemon::PidFile::default_path());
    pid_file.write().await?;

    let result = manager.run(daemon::wait_for_shutdown()).await;

    pid_file.remove().await;
    match result {
        Ok(()) => {
            info!("wagpt stopped");
            Ok(())
        }
        Err(e) => {
            error!("Session loop failed: {e}");
            Err(e.into())
        }
    }
}

#[cfg(not(test))]
/// Interactive pairing: check prerequisites, install bridge deps, show the QR
/// and return once the session is open.
async fn cmd_pair(config: Config) -> anyhow::Result<()> {
    println!("WhatsApp Pairing");
    println!("================");
    println!();

    print!("Checking Node.js... ");
    if !channels::whatsapp::node_available(&config.whatsapp.node_command).await {
        println!("NOT FOUND");
        anyhow::bail!(
            "Node.js is required for the WhatsApp bridge. Install it from https://nodejs.org/"
        );
    }
    println!("OK");

    let bridge_path = std::path::PathBuf::from(config.whatsapp.effective_bridge_path());
    channels::whatsapp::ensure_bridge_dependencies(&bridge_path).await?;
    println!("Bridge dependencies: OK");
    println!("Session dir: {}", config.whatsapp.session_dir);
    println!("Bridge path: {}", bridge_path.display());
    println!();
    println!("Waiting for QR code... (scan with your phone)");
    println!();

    let manager = build_session(&config);
    let status = spawn_status_reporter(manager.subscribe(), None, Arc::new(Notify::new()));

    let result = tokio::select! {
        result = manager.run_until_open() => result,
        _ = tokio::signal::ctrl_c() => {
            status.abort();
            anyhow::bail!("Pairing cancelled");
        }
    };
    status.abort();
    result?;

    println!("Connected to WhatsApp!");
    println!("Credentials saved to {}.", config.whatsapp.session_dir);
    println!("Run `wagpt start` to keep the assistant online.");
    Ok(())
}

#[cfg(not(test))]
/// Deletes the stored session so the next start pairs from scratch.
async fn cmd_logout(config: Config) -> anyhow::Result<()> {
    let store = CredentialStore::new(&config.whatsapp.session_dir);
    if store.load().await.ok().flatten().is_none() {
        println!("No stored WhatsApp session in {}.", store.dir().display());
    }
    store.wipe().await?;
    println!("WhatsApp session removed. Run `wagpt pair` to link again.");
    Ok(())
}

#[cfg(not(test))]
/// Runs backend discovery once and prints the outcome.
async fn cmd_probe(config: Config) -> anyhow::Result<()> {
    let gateway = build_gateway(&config);
    let names = gateway.candidate_names();
    if names.is_empty() {
        println!("No completion backends configured.");
        println!("Set GEMINI_API_KEY and/or OPENAI_API_KEY, or add keys to config.toml.");
        return Ok(());
    }

    println!("Mode: {:?}", gateway.mode());
    println!("Candidates (probe order):");
    for name in &names {
        println!("  - {name}");
    }
    println!();

    match gateway.discover().await {
        Some(name) => println!("Active backend: {name}"),
        None => match config.completion.mode {
            agent::SelectionMode::DiscoverOnce => {
                println!("No candidate accepted the canary prompt.");
            }
            agent::SelectionMode::PerRequest => {
                println!("Per-request mode: backends are tried on every request.");
            }
        },
    }
    Ok(())
}
