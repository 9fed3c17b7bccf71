//! genwatch CLI entry point.
//!
//! `init` writes a starter configuration, `start` runs the monitor daemon,
//! and `status`, `history` and `probe` are one-shot inspection commands.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use genwatch::config::{load_config, runtime_paths, Config, RuntimePaths, DEFAULT_CONFIG_TOML};
use genwatch::credentials::{enforce_private_file_permissions, load_credentials};
use genwatch::engine::{Engine, EngineSettings, ServiceStatus};
use genwatch::fuel::format_hours;
use genwatch::monitor::{run_monitor, MonitorDeps};
use genwatch::notify::{ChannelNotifier, LogNotifier, Notice, Notifier, OutboundNotice};
use genwatch::reports::{run_reports, schedules_from_config, ReportDeps};
use genwatch::store::StateStore;
use genwatch::telegram::ui::format_duration;
use genwatch::timefmt::local_minute;
use genwatch::{logging, probe, telegram};

/// genwatch: generator run-time and fuel monitor.
#[derive(Parser)]
#[command(name = "genwatch", version, about)]
struct Cli {
    /// Path to config.toml (default: ~/.genwatch/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Create ~/.genwatch with a starter config and .env.
    Init,
    /// Run the monitor daemon.
    Start,
    /// Print the current fuel and run-time status.
    Status,
    /// Print recent run episodes.
    History {
        /// Window in days.
        #[arg(long, default_value_t = 1)]
        days: i64,
    },
    /// Probe the generator once and print the result.
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let paths = runtime_paths()?;
    let config_path = cli.config.unwrap_or_else(|| paths.config_toml.clone());

    match cli.command {
        Command::Init => handle_init(&paths, &config_path),
        Command::Start => handle_start(&paths, &config_path).await,
        Command::Status => handle_status(&paths, &config_path).await,
        Command::History { days } => handle_history(&paths, &config_path, days).await,
        Command::Probe => handle_probe(&config_path).await,
    }
}

fn handle_init(paths: &RuntimePaths, config_path: &std::path::Path) -> anyhow::Result<()> {
    logging::init_cli();

    std::fs::create_dir_all(&paths.root)
        .with_context(|| format!("failed to create {}", paths.root.display()))?;

    if config_path.exists() {
        println!("config already exists: {}", config_path.display());
    } else {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(config_path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        println!("wrote {}", config_path.display());
    }

    if paths.env_file.exists() {
        println!("credentials already exist: {}", paths.env_file.display());
    } else {
        std::fs::write(&paths.env_file, "GENWATCH_TELEGRAM_TOKEN=\n")
            .with_context(|| format!("failed to write {}", paths.env_file.display()))?;
        enforce_private_file_permissions(&paths.env_file)?;
        println!("wrote {}", paths.env_file.display());
    }

    Ok(())
}

async fn handle_start(paths: &RuntimePaths, config_path: &std::path::Path) -> anyhow::Result<()> {
    let _logging_guard = logging::init_production(&paths.logs_dir)?;

    let config = Arc::new(load_config(config_path)?);
    anyhow::ensure!(
        !config.generator.address.trim().is_empty(),
        "generator.address is not set in {}",
        config_path.display()
    );
    let credentials = load_credentials(&paths.env_file)?;

    let store = StateStore::open(&paths.state_db)
        .await
        .with_context(|| format!("failed to open {}", paths.state_db.display()))?;
    let engine = Arc::new(
        Engine::open(store, EngineSettings::from(&config.fuel), Utc::now())
            .await
            .context("failed to load runtime state")?,
    );

    let token = credentials.resolve(&config.telegram.bot_token_env);
    let (outbound_tx, outbound_rx) = mpsc::channel::<OutboundNotice>(64);
    let notifier: Arc<dyn Notifier> = match (&token, &config.telegram.channel_id) {
        (Some(_), Some(_)) => Arc::new(ChannelNotifier::new(outbound_tx)),
        (Some(_), None) => {
            warn!("telegram.channel_id is not set, notices go to the log only");
            Arc::new(LogNotifier)
        }
        (None, _) => {
            warn!(
                env = %config.telegram.bot_token_env,
                "no bot token configured, notices go to the log only"
            );
            Arc::new(LogNotifier)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = tokio::spawn(run_monitor(
        MonitorDeps {
            engine: Arc::clone(&engine),
            prober: probe::from_config(&config.generator, &config.monitor),
            notifier: Arc::clone(&notifier),
            host: config.generator.address.clone(),
            interval: Duration::from_secs(config.monitor.interval_secs),
            status_path: Some(paths.status_json.clone()),
        },
        shutdown_rx.clone(),
    ));
    let reports_handle = tokio::spawn(run_reports(
        ReportDeps {
            engine: Arc::clone(&engine),
            notifier: Arc::clone(&notifier),
            schedules: schedules_from_config(&config.reports)?,
        },
        shutdown_rx,
    ));

    // Delivery completes only once the outbound sender below is running.
    let startup_notifier = Arc::clone(&notifier);
    tokio::spawn(async move {
        if let Err(e) = startup_notifier
            .notify(&Notice::Restarted { at: Utc::now() })
            .await
        {
            warn!(error = %e, "failed to send startup notice");
        }
    });
    info!(generator = %config.generator.name, "genwatch started");

    match token {
        Some(token) => {
            telegram::run_telegram(&token, Arc::clone(&config), Arc::clone(&engine), outbound_rx)
                .await;
        }
        None => {
            drop(outbound_rx);
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
        }
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for handle in [monitor_handle, reports_handle] {
        if let Err(e) = handle.await {
            warn!(error = %e, "background task panicked");
        }
    }
    Ok(())
}

async fn open_readonly(
    paths: &RuntimePaths,
    config_path: &std::path::Path,
) -> anyhow::Result<(Config, Engine)> {
    let config = load_config(config_path)?;
    let store = StateStore::open(&paths.state_db)
        .await
        .with_context(|| format!("failed to open {}", paths.state_db.display()))?;
    let engine = Engine::load(store, EngineSettings::from(&config.fuel), Utc::now()).await?;
    Ok((config, engine))
}

async fn handle_status(paths: &RuntimePaths, config_path: &std::path::Path) -> anyhow::Result<()> {
    logging::init_cli();
    let (config, engine) = open_readonly(paths, config_path).await?;
    let status = engine.status(Utc::now()).await?;

    let state = match status.started_at {
        Some(started) if status.running => format!("running since {}", local_minute(started)),
        _ => "stopped".to_owned(),
    };
    let service = match status.service {
        ServiceStatus::NotSet => "not set".to_owned(),
        ServiceStatus::Remaining { seconds } => format!("in {}", format_duration(seconds)),
        ServiceStatus::Overdue { seconds } => format!("overdue by {}", format_duration(seconds)),
    };

    println!("{}: {state}", config.generator.name);
    println!(
        "fuel:      {:.1} / {:.1} L (~{})",
        status.effective_fuel,
        status.tank_capacity,
        format_hours(status.remaining_hours)
    );
    println!(
        "24h:       {} / {:.1} L",
        format_duration(status.day.runtime_seconds),
        status.day.fuel_used
    );
    println!(
        "7d:        {} / {:.1} L",
        format_duration(status.week.runtime_seconds),
        status.week.fuel_used
    );
    println!("total:     {}", format_duration(status.cumulative_runtime_seconds));
    println!("service:   {service}");
    Ok(())
}

async fn handle_history(
    paths: &RuntimePaths,
    config_path: &std::path::Path,
    days: i64,
) -> anyhow::Result<()> {
    logging::init_cli();
    let (_, engine) = open_readonly(paths, config_path).await?;
    let episodes = engine.history(days, Utc::now()).await?;

    if episodes.is_empty() {
        println!("no runs in the last {days} day(s)");
        return Ok(());
    }
    for ep in episodes {
        println!(
            "{}  {:>8}  {:>6.1} L",
            local_minute(ep.start_time),
            format_duration(ep.runtime_seconds),
            ep.fuel_used
        );
    }
    Ok(())
}

async fn handle_probe(config_path: &std::path::Path) -> anyhow::Result<()> {
    logging::init_cli();
    let config = load_config(config_path)?;
    anyhow::ensure!(
        !config.generator.address.trim().is_empty(),
        "generator.address is not set in {}",
        config_path.display()
    );
    let prober = probe::from_config(&config.generator, &config.monitor);
    let alive = prober.probe(&config.generator.address).await;
    println!(
        "{} ({}): {}",
        config.generator.name,
        config.generator.address,
        if alive { "alive" } else { "dead" }
    );
    Ok(())
}
