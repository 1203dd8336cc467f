mod cli;
mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use caseflow_core::{config::load_dotenv, DataSource, DirectoryDataSource, IngestConfig, UserPreferences};
use caseflow_ingest::{CaseEvent, DataSourceStage, IngestJobEvent, IngestJobSettings, IngestManager, IngestModuleTemplate};
use caseflow_modules::{factory_by_name, MODULE_NAMES};

use crate::cli::{CliArgs, Command, IngestArgs};
use crate::console::{format_progress, print_report, ConsoleSink};

/// Poll interval for completion checks when progress printing is off.
const IDLE_POLL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    match args.command {
        Command::Modules => {
            for name in MODULE_NAMES {
                if let Some(factory) = factory_by_name(name) {
                    println!("{name:<8} {:<18} {}", factory.module_display_name(), factory.module_description());
                }
            }
            Ok(())
        }
        Command::Ingest(ingest) => run_ingest(args.preferences, ingest).await,
    }
}

fn build_settings(args: &IngestArgs) -> Result<IngestJobSettings> {
    let mut settings = IngestJobSettings::new("caseflow-cli");
    for name in &args.modules {
        let Some(factory) = factory_by_name(name) else {
            bail!("unknown module '{name}' (available: {})", MODULE_NAMES.join(", "));
        };
        let mut template = IngestModuleTemplate::new(factory);
        if args.stats_last && name.trim().eq_ignore_ascii_case("stats") {
            template = template.with_stage(DataSourceStage::Second);
        }
        settings.add_module(template);
    }
    Ok(settings)
}

fn build_sources(args: &IngestArgs) -> Result<Vec<Arc<dyn DataSource>>> {
    let mut sources: Vec<Arc<dyn DataSource>> = Vec::with_capacity(args.paths.len());
    for (i, path) in args.paths.iter().enumerate() {
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }
        sources.push(Arc::new(DirectoryDataSource::new(i as u64 + 1, path)));
    }
    Ok(sources)
}

async fn run_ingest(preferences_override: Option<std::path::PathBuf>, args: IngestArgs) -> Result<()> {
    let config = IngestConfig::from_env();
    config.log_summary();

    let preferences_path = preferences_override.or_else(|| config.preferences_path.clone());
    let mut preferences =
        UserPreferences::load(preferences_path.as_deref()).context("failed to load preferences")?;
    if let Some(threads) = args.threads {
        preferences
            .set_number_of_file_ingest_threads(threads)
            .context("failed to save file ingest thread count")?;
    }

    let settings = build_settings(&args)?;
    let sources = build_sources(&args)?;

    let manager = Arc::new(IngestManager::from_config(&config, &mut preferences).context("failed to start ingest manager")?);
    manager.set_message_sink(Some(Arc::new(ConsoleSink)));
    manager.on_case_event(&CaseEvent::Opened { name: args.case_name.clone() });

    let (tx, mut rx) = mpsc::unbounded_channel::<IngestJobEvent>();
    manager.add_ingest_job_event_listener(Arc::new(move |event: &IngestJobEvent| {
        if event.is_terminal() {
            let _ = tx.send(event.clone());
        }
        Ok(())
    }));

    info!(
        data_sources = sources.len(),
        modules = ?settings.enabled_module_names(),
        threads = manager.number_of_file_ingest_threads(),
        "Starting ingest"
    );
    manager.start_jobs(sources, settings, true);

    let print_progress = args.progress_interval_ms > 0;
    let tick = if print_progress { Duration::from_millis(args.progress_interval_ms) } else { IDLE_POLL };
    let mut ticker = tokio::time::interval(tick);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;
    let mut outcome: Option<IngestJobEvent> = None;

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                outcome = Some(event);
                break;
            }
            result = &mut ctrl_c, if !cancelling => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                eprintln!("Cancelling ingest...");
                cancelling = true;
                manager.cancel_all_ingest_jobs();
            }
            _ = ticker.tick() => {
                if print_progress {
                    for snapshot in manager.job_snapshots() {
                        eprintln!("{}", format_progress(&snapshot));
                    }
                }
                // Nothing queued and nothing running: the start failed or the
                // job ended before its event arrived.
                if manager.pending_job_starters() == 0 && !manager.is_ingest_running() {
                    break;
                }
            }
        }
    }

    print_report(&manager.thread_activity_snapshots(), &manager.module_run_times());

    let shutdown = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || shutdown.shutdown())
        .await
        .context("ingest manager shutdown panicked")?;
    if outcome.is_none() {
        outcome = rx.try_recv().ok();
    }

    match outcome {
        Some(IngestJobEvent::Completed { job_id }) => println!("Ingest job {job_id} completed"),
        Some(IngestJobEvent::Cancelled { job_id }) => println!("Ingest job {job_id} cancelled"),
        _ => bail!("ingest job did not start"),
    }
    Ok(())
}
