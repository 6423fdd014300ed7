//! album-fanout: mirror shared photo albums to email and a cloud photo
//! library.
//!
//! Each run scrapes the configured album pages, downloads new images into a
//! content-addressed store, and delivers each image at most once to every
//! sink. Per-sink delivery state lives in a SQLite ledger, so restarts and
//! duplicate URLs never cause repeat deliveries.

#![warn(clippy::all)]

mod cli;
mod config;
mod ledger;
mod shutdown;
mod sink;
mod source;
mod store;
mod sync;
mod systemd;
#[cfg(test)]
mod test_http;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Command;
use ledger::{RunJournal, SqliteLedger};
use sink::{CloudAlbumSink, EmailSink, Sink};
use source::{AlbumScraper, AlbumSource};
use store::ContentStore;
use sync::SyncOrchestrator;
use systemd::SystemdNotifier;

/// One scheduled run: journal it, execute it, report it.
async fn sync_cycle(
    orchestrator: &SyncOrchestrator,
    journal: &dyn RunJournal,
    max_items: usize,
    shutdown: &CancellationToken,
    notifier: &SystemdNotifier,
) {
    tracing::info!("Starting sync run");
    notifier.notify_status("Syncing");

    let run_id = match journal.start_run().await {
        Ok(id) => Some(id),
        Err(e) => {
            tracing::warn!(error = %e, "Could not record run start");
            None
        }
    };

    let report = orchestrator.run_once(max_items, shutdown).await;
    report.log_summary();

    if let Some(id) = run_id {
        if let Err(e) = journal.complete_run(id, &report.stats()).await {
            tracing::warn!(error = %e, "Could not record run completion");
        }
    }
    notifier.notify_run_complete(&report);
}

async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_args(args)?;
    tracing::debug!(?config, "Loaded configuration");

    let store = ContentStore::open(&config.image_dir, config.download_timeout)
        .await
        .with_context(|| format!("Failed to open image store {}", config.image_dir.display()))?;
    tracing::info!("Image store at {}", store.root().display());
    let ledger = Arc::new(SqliteLedger::open(&config.ledger_path).await?);
    tracing::info!("Delivery ledger at {}", config.ledger_path.display());

    let mut sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(
        EmailSink::new(config.email.clone()).context("Invalid SMTP configuration")?,
    )];
    match &config.photos {
        Some(photos) => {
            if photos.album_name.is_empty() {
                tracing::info!("Google Photos enabled (library only)");
            } else {
                tracing::info!("Google Photos enabled for album '{}'", photos.album_name);
            }
            sinks.push(Arc::new(CloudAlbumSink::new(
                photos.clone(),
                config.download_timeout,
            )?));
        }
        None => tracing::info!("Google Photos disabled (no credentials configured)"),
    }

    let client = source::scraper::scraper_client(config.scrape_timeout)?;
    let sources: Vec<Arc<dyn AlbumSource>> = config
        .album_urls
        .iter()
        .map(|url| Arc::new(AlbumScraper::new(url.clone(), client.clone())) as Arc<dyn AlbumSource>)
        .collect();

    tracing::info!(
        albums = config.album_urls.len(),
        sinks = sinks.len(),
        max_items = config.max_items,
        interval_secs = config.run_interval.as_secs(),
        "Starting album-fanout"
    );

    let orchestrator = SyncOrchestrator::new(sources, Arc::new(store), ledger.clone(), sinks);
    let shutdown_token = shutdown::install_signal_handler();
    let notifier = SystemdNotifier::new(config.notify_systemd);
    notifier.notify_ready();

    let cycle = || {
        sync_cycle(
            &orchestrator,
            ledger.as_ref(),
            config.max_items,
            &shutdown_token,
            &notifier,
        )
    };

    if config.once {
        cycle().await;
    } else {
        let runs = sync::run_periodically(config.run_interval, shutdown_token.clone(), cycle).await;
        tracing::info!("Stopped after {} run(s)", runs);
    }

    notifier.notify_stopping();
    Ok(())
}

/// Run the status command.
async fn run_status(args: &cli::SyncArgs) -> anyhow::Result<()> {
    let db_path = config::ledger_path(args);

    if !db_path.exists() {
        println!("No ledger found at {}", db_path.display());
        println!("Run a sync first to create it.");
        return Ok(());
    }

    let ledger = SqliteLedger::open(&db_path).await?;
    let summary = ledger.summary().await?;

    println!("Ledger: {}", db_path.display());
    println!();
    println!("Deliveries:");
    if summary.sinks.is_empty() {
        println!("  (none yet)");
    }
    for sink in &summary.sinks {
        match &sink.last_delivered_at {
            Some(last) => println!(
                "  {:<8} {:>6}   last {}",
                sink.sink,
                sink.delivered,
                last.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("  {:<8} {:>6}", sink.sink, sink.delivered),
        }
    }

    if let Some(run) = &summary.last_run {
        println!();
        println!(
            "Last run started:   {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        match &run.completed_at {
            Some(completed) => {
                println!(
                    "Last run completed: {}",
                    completed.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("  URLs seen:        {}", run.stats.urls_seen);
                println!("  Images processed: {}", run.stats.images_processed);
                println!("  Delivered:        {}", run.stats.deliveries_succeeded);
                println!("  Failed:           {}", run.stats.deliveries_failed);
                if run.stats.interrupted {
                    println!("  (interrupted by shutdown)");
                }
            }
            None => println!("Last run did not complete (still running or crashed)"),
        }
    }

    Ok(())
}

/// Run the verify command.
async fn run_verify(args: &cli::SyncArgs, checksums: bool) -> anyhow::Result<()> {
    let image_dir = config::expand_tilde(&args.image_dir);

    if !image_dir.exists() {
        println!("No image directory at {}", image_dir.display());
        return Ok(());
    }

    println!("Verifying images in {}...", image_dir.display());
    let report = store::verify::verify_store(&image_dir, checksums).await?;

    for problem in &report.problems {
        println!("{}", problem);
    }
    println!();
    println!("Results:");
    println!("  Verified: {}", report.verified);
    println!("  Problems: {}", report.problems.len());

    if !report.is_clean() {
        std::process::exit(1);
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    match cli.effective_command() {
        Command::Status => run_status(&cli.sync).await,
        Command::Verify { checksums } => run_verify(&cli.sync, checksums).await,
        Command::Sync => run_sync(cli.sync).await,
        Command::PhotosAuth {
            client_id,
            client_secret,
            port,
        } => sink::photos_auth::run_photos_auth(&client_id, &client_secret, port).await,
    }
}
