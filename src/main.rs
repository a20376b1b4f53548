// src/main.rs
use std::collections::HashSet;

use clap::Parser;

use rvd_extractor::merge::merge_revisions;
use rvd_extractor::phac::client::{self, DASHBOARD_BASE_URL};
use rvd_extractor::phac::dashboard;
use rvd_extractor::phac::models::SeasonReports;
use rvd_extractor::season::{self, SeasonAccumulator};
use rvd_extractor::storage::{StorageManager, POSITIVE_TESTS_FILE, RESP_DETECTIONS_FILE};
use rvd_extractor::utils::{self, AppError};
use rvd_extractor::vocab::Vocabulary;

/// Command line interface for the respiratory virus detection harvester
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output directory for season data files
    #[arg(short, long, default_value = ".")]
    output_dir: String,

    /// Start year of the current dashboard-fed season
    #[arg(long, default_value = "2024")]
    live_season_start: i32,

    /// Maximum attempts for the historical harvest on connection errors
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Re-harvest historical seasons even when their outputs exist
    #[arg(long)]
    force_historic: bool,

    /// Skip the historical report-page harvest
    #[arg(long)]
    skip_historic: bool,

    /// Skip the live-season dashboard update
    #[arg(long)]
    skip_live: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments
    let args = Args::parse();
    tracing::info!("Starting processing for args: {:?}", args);

    // 3. Initialize storage and the shared vocabulary
    let storage = StorageManager::new(&args.output_dir)?;
    let vocab = Vocabulary::new();

    // 4. Harvest archived seasons from their report pages
    if !args.skip_historic {
        run_historic(&storage, &vocab, &args).await?;
    }

    // 5. Update the live season from the dashboard feeds
    if !args.skip_live {
        run_live(&storage, &vocab, args.live_season_start).await?;
    }

    Ok(())
}

/// Harvests every archived season, with bounded retries on connection
/// errors. Seasons finished before a failure are not re-fetched on retry.
async fn run_historic(
    storage: &StorageManager,
    vocab: &Vocabulary,
    args: &Args,
) -> Result<(), AppError> {
    // The last archived season doubles as the harvest marker.
    if storage.season_output_exists(2023, 2024, false) && !args.force_historic {
        tracing::info!("Historical season outputs already present, skipping harvest");
        return Ok(());
    }

    let urls = client::historic_season_urls();
    let mut completed: HashSet<String> = HashSet::new();
    let mut retries = 0;
    loop {
        match harvest_seasons(storage, vocab, &urls, &mut completed, args).await {
            Ok(()) => return Ok(()),
            Err(AppError::Fetch(e)) => {
                retries += 1;
                if retries >= args.max_retries {
                    tracing::error!("Max retries reached ({}).", args.max_retries);
                    return Err(AppError::Fetch(e));
                }
                tracing::warn!(
                    "Connection error during harvest: {} (retrying, attempt {}/{})",
                    e,
                    retries,
                    args.max_retries
                );
            }
            Err(e) => return Err(e),
        }
    }
}

async fn harvest_seasons(
    storage: &StorageManager,
    vocab: &Vocabulary,
    urls: &[String],
    completed: &mut HashSet<String>,
    args: &Args,
) -> Result<(), AppError> {
    for url in urls {
        if completed.contains(url) {
            continue;
        }
        let reports = client::fetch_season(url).await?;
        process_season(storage, vocab, reports, args.live_season_start)?;
        completed.insert(url.clone());
    }
    Ok(())
}

/// Runs one season's reports through the pipeline and writes its outputs.
fn process_season(
    storage: &StorageManager,
    vocab: &Vocabulary,
    reports: SeasonReports,
    live_season_start: i32,
) -> Result<(), AppError> {
    let mut accumulator = SeasonAccumulator::new(reports.start_year);
    for report in &reports.reports {
        accumulator.ingest_week(report, vocab)?;
    }
    let (detections, counts, positives) = accumulator.finish();
    tracing::info!(
        "Season {}-{}: {} detection rows, {} national count rows, {} positive rows",
        reports.start_year,
        reports.end_year,
        detections.len(),
        counts.len(),
        positives.len()
    );

    let merged = merge_revisions(&detections, &positives, vocab);
    let live = reports.start_year == live_season_start;
    let dir = storage.write_season_outputs(reports.start_year, reports.end_year, live, &merged)?;
    tracing::info!("Wrote season outputs to {}", dir.display());
    Ok(())
}

/// Updates the live season: folds the dashboard's current week into the
/// on-disk snapshots, then re-merges and rewrites the season outputs.
async fn run_live(
    storage: &StorageManager,
    vocab: &Vocabulary,
    start_year: i32,
) -> Result<(), AppError> {
    let end_year = start_year + 1;
    tracing::info!("Updating live season {}-{} from dashboard", start_year, end_year);

    let weekly = dashboard::fetch_current_week_data(DASHBOARD_BASE_URL, start_year, vocab).await?;
    let positive = dashboard::fetch_revised_data(DASHBOARD_BASE_URL, vocab).await?;
    let (weekly, positive) = season::finalize_tables(weekly, positive);

    let detections =
        storage.append_snapshot(start_year, end_year, RESP_DETECTIONS_FILE, &weekly)?;
    let positives =
        storage.append_snapshot(start_year, end_year, POSITIVE_TESTS_FILE, &positive)?;

    let merged = merge_revisions(&detections, &positives, vocab);
    let dir = storage.write_season_outputs(start_year, end_year, true, &merged)?;
    tracing::info!(
        "Live season updated: {} merged rows written to {}",
        merged.len(),
        dir.display()
    );
    Ok(())
}
