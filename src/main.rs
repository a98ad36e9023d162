use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use photosweep::config::ScanConfig;
use photosweep::core::asset::AssetId;
use photosweep::core::group::Group;
use photosweep::core::result::ScanResult;
use photosweep::core::scanner::{ScanError, ScanOrchestrator, ScanProgress};
use photosweep::services::deletion::{apply_deletion, FsDeletionExecutor};
use photosweep::services::extractor::{FeatureExtractor, PerceptualExtractor, PrecomputedExtractor};
use photosweep::services::history::{HistoryStore, JsonlHistoryStore, ScanSummary};
use photosweep::services::source::FsAssetSource;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "photosweep", version, about = "Find low-quality, duplicate and similar photos")]
struct Cli {
    /// JSON scan configuration (defaults apply to missing fields)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scan history file (default: `<data dir>/photosweep/history.jsonl`)
    #[arg(long, global = true, value_name = "FILE")]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a directory and record the results
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Group similar photos by perceptual hash embeddings
        #[arg(long, conflicts_with = "vectors")]
        perceptual: bool,
        /// JSON file mapping photo paths to precomputed feature vectors
        #[arg(long, value_name = "FILE")]
        vectors: Option<PathBuf>,
        /// Print the full result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Work with scan history
    History {
        #[command(subcommand)]
        command: HistoryCmd,
    },

    /// Delete photos from the latest scan
    Delete {
        /// Which photos to delete
        #[arg(short, long, value_enum, default_value_t = Category::All)]
        category: Category,
        /// Only delete these photos from the category (repeatable)
        #[arg(long = "id", value_name = "ASSET_ID")]
        ids: Vec<String>,
        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCmd {
    /// List recorded scans, newest first
    List,

    /// Show the groups of one recorded scan
    Show {
        /// Position in the list (0 is the latest)
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Category {
    /// Every photo below the size threshold
    LowQuality,
    /// Every exact duplicate except the recommended photo
    Duplicates,
    /// Every similar photo except the recommended one
    Similar,
    /// All of the above
    All,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ScanConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ScanConfig::default(),
    };
    let history_path = match cli.history {
        Some(path) => path,
        None => default_history_path()?,
    };
    let history = Arc::new(JsonlHistoryStore::new(history_path));

    match cli.command {
        Commands::Scan {
            path,
            perceptual,
            vectors,
            json,
        } => scan(config, history, &path, perceptual, vectors.as_deref(), json).await,

        Commands::History { command } => match command {
            HistoryCmd::List => list_history(history.as_ref()),
            HistoryCmd::Show { index } => show_history(history.as_ref(), index),
        },

        Commands::Delete {
            category,
            ids,
            dry_run,
            yes,
        } => {
            let only: Vec<AssetId> = ids.into_iter().map(AssetId::new).collect();
            delete(&config, history.as_ref(), category, &only, dry_run, yes)
        }
    }
}

fn default_history_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("Could not determine the user data directory")?;
    Ok(base.join("photosweep").join("history.jsonl"))
}

async fn scan(
    config: ScanConfig,
    history: Arc<JsonlHistoryStore>,
    path: &Path,
    perceptual: bool,
    vectors: Option<&Path>,
    json: bool,
) -> Result<()> {
    println!("▶ Scanning photos in: {}", path.display());

    let extractor: Option<Arc<dyn FeatureExtractor>> = match vectors {
        Some(file) => Some(Arc::new(
            PrecomputedExtractor::from_json_file(file)
                .with_context(|| format!("Failed to load vectors {}", file.display()))?,
        )),
        None if perceptual => Some(Arc::new(PerceptualExtractor::new())),
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ScanProgress>();
    let source = Arc::new(FsAssetSource::new(path));
    let mut orchestrator = ScanOrchestrator::new(config, source, history).with_progress_sender(tx);
    if let Some(extractor) = extractor {
        orchestrator = orchestrator.with_extractor(extractor);
    }

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);
    let progress_bar = bar.clone();
    let progress_task = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            progress_bar.set_length(update.total as u64);
            progress_bar.set_position(update.processed as u64);
            progress_bar.set_message(update.current);
        }
    });

    let token = orchestrator.get_cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.store(true, Ordering::Relaxed);
        }
    });

    let outcome = orchestrator.run().await;
    drop(orchestrator);
    let _ = progress_task.await;

    let report = match outcome {
        Ok(report) => {
            bar.finish_with_message("Scan complete");
            report
        }
        Err(ScanError::Cancelled) => {
            bar.abandon_with_message("Cancelled");
            println!("⚠️  Scan cancelled; nothing was recorded.");
            return Ok(());
        }
        Err(e) => {
            bar.abandon_with_message("Failed");
            return Err(e).context("Scan failed");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report.result)?);
    } else {
        print_result(&report.result);
    }

    if !report.persisted {
        println!("\n⚠️  Could not record this scan in history.");
    }
    Ok(())
}

fn print_result(result: &ScanResult) {
    println!(
        "\n🗂️  Scan {} ({})",
        result.scan_id,
        result.scanned_at.to_rfc3339()
    );
    println!(
        "Found {} low quality, {} duplicate group(s) and {} similar group(s) out of {} photos",
        result.low_quality.len(),
        result.duplicates.len(),
        result.similar.len(),
        result.total_scanned
    );
    if result.skipped > 0 {
        println!("Skipped {} unreadable photo(s)", result.skipped);
    }

    if !result.low_quality.is_empty() {
        println!("\n📉 Low quality:");
        for record in &result.low_quality {
            println!("   ▶ {} ({} bytes)", record.locator, record.byte_size);
        }
    }
    print_groups("Duplicates", &result.duplicates);
    print_groups("Similar", &result.similar);
}

fn print_groups(label: &str, groups: &[Group]) {
    if groups.is_empty() {
        return;
    }
    println!("\n✨ {}:", label);
    for (i, group) in groups.iter().enumerate() {
        println!(" Group {} [{}]:", i + 1, group.kind);
        println!("   🏆 Keep → {}", group.recommended_asset().locator);
        for asset in group.assets().filter(|a| a.id != group.recommended) {
            let score = group
                .members
                .iter()
                .find(|m| m.asset.id == asset.id)
                .map(|m| format!("{:.2}", m.score))
                .unwrap_or_else(|| "original".to_string());
            println!("   ▶ {} ({})", asset.locator, score);
        }
    }
}

fn list_history(history: &dyn HistoryStore) -> Result<()> {
    let summaries = history
        .list_scan_summaries()
        .context("Could not read scan history")?;
    if summaries.is_empty() {
        println!("No scans recorded.");
        return Ok(());
    }

    println!("🗂️  Scan History:");
    for (i, summary) in summaries.iter().enumerate() {
        let counts = &summary.counts;
        println!(
            "[{}] {} {}\n     {} low quality, {} duplicate group(s), {} similar group(s) out of {}\n",
            i,
            summary.recorded_at.to_rfc3339(),
            summary.scan_id,
            counts.low_quality,
            counts.duplicate_groups,
            counts.similar_groups,
            counts.total_scanned
        );
    }
    Ok(())
}

fn show_history(history: &dyn HistoryStore, index: usize) -> Result<()> {
    let summaries = history
        .list_scan_summaries()
        .context("Could not read scan history")?;
    let Some(summary) = summaries.get(index) else {
        anyhow::bail!("No history entry {}; {} recorded", index, summaries.len());
    };
    print_result(&summary.result);
    Ok(())
}

/// Ids in `category`, narrowed to `only` when it is not empty.
fn selected_ids(result: &ScanResult, category: Category, only: &[AssetId]) -> BTreeSet<AssetId> {
    let removable = |groups: &[Group]| -> BTreeSet<AssetId> {
        groups.iter().flat_map(|g| g.removable_ids()).collect()
    };
    let mut ids = match category {
        Category::LowQuality => result.low_quality.iter().map(|r| r.id.clone()).collect(),
        Category::Duplicates => removable(&result.duplicates),
        Category::Similar => removable(&result.similar),
        Category::All => result.removal_candidates(),
    };

    if !only.is_empty() {
        for id in only.iter().filter(|id| !ids.contains(*id)) {
            println!(
                "⚠️  {} is not a {:?} candidate; leaving it alone",
                id, category
            );
        }
        ids.retain(|id| only.contains(id));
    }
    ids
}

fn delete(
    config: &ScanConfig,
    history: &dyn HistoryStore,
    category: Category,
    only: &[AssetId],
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let summary = history
        .read_latest_scan_summary()
        .context("Could not read scan history")?
        .context("No scans recorded; run `photosweep scan` first")?;

    let ids = selected_ids(&summary.result, category, only);
    if ids.is_empty() {
        println!("Nothing to delete.");
        return Ok(());
    }

    let executor = FsDeletionExecutor::for_result(&summary.result).dry_run(dry_run);
    for id in &ids {
        if let Some(locator) = executor.locator(id) {
            println!("   🗑️  {}", locator);
        }
    }

    if !dry_run
        && !yes
        && !Confirm::new()
            .with_prompt(format!("Permanently delete {} photo(s)?", ids.len()))
            .default(false)
            .interact()?
    {
        println!("Aborted.");
        return Ok(());
    }

    let outcome = apply_deletion(&summary.result, &executor, &ids, &config.pair_similarity())
        .context("Deletion failed")?;

    if dry_run {
        println!("\n⚠️  Dry-run only; no files were changed.");
        return Ok(());
    }

    history
        .replace_latest_scan_summary(&ScanSummary::from_result(&outcome.result))
        .context("Failed to update scan history")?;

    println!("\n✅ Deleted {} photo(s)", outcome.deleted.len());
    if !outcome.is_complete() {
        println!(
            "⚠️  {} photo(s) could not be deleted:",
            outcome.remaining.len()
        );
        for id in &outcome.remaining {
            println!("   ▶ {}", executor.locator(id).unwrap_or(id.as_str()));
        }
    }
    Ok(())
}
