use std::path::PathBuf;

use clap::Parser;
use library::{Catalog, CatalogRead, ScanContext, ScanStep, ScanStepStats, Scanner};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_or_create_config, resolve_music_root, resolve_path};

/// Runs one incremental scan of a music directory into the catalog.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Scanner configuration file, created with defaults when missing.
    #[clap(long, env = "SCANNER_CONFIG", default_value = "scanner.yaml")]
    config: PathBuf,

    /// Re-parse every file even when it looks unchanged.
    #[clap(long)]
    force: bool,

    /// Overrides `music_root` from the configuration.
    music_root: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = CliArgs::parse();
    let (config, created) = load_or_create_config(&args.config)?;
    if created {
        info!("Wrote default configuration to {:?}", args.config);
    }

    let music_root = args
        .music_root
        .or_else(|| resolve_music_root(&args.config, &config.music_root))
        .ok_or("music_root not set in configuration and no path argument")?;
    let index_path = resolve_path(&args.config, &config.index_path);

    let catalog = Catalog::open(&index_path)?;
    info!("Opened catalog {:?}", index_path);
    catalog.sync_scan_settings(&config.cluster_types)?;

    let scanner = Scanner::new(catalog.clone(), &config)?;
    let mut context = ScanContext::new(music_root, args.force);
    let mut last_percent = None;
    scanner.process(&mut context, &mut |stats: &ScanStepStats| {
        let percent = stats.progress_percent();
        if stats.step == ScanStep::ScanFiles && last_percent != Some(percent) {
            last_percent = Some(percent);
            info!(
                "Scanned {}/{} files ({}%)",
                stats.processed_elems, stats.total_elems, percent
            );
        }
    })?;

    for error in &context.stats.errors {
        warn!("{}", error);
    }

    let stats = &context.stats;
    let read = catalog.read()?;
    println!(
        "Scanned {} files: {} added, {} updated, {} removed, {} unchanged, {} errors{}",
        stats.scans,
        stats.additions,
        stats.updates,
        stats.deletions,
        stats.skips,
        stats.errors.len(),
        if context.aborted { " (aborted)" } else { "" }
    );
    println!(
        "Catalog: {} tracks, {} artists, {} releases, {} clusters",
        read.count_tracks()?,
        read.count_artists()?,
        read.count_releases()?,
        read.count_clusters()?
    );

    Ok(())
}
