use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use metadata::{Parser, TagParser};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use crate::catalog::{Catalog, CatalogRead};
use crate::config::ScannerConfig;
use crate::LibraryError;

mod detect;
mod files;
mod orphans;

pub use detect::{detect_change, file_last_write_time, ChangeStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanStep {
    CountFiles,
    ScanFiles,
    RemoveOrphanTracks,
    RemoveOrphanEntities,
}

impl fmt::Display for ScanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStep::CountFiles => "count files",
            ScanStep::ScanFiles => "scan files",
            ScanStep::RemoveOrphanTracks => "remove orphan tracks",
            ScanStep::RemoveOrphanEntities => "remove orphan entities",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanStepStats {
    pub step: ScanStep,
    pub total_elems: usize,
    pub processed_elems: usize,
}

impl ScanStepStats {
    fn new(step: ScanStep) -> Self {
        Self {
            step,
            total_elems: 0,
            processed_elems: 0,
        }
    }

    pub fn progress_percent(&self) -> u32 {
        if self.total_elems == 0 {
            return 0;
        }
        let done = self.processed_elems.min(self.total_elems);
        u32::try_from(done * 100 / self.total_elems).unwrap_or(100)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanErrorKind {
    CannotReadFile,
    CannotParseFile,
    NoAudioTrack,
    BadDuration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanError {
    pub path: PathBuf,
    pub kind: ScanErrorKind,
    pub message: Option<String>,
}

impl ScanError {
    fn new(path: &Path, kind: ScanErrorKind, message: Option<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            kind,
            message,
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {:?}", self.path, self.kind)?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Accepted audio files found under the root.
    pub files_to_scan: usize,
    /// Files whose metadata was extracted.
    pub scans: usize,
    /// Unchanged files.
    pub skips: usize,
    /// Files whose last-write time could not be read.
    pub skips_on_error: usize,
    pub additions: usize,
    pub updates: usize,
    pub deletions: usize,
    pub errors: Vec<ScanError>,
}

impl ScanStats {
    pub fn changes(&self) -> usize {
        self.additions + self.updates + self.deletions
    }
}

pub struct ScanContext {
    pub directory: PathBuf,
    pub force_scan: bool,
    pub stats: ScanStats,
    pub current_step: ScanStepStats,
    /// Set when the run stopped on the abort flag.
    pub aborted: bool,
}

impl ScanContext {
    pub fn new(directory: PathBuf, force_scan: bool) -> Self {
        Self {
            directory,
            force_scan,
            stats: ScanStats::default(),
            current_step: ScanStepStats::new(ScanStep::CountFiles),
            aborted: false,
        }
    }
}

#[derive(Clone, Debug)]
struct ScanSettings {
    scan_version: u32,
    audio_file_extensions: Vec<String>,
    exclude_dir_file_name: String,
    skip_duplicate_recording_mbid: bool,
    batch_size: usize,
}

/// Runs scan cycles over a directory tree against one catalog.
pub struct Scanner {
    catalog: Catalog,
    parser: Arc<dyn Parser>,
    settings: ScanSettings,
    abort: Arc<AtomicBool>,
    pool: ThreadPool,
}

impl Scanner {
    pub fn new(catalog: Catalog, config: &ScannerConfig) -> Result<Self, LibraryError> {
        let parser = TagParser::new(config.read_style()?, config.cluster_types.clone());
        Self::with_parser(catalog, config, Arc::new(parser))
    }

    pub fn with_parser(
        catalog: Catalog,
        config: &ScannerConfig,
        parser: Arc<dyn Parser>,
    ) -> Result<Self, LibraryError> {
        config.validate()?;
        let scan_version = catalog.read()?.scan_settings()?.scan_version;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|idx| format!("scan-worker-{}", idx))
            .build()
            .map_err(|err| LibraryError::Config(format!("scan worker pool: {}", err)))?;

        Ok(Self {
            catalog,
            parser,
            settings: ScanSettings {
                scan_version,
                audio_file_extensions: config.audio_file_extensions.clone(),
                exclude_dir_file_name: config.exclude_dir_file_name.clone(),
                skip_duplicate_recording_mbid: config.skip_duplicate_recording_mbid,
                batch_size: config.effective_batch_size(),
            },
            abort: Arc::new(AtomicBool::new(false)),
            pool,
        })
    }

    /// Setting the returned flag stops the running scan before its next file.
    /// `process` clears it on return, so the next cycle starts fresh.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn scan_version(&self) -> u32 {
        self.settings.scan_version
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs every scan step over `context.directory`. Per-file problems are
    /// collected in `context.stats.errors`; only store failures are returned.
    pub fn process(
        &self,
        context: &mut ScanContext,
        progress: &mut dyn FnMut(&ScanStepStats),
    ) -> Result<(), LibraryError> {
        let started = Instant::now();
        info!(
            "Scanning {:?} (scan version {}, force {})",
            context.directory, self.settings.scan_version, context.force_scan
        );

        let steps = [
            ScanStep::CountFiles,
            ScanStep::ScanFiles,
            ScanStep::RemoveOrphanTracks,
            ScanStep::RemoveOrphanEntities,
        ];
        for step in steps {
            if self.is_aborted() {
                break;
            }
            context.current_step = ScanStepStats::new(step);
            info!("Step '{}'", step);
            match step {
                ScanStep::CountFiles => files::count_files(self, context),
                ScanStep::ScanFiles => files::scan_files(self, context, progress)?,
                ScanStep::RemoveOrphanTracks => {
                    orphans::remove_orphan_tracks(self, context, progress)?
                }
                ScanStep::RemoveOrphanEntities => orphans::remove_orphan_entities(self, context)?,
            }
        }

        context.aborted = self.is_aborted();
        self.abort.store(false, Ordering::Relaxed);
        let stats = &context.stats;
        info!(
            "Scan {} in {:?}: {} scanned, {} skipped, {} added, {} updated, {} removed, {} errors",
            if context.aborted { "aborted" } else { "complete" },
            started.elapsed(),
            stats.scans,
            stats.skips + stats.skips_on_error,
            stats.additions,
            stats.updates,
            stats.deletions,
            stats.errors.len()
        );
        Ok(())
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

fn now_secs() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
