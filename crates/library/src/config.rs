use metadata::ReadStyle;
use serde::{Deserialize, Serialize};

use crate::LibraryError;

const DEFAULT_AUDIO_FILE_EXTENSIONS: &[&str] = &[
    ".mp3", ".ogg", ".oga", ".aac", ".m4a", ".m4b", ".flac", ".wav", ".wma", ".aif", ".aiff",
    ".ape", ".mpc", ".shn", ".opus", ".wv",
];
const DEFAULT_CLUSTER_TYPES: &[&str] = &["GENRE", "MOOD", "LANGUAGE", "ALBUMGROUPING"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub music_root: String,
    pub index_path: String,
    pub parser_read_style: String,
    pub audio_file_extensions: Vec<String>,
    /// Directories holding a file with this name are skipped entirely.
    pub exclude_dir_file_name: String,
    pub cluster_types: Vec<String>,
    pub skip_duplicate_recording_mbid: bool,
    /// 0 uses every available core.
    pub worker_threads: usize,
    pub batch_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            music_root: "".to_string(),
            index_path: "library.redb".to_string(),
            parser_read_style: "accurate".to_string(),
            audio_file_extensions: DEFAULT_AUDIO_FILE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            exclude_dir_file_name: ".lmsignore".to_string(),
            cluster_types: DEFAULT_CLUSTER_TYPES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            skip_duplicate_recording_mbid: false,
            worker_threads: 0,
            batch_size: 64,
        }
    }
}

impl ScannerConfig {
    pub fn read_style(&self) -> Result<ReadStyle, LibraryError> {
        Ok(self.parser_read_style.parse()?)
    }

    pub fn validate(&self) -> Result<(), LibraryError> {
        self.read_style()?;
        if self.audio_file_extensions.is_empty() {
            return Err(LibraryError::Config(
                "audio_file_extensions must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
