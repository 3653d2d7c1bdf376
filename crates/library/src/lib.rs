mod catalog;
mod config;
mod resolve;
mod scan;
mod walk;

pub use catalog::{
    Catalog, CatalogRead, ReadSession, ScanSettingsRecord, TableSource, WriteSession,
    SCAN_LOGIC_VERSION,
};
pub use config::ScannerConfig;
pub use resolve::{resolve_artists, resolve_clusters, resolve_release};
pub use scan::{
    detect_change, file_last_write_time, ChangeStatus, ScanContext, ScanError, ScanErrorKind,
    ScanStats, ScanStep, ScanStepStats, Scanner,
};
pub use walk::{explore_files_recursive, is_path_in_root};

use metadata::UnknownReadStyle;
use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Config(String),
    Conflict(String),
    CorruptIndex(String),
    VersionMismatch(u32),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Config(message) => write!(f, "configuration error: {}", message),
            LibraryError::Conflict(message) => write!(f, "catalog conflict: {}", message),
            LibraryError::CorruptIndex(message) => write!(f, "corrupt index: {}", message),
            LibraryError::VersionMismatch(version) => {
                write!(f, "index version mismatch: {}", version)
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<UnknownReadStyle> for LibraryError {
    fn from(err: UnknownReadStyle) -> Self {
        LibraryError::Config(err.to_string())
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}
