//! Error types for the performance-record cache.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read performance table {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write performance table {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to encode performance record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Lifetime variant of a loaded store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Mutable,
    Readonly,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Mutable => f.write_str("mutable"),
            StoreKind::Readonly => f.write_str("read-only"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("preloaded table {} was already claimed", .0.display())]
    AlreadyClaimed(PathBuf),

    #[error("table {} was loaded as a {found} store, expected {expected}", .path.display())]
    KindMismatch {
        path: PathBuf,
        expected: StoreKind,
        found: StoreKind,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
