//! Background preloading of performance tables.
//!
//! Opening a store reads its whole table, so startup code kicks the loads off
//! on background threads and the owning component claims the finished store
//! when it first needs it. A path is loaded at most once per [`PreloadState`];
//! the first `start_preloading` wins and later callers join that load.

use crate::error::{PreloadError, StoreError, StoreKind};
use crate::store::{MutableStore, ReadonlyStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// A loaded store of either lifetime variant.
#[derive(Debug)]
pub enum PreloadedStore {
    Mutable(MutableStore),
    Readonly(ReadonlyStore),
}

impl PreloadedStore {
    pub fn kind(&self) -> StoreKind {
        match self {
            PreloadedStore::Mutable(_) => StoreKind::Mutable,
            PreloadedStore::Readonly(_) => StoreKind::Readonly,
        }
    }
}

/// Loads the table at a path into a store.
pub type Preloader = Arc<dyn Fn(&Path) -> Result<PreloadedStore, StoreError> + Send + Sync>;

/// Standard loader for JSON-lines tables of the given kind.
pub fn preloader_for(kind: StoreKind) -> Preloader {
    match kind {
        StoreKind::Mutable => Arc::new(|path: &Path| {
            MutableStore::open(path).map(PreloadedStore::Mutable)
        }),
        StoreKind::Readonly => Arc::new(|path: &Path| {
            ReadonlyStore::open(path).map(PreloadedStore::Readonly)
        }),
    }
}

#[derive(Debug)]
enum Slot {
    Loading(JoinHandle<Result<PreloadedStore, StoreError>>),
    Claimed,
}

/// Process-wide coordination point for table preloads.
///
/// Construct one at startup and pass it by reference (or `Arc`) to every
/// component that claims a table.
#[derive(Debug, Default)]
pub struct PreloadState {
    slots: Mutex<HashMap<PathBuf, Slot>>,
    started: AtomicBool,
}

impl PreloadState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<PathBuf, Slot>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts loading `path` in the background unless a load for it already
    /// exists or it has been claimed. Returns whether a load was started.
    pub fn start_preloading(&self, path: impl AsRef<Path>, loader: Preloader) -> bool {
        let path = path.as_ref();
        let mut slots = self.lock_slots();
        if slots.contains_key(path) {
            debug!(path = %path.display(), "preload already registered");
            return false;
        }

        let thread_path = path.to_path_buf();
        let spawned = thread::Builder::new()
            .name("perfdb-preload".into())
            .spawn(move || loader(&thread_path));
        match spawned {
            Ok(handle) => {
                info!(path = %path.display(), "started preloading performance table");
                slots.insert(path.to_path_buf(), Slot::Loading(handle));
                true
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "could not spawn preload thread, table loads on first use"
                );
                false
            }
        }
    }

    /// Claims the store for `path`, waiting for its background load if one is
    /// running. Without a preload the table is loaded inline with `loader`.
    ///
    /// A failed background load is retried inline and that result returned.
    /// A path can be claimed once; later claims fail with `AlreadyClaimed`.
    /// A claim whose load fails is released, so the caller may retry.
    pub fn get(
        &self,
        path: impl AsRef<Path>,
        loader: &Preloader,
    ) -> Result<PreloadedStore, PreloadError> {
        let path = path.as_ref();
        let slot = {
            let mut slots = self.lock_slots();
            slots.insert(path.to_path_buf(), Slot::Claimed)
        };

        let loaded = match slot {
            Some(Slot::Claimed) => return Err(PreloadError::AlreadyClaimed(path.to_path_buf())),
            Some(Slot::Loading(handle)) => match handle.join() {
                Ok(Ok(store)) => {
                    debug!(path = %path.display(), "claimed preloaded table");
                    Ok(store)
                }
                Ok(Err(e)) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "background load failed, loading synchronously"
                    );
                    loader(path)
                }
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        "background load panicked, loading synchronously"
                    );
                    loader(path)
                }
            },
            None => {
                debug!(path = %path.display(), "table was not preloaded, loading synchronously");
                loader(path)
            }
        };

        if loaded.is_err() {
            self.release_claim(path);
        }
        loaded.map_err(PreloadError::from)
    }

    fn release_claim(&self, path: &Path) {
        let mut slots = self.lock_slots();
        if matches!(slots.get(path), Some(Slot::Claimed)) {
            slots.remove(path);
        }
    }

    pub fn get_mutable(&self, path: impl AsRef<Path>) -> Result<MutableStore, PreloadError> {
        let path = path.as_ref();
        match self.get(path, &preloader_for(StoreKind::Mutable))? {
            PreloadedStore::Mutable(store) => Ok(store),
            other => Err(PreloadError::KindMismatch {
                path: path.to_path_buf(),
                expected: StoreKind::Mutable,
                found: other.kind(),
            }),
        }
    }

    /// Claims `path` as a read-only store.
    pub fn get_readonly(&self, path: impl AsRef<Path>) -> Result<ReadonlyStore, PreloadError> {
        let path = path.as_ref();
        match self.get(path, &preloader_for(StoreKind::Readonly))? {
            PreloadedStore::Readonly(store) => Ok(store),
            other => Err(PreloadError::KindMismatch {
                path: path.to_path_buf(),
                expected: StoreKind::Readonly,
                found: other.kind(),
            }),
        }
    }

    /// Runs `preload` the first time it is called on this state and never
    /// again. Returns whether it ran.
    pub fn try_start_all<F>(&self, preload: F) -> bool
    where
        F: FnOnce(&PreloadState),
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        preload(self);
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Paths with a load registered and not yet claimed.
    pub fn pending_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self
            .lock_slots()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Loading(_)))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }
}
