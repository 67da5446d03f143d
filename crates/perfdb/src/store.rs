//! In-memory performance-record stores.

use crate::error::StoreError;
use crate::record::{PerformanceRecord, SolverId};
use crate::table::{BackingTable, JsonLinesTable};
use solverforge_kernels::problem::ProblemFingerprint;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Records grouped by fingerprint, then by solver.
#[derive(Debug, Default)]
struct RecordIndex {
    by_fingerprint: HashMap<ProblemFingerprint, HashMap<SolverId, PerformanceRecord>>,
    len: usize,
}

impl RecordIndex {
    fn from_records(records: Vec<PerformanceRecord>) -> Self {
        let mut index = Self::default();
        for record in records {
            index.insert(record);
        }
        index
    }

    fn insert(&mut self, record: PerformanceRecord) -> Option<PerformanceRecord> {
        let previous = self
            .by_fingerprint
            .entry(record.fingerprint.clone())
            .or_default()
            .insert(record.solver.clone(), record);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn get(&self, solver: &SolverId, fingerprint: &ProblemFingerprint) -> Option<&PerformanceRecord> {
        self.by_fingerprint.get(fingerprint)?.get(solver)
    }

    fn iter(&self) -> impl Iterator<Item = &PerformanceRecord> {
        self.by_fingerprint.values().flat_map(|solvers| solvers.values())
    }

    /// Records ordered by fingerprint then solver.
    fn sorted(&self) -> Vec<&PerformanceRecord> {
        let mut records: Vec<_> = self.iter().collect();
        records.sort_by(|a, b| {
            a.fingerprint
                .cmp(&b.fingerprint)
                .then_with(|| a.solver.cmp(&b.solver))
        });
        records
    }
}

/// Immutable store over a shipped table. Safe to share between threads.
#[derive(Debug)]
pub struct ReadonlyStore {
    path: PathBuf,
    index: RecordIndex,
}

impl ReadonlyStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::from_table(&JsonLinesTable::new(path))
    }

    pub fn from_table(table: &dyn BackingTable) -> Result<Self, StoreError> {
        let index = RecordIndex::from_records(table.load()?);
        info!(
            path = %table.path().display(),
            records = index.len,
            "loaded read-only performance table"
        );
        Ok(Self {
            path: table.path().to_path_buf(),
            index,
        })
    }

    pub fn lookup(
        &self,
        solver: &SolverId,
        fingerprint: &ProblemFingerprint,
    ) -> Option<&PerformanceRecord> {
        self.index.get(solver, fingerprint)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len
    }

    pub fn is_empty(&self) -> bool {
        self.index.len == 0
    }

    /// Records ordered by fingerprint then solver.
    pub fn records(&self) -> Vec<&PerformanceRecord> {
        self.index.sorted()
    }
}

/// Read-write store owning its backing table.
///
/// Only one `MutableStore` may be open for a given path per process; callers
/// sharing it between threads serialize access themselves.
#[derive(Debug)]
pub struct MutableStore {
    table: Box<dyn BackingTable>,
    index: RecordIndex,
}

impl MutableStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_table(Box::new(JsonLinesTable::new(path)))
    }

    pub fn with_table(table: Box<dyn BackingTable>) -> Result<Self, StoreError> {
        let index = RecordIndex::from_records(table.load()?);
        info!(
            path = %table.path().display(),
            records = index.len,
            "loaded performance table"
        );
        Ok(Self { table, index })
    }

    pub fn lookup(
        &self,
        solver: &SolverId,
        fingerprint: &ProblemFingerprint,
    ) -> Option<&PerformanceRecord> {
        self.index.get(solver, fingerprint)
    }

    /// Replaces the record for its key and appends it to the backing table.
    ///
    /// The in-memory record is updated even when the append fails; the error
    /// only reports that the record will not survive this process.
    pub fn upsert(&mut self, record: PerformanceRecord) -> Result<(), StoreError> {
        let persisted = self.table.append(&record);
        if let Err(e) = &persisted {
            warn!(
                path = %self.table.path().display(),
                solver = %record.solver,
                error = %e,
                "performance record kept in memory only"
            );
        }

        debug!(
            solver = %record.solver,
            fingerprint = %record.fingerprint,
            "upserting performance record"
        );
        self.index.insert(record);
        persisted
    }

    /// Rewrites the backing table with exactly the in-memory records.
    pub fn compact(&self) -> Result<(), StoreError> {
        let records = self.index.sorted();
        self.table.rewrite(&records)?;
        info!(
            path = %self.table.path().display(),
            records = records.len(),
            "compacted performance table"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }

    pub fn len(&self) -> usize {
        self.index.len
    }

    pub fn is_empty(&self) -> bool {
        self.index.len == 0
    }

    /// Records ordered by fingerprint then solver.
    pub fn records(&self) -> Vec<&PerformanceRecord> {
        self.index.sorted()
    }
}
