//! Performance records and their keys.

use serde::{Deserialize, Serialize};
use solverforge_kernels::problem::ProblemFingerprint;
use std::fmt;

/// Stable name of a solver variant. Records are namespaced by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SolverId(String);

impl SolverId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SolverId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tuned configuration for one solver on one problem.
///
/// `config` is opaque to the store; only the owning solver can decode it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub solver: SolverId,
    pub fingerprint: ProblemFingerprint,
    pub config: String,
}

impl PerformanceRecord {
    pub fn new(solver: SolverId, fingerprint: ProblemFingerprint, config: impl Into<String>) -> Self {
        Self {
            solver,
            fingerprint,
            config: config.into(),
        }
    }
}
