//! Dispatcher configuration.

use solverforge_perfdb::error::StoreKind;
use solverforge_perfdb::preload::{preloader_for, PreloadState};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

/// What the dispatcher does when the cache has no usable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FindEnforce {
    /// Use the solver's heuristic default configuration.
    None,
    /// Autotune and record the winner.
    #[default]
    Search,
    /// Ignore cached records, always re-search and overwrite.
    DbUpdate,
}

#[derive(Debug, Error)]
#[error("unknown find-enforce mode {0:?}, expected none, search or db_update")]
pub struct ParseFindEnforceError(String);

impl FromStr for FindEnforce {
    type Err = ParseFindEnforceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(FindEnforce::None),
            "search" | "1" => Ok(FindEnforce::Search),
            "db_update" | "db-update" | "2" => Ok(FindEnforce::DbUpdate),
            other => Err(ParseFindEnforceError(other.to_string())),
        }
    }
}

impl fmt::Display for FindEnforce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindEnforce::None => f.write_str("none"),
            FindEnforce::Search => f.write_str("search"),
            FindEnforce::DbUpdate => f.write_str("db_update"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Mutable table receiving search winners.
    pub user_db: Option<PathBuf>,
    /// Shipped read-only table.
    pub system_db: Option<PathBuf>,
    pub enforce: FindEnforce,
    /// Start table loads in the background before the first request.
    pub preload: bool,
    pub deterministic: bool,
    pub disabled_solvers: Vec<String>,
    pub warmup_runs: usize,
    pub runs: usize,
    pub max_candidates: usize,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            user_db: None,
            system_db: None,
            enforce: FindEnforce::default(),
            preload: true,
            deterministic: false,
            disabled_solvers: Vec::new(),
            warmup_runs: 1,
            runs: 5,
            max_candidates: 4096,
        }
    }
}

impl DispatchOptions {
    pub fn with_user_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_db = Some(path.into());
        self
    }

    pub fn with_system_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.system_db = Some(path.into());
        self
    }

    pub fn with_enforce(mut self, enforce: FindEnforce) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn with_preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_disabled_solver(mut self, solver: impl Into<String>) -> Self {
        self.disabled_solvers.push(solver.into());
        self
    }

    pub fn with_runs(mut self, warmup_runs: usize, runs: usize) -> Self {
        self.warmup_runs = warmup_runs;
        self.runs = runs.max(1);
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }

    /// Defaults overridden by `SOLVERFORGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`DispatchOptions::from_env`] with an arbitrary variable source.
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        if let Some(path) = lookup("SOLVERFORGE_USER_DB").filter(|v| !v.is_empty()) {
            options.user_db = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SOLVERFORGE_SYSTEM_DB").filter(|v| !v.is_empty()) {
            options.system_db = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("SOLVERFORGE_FIND_ENFORCE") {
            match raw.parse() {
                Ok(enforce) => options.enforce = enforce,
                Err(e) => warn!(error = %e, "ignoring SOLVERFORGE_FIND_ENFORCE"),
            }
        }
        if let Some(raw) = lookup("SOLVERFORGE_DISABLE_PRELOAD") {
            options.preload = !parse_flag("SOLVERFORGE_DISABLE_PRELOAD", &raw);
        }
        if let Some(raw) = lookup("SOLVERFORGE_DETERMINISTIC") {
            options.deterministic = parse_flag("SOLVERFORGE_DETERMINISTIC", &raw);
        }
        if let Some(raw) = lookup("SOLVERFORGE_DISABLED_SOLVERS") {
            options.disabled_solvers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        debug!(?options, "dispatch options resolved");
        options
    }
}

fn parse_flag(key: &str, raw: &str) -> bool {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "" | "0" | "false" | "no" | "off" => false,
        other => {
            warn!(key, value = other, "unrecognized flag value, treating as off");
            false
        }
    }
}

/// Starts background loads for every table `options` names.
pub fn start_preloads(state: &PreloadState, options: &DispatchOptions) {
    if let Some(path) = &options.user_db {
        state.start_preloading(path, preloader_for(StoreKind::Mutable));
    }
    if let Some(path) = &options.system_db {
        state.start_preloading(path, preloader_for(StoreKind::Readonly));
    }
}
