//! Exhaustive autotuning search over a solver's configuration space.
//!
//! The walk starts at the solver's search seed and calls `set_next_value`
//! until the space is exhausted. Invalid candidates are rejected without a
//! trial; valid ones are built and timed, and a candidate replaces the best
//! only when strictly faster, so ties keep the earlier one.

use crate::executor::TrialExecutor;
use crate::solver::{DynSolver, ExecutionContext, PerformanceConfig, TunableSolver, TuningResult};
use solverforge_kernels::problem::{MatmulProblem, ProblemFingerprint};
use solverforge_perfdb::record::{PerformanceRecord, SolverId};
use solverforge_perfdb::store::MutableStore;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("solver {solver} has no candidate configurations for this problem")]
    NoCandidates { solver: SolverId },

    #[error("solver {solver} found no valid configuration after {visited} candidates")]
    NoValidConfiguration { solver: SolverId, visited: usize },

    #[error("solver {solver} configuration space did not terminate within {limit} candidates")]
    SpaceNotTerminating { solver: SolverId, limit: usize },

    #[error("failed to encode configuration for solver {solver}: {message}")]
    Encode { solver: SolverId, message: String },
}

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Upper bound on visited candidates; guards against spaces that never end.
    pub max_candidates: usize,
}

impl SearchOptions {
    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates.max(1);
        self
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_candidates: 4096,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Init,
    Iterating,
    Improved,
    Rejected,
    Exhausted,
}

/// Walk position and best-so-far for one search call.
#[derive(Debug, Clone)]
pub struct SearchState<C> {
    pub phase: SearchPhase,
    pub current: C,
    pub exhausted: bool,
    pub best: Option<(C, f64)>,
    pub visited: usize,
    pub trials: usize,
    pub rejected: usize,
}

impl<C: PerformanceConfig> SearchState<C> {
    pub fn new(seed: C) -> Self {
        Self {
            phase: SearchPhase::Init,
            current: seed,
            exhausted: false,
            best: None,
            visited: 0,
            trials: 0,
            rejected: 0,
        }
    }

    pub fn reject(&mut self) {
        self.rejected += 1;
        self.phase = SearchPhase::Rejected;
    }

    /// Records a measured trial of the current candidate. A NaN or infinite
    /// cost counts as a rejection.
    pub fn record_trial(&mut self, cost_ms: f64) {
        if !cost_ms.is_finite() {
            self.reject();
            return;
        }
        self.trials += 1;
        let improves = match &self.best {
            Some((_, best_cost)) => cost_ms < *best_cost,
            None => true,
        };
        if improves {
            self.best = Some((self.current.clone(), cost_ms));
            self.phase = SearchPhase::Improved;
        } else {
            self.phase = SearchPhase::Iterating;
        }
    }

    /// Steps to the next candidate. Returns false once the space is exhausted.
    pub fn advance(&mut self, problem: &MatmulProblem) -> bool {
        if self.current.set_next_value(problem) {
            self.phase = SearchPhase::Iterating;
            true
        } else {
            self.exhausted = true;
            self.phase = SearchPhase::Exhausted;
            false
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome<C> {
    pub config: C,
    pub cost_ms: f64,
    pub visited: usize,
    pub trials: usize,
    pub rejected: usize,
}

/// Runs every admissible candidate of `solver` for `problem` and returns the fastest.
pub fn search<S: TunableSolver>(
    solver: &S,
    ctx: &ExecutionContext,
    problem: &MatmulProblem,
    executor: &dyn TrialExecutor,
    options: &SearchOptions,
) -> Result<SearchOutcome<S::Config>, SearchError> {
    let solver_id = SolverId::new(solver.name());
    let mut state = SearchState::new(solver.search_start(problem));
    if !state.current.is_valid_value() {
        return Err(SearchError::NoCandidates { solver: solver_id });
    }

    info!(
        solver = solver.name(),
        m = problem.m,
        n = problem.n,
        k = problem.k,
        arch = %ctx.device.arch,
        "starting autotune search"
    );

    loop {
        state.visited += 1;
        if state.visited > options.max_candidates {
            return Err(SearchError::SpaceNotTerminating {
                solver: solver_id,
                limit: options.max_candidates,
            });
        }

        if !solver.is_valid_config(problem, &state.current) {
            debug!(solver = solver.name(), candidate = ?state.current, "rejected invalid candidate");
            state.reject();
        } else {
            let plan = solver.build_solution(problem, &state.current);
            match executor.measure(&plan, problem) {
                Ok(cost_ms) if !cost_ms.is_finite() => {
                    warn!(
                        solver = solver.name(),
                        candidate = ?state.current,
                        cost_ms,
                        "trial reported a non-finite cost"
                    );
                    state.reject();
                }
                Ok(cost_ms) => {
                    state.record_trial(cost_ms);
                    debug!(
                        solver = solver.name(),
                        candidate = ?state.current,
                        cost_ms,
                        improved = state.phase == SearchPhase::Improved,
                        "measured candidate"
                    );
                }
                Err(e) => {
                    warn!(
                        solver = solver.name(),
                        candidate = ?state.current,
                        error = %e,
                        "trial failed"
                    );
                    state.reject();
                }
            }
        }

        if !state.advance(problem) {
            break;
        }
    }

    let SearchState {
        best,
        visited,
        trials,
        rejected,
        ..
    } = state;
    let Some((config, cost_ms)) = best else {
        return Err(SearchError::NoValidConfiguration {
            solver: solver_id,
            visited,
        });
    };

    info!(
        solver = solver.name(),
        winner = ?config,
        cost_ms,
        visited,
        trials,
        rejected,
        "autotune search finished"
    );
    Ok(SearchOutcome {
        config,
        cost_ms,
        visited,
        trials,
        rejected,
    })
}

/// What writing a search winner did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordUpdate {
    Inserted,
    Replaced,
    /// The store already held an equal configuration; nothing was written.
    Unchanged,
    /// Kept in memory, but the backing table could not be written.
    MemoryOnly,
}

/// Writes a search winner through to `store` under `fingerprint`.
pub fn record_winner(
    store: &mut MutableStore,
    solver: &DynSolver,
    fingerprint: &ProblemFingerprint,
    result: &TuningResult,
) -> RecordUpdate {
    let existing = store
        .lookup(&result.solver, fingerprint)
        .map(|record| record.config.clone());
    if let Some(existing) = &existing {
        if solver.same_config(existing, &result.config) {
            debug!(
                solver = %result.solver,
                fingerprint = %fingerprint,
                "store already holds the search winner"
            );
            return RecordUpdate::Unchanged;
        }
    }

    let record = PerformanceRecord::new(
        result.solver.clone(),
        fingerprint.clone(),
        result.config.clone(),
    );
    match store.upsert(record) {
        Ok(()) if existing.is_some() => RecordUpdate::Replaced,
        Ok(()) => RecordUpdate::Inserted,
        Err(_) => RecordUpdate::MemoryOnly,
    }
}

/// Searches and records the winner in one step, for single-owner callers.
pub fn autotune_and_record(
    solver: &DynSolver,
    ctx: &ExecutionContext,
    problem: &MatmulProblem,
    executor: &dyn TrialExecutor,
    store: &mut MutableStore,
    options: &SearchOptions,
) -> Result<(TuningResult, RecordUpdate), SearchError> {
    let result = solver.search(ctx, problem, executor, options)?;
    let fingerprint = ProblemFingerprint::derive(problem, &ctx.device);
    let update = record_winner(store, solver, &fingerprint, &result);
    Ok((result, update))
}
