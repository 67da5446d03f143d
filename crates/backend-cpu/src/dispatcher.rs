//! Solver resolution for CPU matmul problems.
//!
//! Resolution consults the user table, then the system table, for every
//! applicable solver in catalog order. On a miss the first applicable solver
//! is tuned or falls back to its heuristic default, depending on
//! [`FindEnforce`]. A solver whose search fails and whose default is invalid
//! hands over to the next one.

use crate::options::{start_preloads, DispatchOptions, FindEnforce};
use solverforge_autotune::catalog::SolverCatalog;
use solverforge_autotune::executor::{CpuTrialExecutor, TrialExecutor};
use solverforge_autotune::search::{record_winner, RecordUpdate, SearchOptions};
use solverforge_autotune::solver::{DynSolver, ExecutablePlan, ExecutionContext};
use solverforge_kernels::problem::{MatmulProblem, ProblemFingerprint};
use solverforge_perfdb::error::{PreloadError, StoreError};
use solverforge_perfdb::preload::PreloadState;
use solverforge_perfdb::record::SolverId;
use solverforge_perfdb::store::{MutableStore, ReadonlyStore};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no applicable solver for problem {fingerprint}")]
    NoApplicableSolver { fingerprint: ProblemFingerprint },

    #[error(transparent)]
    Preload(#[from] PreloadError),

    #[error("solver {solver} failed to execute: {message}")]
    Execution { solver: SolverId, message: String },
}

/// Where a resolved configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    UserDb,
    SystemDb,
    Search,
    Heuristic,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub solver: SolverId,
    pub fingerprint: ProblemFingerprint,
    /// Serialized configuration, when the solver's config serializes.
    pub config: Option<String>,
    pub plan: ExecutablePlan,
    pub source: ResolutionSource,
    /// Set when a search winner was written to the user table.
    pub record: Option<RecordUpdate>,
}

pub struct Dispatcher {
    catalog: SolverCatalog,
    ctx: ExecutionContext,
    user_db: Option<Mutex<MutableStore>>,
    system_db: Option<Arc<ReadonlyStore>>,
    executor: Arc<dyn TrialExecutor>,
    enforce: FindEnforce,
    search: SearchOptions,
}

impl Dispatcher {
    pub fn new(
        catalog: SolverCatalog,
        ctx: ExecutionContext,
        executor: Arc<dyn TrialExecutor>,
    ) -> Self {
        Self {
            catalog,
            ctx,
            user_db: None,
            system_db: None,
            executor,
            enforce: FindEnforce::default(),
            search: SearchOptions::default(),
        }
    }

    pub fn with_user_store(mut self, store: MutableStore) -> Self {
        self.user_db = Some(Mutex::new(store));
        self
    }

    pub fn with_system_store(mut self, store: Arc<ReadonlyStore>) -> Self {
        self.system_db = Some(store);
        self
    }

    pub fn with_enforce(mut self, enforce: FindEnforce) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn with_search_options(mut self, search: SearchOptions) -> Self {
        self.search = search;
        self
    }

    /// Host dispatcher with the default catalog, claiming its tables from
    /// `preload`. Starts the preloads first if nobody has yet.
    pub fn with_options(
        options: &DispatchOptions,
        preload: &PreloadState,
    ) -> Result<Self, DispatchError> {
        if options.preload {
            preload.try_start_all(|state| start_preloads(state, options));
        }

        let ctx = ExecutionContext::host()
            .with_deterministic(options.deterministic)
            .with_disabled(options.disabled_solvers.iter().cloned());
        let executor = CpuTrialExecutor::new().with_runs(options.warmup_runs, options.runs);
        let mut dispatcher = Self::new(SolverCatalog::with_default_solvers(), ctx, Arc::new(executor))
            .with_enforce(options.enforce)
            .with_search_options(
                SearchOptions::default().with_max_candidates(options.max_candidates),
            );

        if let Some(path) = &options.user_db {
            dispatcher = dispatcher.with_user_store(preload.get_mutable(path)?);
        }
        if let Some(path) = &options.system_db {
            dispatcher = dispatcher.with_system_store(Arc::new(preload.get_readonly(path)?));
        }
        info!(
            arch = %dispatcher.ctx.device.arch,
            enforce = %dispatcher.enforce,
            user_db = dispatcher.user_db.is_some(),
            system_db = dispatcher.system_db.is_some(),
            "dispatcher ready"
        );
        Ok(dispatcher)
    }

    pub fn catalog(&self) -> &SolverCatalog {
        &self.catalog
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn enforce(&self) -> FindEnforce {
        self.enforce
    }

    pub fn fingerprint(&self, problem: &MatmulProblem) -> ProblemFingerprint {
        ProblemFingerprint::derive(problem, &self.ctx.device)
    }

    fn lock_user_db(store: &Mutex<MutableStore>) -> MutexGuard<'_, MutableStore> {
        store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks a solver and configuration for `problem`.
    pub fn resolve(&self, problem: &MatmulProblem) -> Result<Resolution, DispatchError> {
        let fingerprint = self.fingerprint(problem);
        let candidates = self.catalog.applicable(&self.ctx, problem);
        if candidates.is_empty() {
            warn!(fingerprint = %fingerprint, "no applicable solver");
            return Err(DispatchError::NoApplicableSolver { fingerprint });
        }

        if self.enforce != FindEnforce::DbUpdate {
            for solver in candidates.iter().filter(|solver| solver.is_tunable()) {
                if let Some(resolution) = self.lookup_cached(solver, problem, &fingerprint) {
                    return Ok(resolution);
                }
            }
        }

        for solver in &candidates {
            if let Some(resolution) = self.resolve_miss(solver, problem, &fingerprint) {
                return Ok(resolution);
            }
        }
        Err(DispatchError::NoApplicableSolver { fingerprint })
    }

    fn lookup_cached(
        &self,
        solver: &DynSolver,
        problem: &MatmulProblem,
        fingerprint: &ProblemFingerprint,
    ) -> Option<Resolution> {
        let id = solver.id();
        let user = self.user_db.as_ref().and_then(|store| {
            Self::lock_user_db(store)
                .lookup(&id, fingerprint)
                .map(|record| record.config.clone())
        });
        let system = || {
            self.system_db
                .as_ref()
                .and_then(|store| store.lookup(&id, fingerprint))
                .map(|record| record.config.clone())
        };

        // Stale or undecodable records are misses; a stale user record
        // still lets a valid system record through.
        let (config, source, plan) = user
            .and_then(|config| {
                let plan = solver.plan_from_record(problem, &config)?;
                Some((config, ResolutionSource::UserDb, plan))
            })
            .or_else(|| {
                let config = system()?;
                let plan = solver.plan_from_record(problem, &config)?;
                Some((config, ResolutionSource::SystemDb, plan))
            })?;
        debug!(solver = %id, fingerprint = %fingerprint, ?source, "cache hit");
        Some(Resolution {
            solver: id,
            fingerprint: fingerprint.clone(),
            config: Some(config),
            plan,
            source,
            record: None,
        })
    }

    fn resolve_miss(
        &self,
        solver: &DynSolver,
        problem: &MatmulProblem,
        fingerprint: &ProblemFingerprint,
    ) -> Option<Resolution> {
        let id = solver.id();
        if solver.is_tunable() && self.enforce != FindEnforce::None {
            match solver.search(&self.ctx, problem, self.executor.as_ref(), &self.search) {
                Ok(result) => {
                    let record = self.user_db.as_ref().map(|store| {
                        record_winner(&mut Self::lock_user_db(store), solver, fingerprint, &result)
                    });
                    info!(
                        solver = %id,
                        fingerprint = %fingerprint,
                        cost_ms = result.cost_ms,
                        ?record,
                        "resolved by search"
                    );
                    return Some(Resolution {
                        solver: id,
                        fingerprint: fingerprint.clone(),
                        config: Some(result.config),
                        plan: result.plan,
                        source: ResolutionSource::Search,
                        record,
                    });
                }
                Err(e) => {
                    warn!(solver = %id, error = %e, "search failed, trying default configuration");
                }
            }
        }

        match solver.default_plan(problem) {
            Some(plan) => {
                debug!(solver = %id, fingerprint = %fingerprint, "using heuristic configuration");
                Some(Resolution {
                    solver: id,
                    fingerprint: fingerprint.clone(),
                    config: solver.default_config_blob(problem),
                    plan,
                    source: ResolutionSource::Heuristic,
                    record: None,
                })
            }
            None => {
                debug!(solver = %id, "default configuration invalid, trying next solver");
                None
            }
        }
    }

    /// Cached configuration for `solver` and `problem`, user table first.
    pub fn cached_config(&self, solver: &SolverId, problem: &MatmulProblem) -> Option<String> {
        let fingerprint = self.fingerprint(problem);
        if let Some(store) = &self.user_db {
            if let Some(record) = Self::lock_user_db(store).lookup(solver, &fingerprint) {
                return Some(record.config.clone());
            }
        }
        self.system_db
            .as_ref()?
            .lookup(solver, &fingerprint)
            .map(|record| record.config.clone())
    }

    /// Rewrites the user table without superseded lines.
    pub fn compact(&self) -> Result<(), StoreError> {
        match &self.user_db {
            Some(store) => Self::lock_user_db(store).compact(),
            None => Ok(()),
        }
    }

    /// Records held by the user table.
    pub fn user_records(&self) -> usize {
        self.user_db
            .as_ref()
            .map(|store| Self::lock_user_db(store).len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("catalog", &self.catalog)
            .field("device", &self.ctx.device)
            .field("enforce", &self.enforce)
            .field("user_db", &self.user_db.is_some())
            .field("system_db", &self.system_db.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use solverforge_kernels::config::DataType;
    use solverforge_kernels::problem::DeviceInfo;
    use solverforge_perfdb::record::PerformanceRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Cost grows with the description length, so results are stable.
    #[derive(Default)]
    struct FakeExecutor {
        trials: AtomicUsize,
        fail: bool,
    }

    impl TrialExecutor for FakeExecutor {
        fn measure(&self, plan: &ExecutablePlan, _problem: &MatmulProblem) -> anyhow::Result<f64> {
            self.trials.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("device lost");
            }
            Ok(plan.description.len() as f64)
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(DeviceInfo::new("x86_64", 4))
    }

    fn tiled_only() -> SolverCatalog {
        let mut catalog = SolverCatalog::new();
        catalog.register(solverforge_autotune::solvers::TiledSolver);
        catalog.register(solverforge_autotune::solvers::ReferenceSolver);
        catalog
    }

    fn problem() -> MatmulProblem {
        MatmulProblem::new(64, 64, 64, DataType::F32)
    }

    #[test]
    fn search_then_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let store = MutableStore::open(dir.path().join("user.jsonl")).unwrap();
        let executor = Arc::new(FakeExecutor::default());
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), executor.clone()).with_user_store(store);

        let first = dispatcher.resolve(&problem()).unwrap();
        assert_eq!(first.source, ResolutionSource::Search);
        assert_eq!(first.solver, SolverId::from("gemm.tiled"));
        assert_eq!(first.record, Some(RecordUpdate::Inserted));
        let trials = executor.trials.load(Ordering::SeqCst);
        assert!(trials > 0);

        let second = dispatcher.resolve(&problem()).unwrap();
        assert_eq!(second.source, ResolutionSource::UserDb);
        assert_eq!(second.config, first.config);
        assert_eq!(executor.trials.load(Ordering::SeqCst), trials);
        assert_eq!(dispatcher.user_records(), 1);
    }

    #[test]
    fn enforce_none_uses_heuristic() {
        let executor = Arc::new(FakeExecutor::default());
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), executor.clone())
            .with_enforce(FindEnforce::None);
        let resolution = dispatcher.resolve(&problem()).unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert_eq!(resolution.solver, SolverId::from("gemm.tiled"));
        assert_eq!(executor.trials.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_search_falls_back_to_default() {
        let executor = Arc::new(FakeExecutor {
            fail: true,
            ..FakeExecutor::default()
        });
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), executor);
        let resolution = dispatcher.resolve(&problem()).unwrap();
        assert_eq!(resolution.source, ResolutionSource::Heuristic);
        assert_eq!(resolution.solver, SolverId::from("gemm.tiled"));
    }

    #[test]
    fn system_record_is_used_without_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.jsonl");
        let fingerprint = ProblemFingerprint::derive(&problem(), &ctx().device);
        let blob = "{\"tile_m\":32,\"tile_n\":32,\"tile_k\":16,\"vector_width\":4}";
        {
            let mut writer = MutableStore::open(&path).unwrap();
            writer
                .upsert(PerformanceRecord::new(SolverId::from("gemm.tiled"), fingerprint, blob))
                .unwrap();
        }
        let executor = Arc::new(FakeExecutor::default());
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), executor.clone())
            .with_system_store(Arc::new(ReadonlyStore::open(&path).unwrap()));

        let resolution = dispatcher.resolve(&problem()).unwrap();
        assert_eq!(resolution.source, ResolutionSource::SystemDb);
        assert_eq!(resolution.config.as_deref(), Some(blob));
        assert_eq!(resolution.plan.description, "tile 32x32x16 vw4");
        assert_eq!(executor.trials.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nothing_applicable_is_an_error() {
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), Arc::new(FakeExecutor::default()));
        let err = dispatcher
            .resolve(&MatmulProblem::new(64, 64, 64, DataType::F16))
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoApplicableSolver { .. }));
    }

    #[test]
    fn compact_without_user_table_is_a_no_op() {
        let dispatcher = Dispatcher::new(tiled_only(), ctx(), Arc::new(FakeExecutor::default()));
        dispatcher.compact().unwrap();
        assert_eq!(dispatcher.user_records(), 0);
    }
}
