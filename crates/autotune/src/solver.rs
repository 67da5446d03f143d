//! Solver contract.
//!
//! Solvers implement [`TunableSolver`] with a concrete configuration type.
//! The dispatcher and catalog work with the object-safe [`Solver`] view,
//! which every `TunableSolver` gets for free and which speaks in serialized
//! configuration blobs.

use crate::executor::TrialExecutor;
use crate::search::{search, SearchError, SearchOptions};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;
use solverforge_kernels::matmul::{DynMatmulKernel, MatmulInputs};
use solverforge_kernels::problem::{DeviceInfo, MatmulProblem};
use solverforge_perfdb::record::SolverId;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Device and policy a problem is solved under.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub device: DeviceInfo,
    /// Only solvers with run-to-run identical results are applicable.
    pub deterministic: bool,
    pub disabled_solvers: BTreeSet<String>,
}

impl ExecutionContext {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            deterministic: false,
            disabled_solvers: BTreeSet::new(),
        }
    }

    pub fn host() -> Self {
        Self::new(DeviceInfo::host())
    }

    pub fn with_deterministic(mut self, deterministic: bool) -> Self {
        self.deterministic = deterministic;
        self
    }

    pub fn with_disabled<I, S>(mut self, solvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_solvers.extend(solvers.into_iter().map(Into::into));
        self
    }

    pub fn is_disabled(&self, solver: &str) -> bool {
        self.disabled_solvers.contains(solver)
    }
}

/// Everything needed to run one solver configuration.
#[derive(Clone)]
pub struct ExecutablePlan {
    pub solver: SolverId,
    pub kernel: DynMatmulKernel,
    /// Human-readable configuration label.
    pub description: String,
}

impl ExecutablePlan {
    pub fn new(solver: SolverId, kernel: DynMatmulKernel, description: impl Into<String>) -> Self {
        Self {
            solver,
            kernel,
            description: description.into(),
        }
    }

    pub fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> anyhow::Result<Array2<f32>> {
        self.kernel.run(problem, inputs)
    }
}

impl fmt::Debug for ExecutablePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutablePlan")
            .field("solver", &self.solver)
            .field("kernel", &self.kernel.name())
            .field("description", &self.description)
            .finish()
    }
}

/// One point in a solver's tunable-parameter space.
///
/// Equal configurations must serialize to identical blobs.
pub trait PerformanceConfig:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync
{
    /// False when the value does not name a real configuration, e.g. when
    /// the space turned out to be empty.
    fn is_valid_value(&self) -> bool {
        true
    }

    /// Moves to the next configuration in a fixed order. Returns false once
    /// every configuration has been visited.
    fn set_next_value(&mut self, problem: &MatmulProblem) -> bool;

    fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn from_blob(blob: &str) -> Option<Self> {
        serde_json::from_str(blob).ok()
    }
}

/// Typed solver contract.
pub trait TunableSolver: Send + Sync {
    type Config: PerformanceConfig;

    fn name(&self) -> &'static str;

    fn is_deterministic(&self) -> bool {
        true
    }

    fn is_tunable(&self) -> bool {
        true
    }

    /// Cheap, side-effect-free and conservative: false on any doubt.
    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool;

    /// Heuristic configuration used without searching.
    fn default_config(&self, problem: &MatmulProblem) -> Self::Config;

    /// Where the search walk begins.
    fn search_start(&self, problem: &MatmulProblem) -> Self::Config {
        self.default_config(problem)
    }

    fn is_valid_config(&self, problem: &MatmulProblem, config: &Self::Config) -> bool;

    fn build_solution(&self, problem: &MatmulProblem, config: &Self::Config) -> ExecutablePlan;
}

/// Search result in serialized form.
#[derive(Debug, Clone)]
pub struct TuningResult {
    pub solver: SolverId,
    pub config: String,
    pub plan: ExecutablePlan,
    pub cost_ms: f64,
    pub visited: usize,
    pub trials: usize,
    pub rejected: usize,
}

/// Object-safe view of a solver.
pub trait Solver: Send + Sync {
    fn id(&self) -> SolverId;

    /// Configuration gates first, then the solver's own checks.
    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool;

    fn is_tunable(&self) -> bool;

    /// Plan for the heuristic configuration, if that configuration is valid.
    fn default_plan(&self, problem: &MatmulProblem) -> Option<ExecutablePlan>;

    fn default_config_blob(&self, problem: &MatmulProblem) -> Option<String>;

    /// Plan for a cached configuration. A blob that fails to decode or no
    /// longer validates for `problem` yields `None`.
    fn plan_from_record(&self, problem: &MatmulProblem, blob: &str) -> Option<ExecutablePlan>;

    fn search(
        &self,
        ctx: &ExecutionContext,
        problem: &MatmulProblem,
        executor: &dyn TrialExecutor,
        options: &SearchOptions,
    ) -> Result<TuningResult, SearchError>;

    /// Whether two blobs decode to equal configurations.
    fn same_config(&self, a: &str, b: &str) -> bool;
}

pub type DynSolver = Arc<dyn Solver>;

impl<T: TunableSolver> Solver for T {
    fn id(&self) -> SolverId {
        SolverId::new(self.name())
    }

    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        if ctx.is_disabled(self.name()) {
            debug!(solver = self.name(), "solver disabled by configuration");
            return false;
        }
        if ctx.deterministic && !TunableSolver::is_deterministic(self) {
            return false;
        }
        if problem.is_empty() {
            return false;
        }
        TunableSolver::is_applicable(self, ctx, problem)
    }

    fn is_tunable(&self) -> bool {
        TunableSolver::is_tunable(self)
    }

    fn default_plan(&self, problem: &MatmulProblem) -> Option<ExecutablePlan> {
        let config = self.default_config(problem);
        if !config.is_valid_value() || !self.is_valid_config(problem, &config) {
            return None;
        }
        Some(self.build_solution(problem, &config))
    }

    fn default_config_blob(&self, problem: &MatmulProblem) -> Option<String> {
        self.default_config(problem).to_blob().ok()
    }

    fn plan_from_record(&self, problem: &MatmulProblem, blob: &str) -> Option<ExecutablePlan> {
        let Some(config) = T::Config::from_blob(blob) else {
            warn!(solver = self.name(), blob, "cached configuration does not decode");
            return None;
        };
        if !self.is_valid_config(problem, &config) {
            warn!(solver = self.name(), blob, "cached configuration is no longer valid");
            return None;
        }
        Some(self.build_solution(problem, &config))
    }

    fn search(
        &self,
        ctx: &ExecutionContext,
        problem: &MatmulProblem,
        executor: &dyn TrialExecutor,
        options: &SearchOptions,
    ) -> Result<TuningResult, SearchError> {
        let outcome = search(self, ctx, problem, executor, options)?;
        let config = outcome.config.to_blob().map_err(|e| SearchError::Encode {
            solver: self.id(),
            message: e.to_string(),
        })?;
        let plan = self.build_solution(problem, &outcome.config);
        Ok(TuningResult {
            solver: self.id(),
            config,
            plan,
            cost_ms: outcome.cost_ms,
            visited: outcome.visited,
            trials: outcome.trials,
            rejected: outcome.rejected,
        })
    }

    fn same_config(&self, a: &str, b: &str) -> bool {
        match (T::Config::from_blob(a), T::Config::from_blob(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
