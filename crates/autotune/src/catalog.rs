//! Ordered solver catalog.

use crate::solver::{DynSolver, ExecutionContext, TunableSolver};
use crate::solvers::{InstanceSolver, ParallelSolver, ReferenceSolver, SplitKSolver, TiledSolver};
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

/// Solvers in priority order; earlier entries are preferred when several
/// apply to the same problem.
#[derive(Default, Clone)]
pub struct SolverCatalog {
    solvers: Vec<DynSolver>,
}

impl SolverCatalog {
    pub fn new() -> Self {
        Self {
            solvers: Vec::new(),
        }
    }

    pub fn with_default_solvers() -> Self {
        let mut catalog = Self::new();
        catalog.register(InstanceSolver);
        catalog.register(TiledSolver);
        catalog.register(ParallelSolver);
        catalog.register(SplitKSolver);
        catalog.register(ReferenceSolver);
        catalog
    }

    pub fn register<S>(&mut self, solver: S)
    where
        S: TunableSolver + 'static,
    {
        self.solvers.push(Arc::new(solver));
    }

    pub fn register_dyn(&mut self, solver: DynSolver) {
        self.solvers.push(solver);
    }

    pub fn solvers(&self) -> &[DynSolver] {
        &self.solvers
    }

    pub fn find(&self, id: &str) -> Option<DynSolver> {
        self.solvers
            .iter()
            .find(|solver| solver.id().as_str() == id)
            .map(Arc::clone)
    }

    /// Applicable solvers for `problem`, in catalog order.
    pub fn applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> Vec<DynSolver> {
        self.solvers
            .iter()
            .filter(|solver| solver.is_applicable(ctx, problem))
            .map(Arc::clone)
            .collect()
    }

    pub fn ids(&self) -> Vec<SolverId> {
        self.solvers.iter().map(|solver| solver.id()).collect()
    }
}

impl std::fmt::Debug for SolverCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.solvers.iter().map(|solver| solver.id()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solverforge_kernels::config::DataType;
    use solverforge_kernels::problem::DeviceInfo;

    fn ctx(cu: usize) -> ExecutionContext {
        ExecutionContext::new(DeviceInfo::new("x86_64", cu))
    }

    #[test]
    fn default_catalog_is_in_priority_order() {
        let ids: Vec<String> = SolverCatalog::with_default_solvers()
            .ids()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(
            ids,
            [
                "gemm.instance",
                "gemm.tiled",
                "gemm.parallel",
                "gemm.splitk",
                "gemm.reference"
            ]
        );
    }

    #[test]
    fn applicable_filters_and_keeps_order() {
        let catalog = SolverCatalog::with_default_solvers();
        let problem = MatmulProblem::new(8, 8, 8, DataType::F32);
        let ids: Vec<SolverId> = catalog
            .applicable(&ctx(4), &problem)
            .iter()
            .map(|solver| solver.id())
            .collect();
        assert_eq!(ids, vec![SolverId::from("gemm.reference")]);

        let problem = MatmulProblem::new(64, 64, 64, DataType::F32);
        assert_eq!(catalog.applicable(&ctx(4), &problem).len(), 5);
        assert_eq!(catalog.applicable(&ctx(1), &problem).len(), 3);
    }

    #[test]
    fn deterministic_mode_drops_split_k() {
        let catalog = SolverCatalog::with_default_solvers();
        let problem = MatmulProblem::new(64, 64, 256, DataType::F32);
        let ids = |ctx: &ExecutionContext| -> Vec<SolverId> {
            catalog
                .applicable(ctx, &problem)
                .iter()
                .map(|solver| solver.id())
                .collect()
        };
        let mut relaxed = ids(&ctx(4));
        assert!(relaxed.contains(&SolverId::from("gemm.splitk")));

        relaxed.retain(|id| id.as_str() != "gemm.splitk");
        assert_eq!(ids(&ctx(4).with_deterministic(true)), relaxed);
    }

    #[test]
    fn disabled_solvers_are_skipped() {
        let catalog = SolverCatalog::with_default_solvers();
        let problem = MatmulProblem::new(64, 64, 64, DataType::F32);
        let ctx = ctx(4).with_disabled(["gemm.instance", "gemm.tiled"]);
        let first = catalog.applicable(&ctx, &problem);
        assert_eq!(first[0].id(), SolverId::from("gemm.parallel"));
    }

    #[test]
    fn unsupported_problem_has_no_solver() {
        let catalog = SolverCatalog::with_default_solvers();
        let problem = MatmulProblem::new(64, 64, 64, DataType::F16);
        assert!(catalog.applicable(&ctx(4), &problem).is_empty());
        let empty = MatmulProblem::new(0, 64, 64, DataType::F32);
        assert!(catalog.applicable(&ctx(4), &empty).is_empty());
        let overflowing = MatmulProblem::new(1 << 31, 4, 1 << 31, DataType::F32);
        assert!(catalog.applicable(&ctx(4), &overflowing).is_empty());
    }

    #[test]
    fn find_by_id() {
        let catalog = SolverCatalog::with_default_solvers();
        assert!(catalog.find("gemm.tiled").is_some());
        assert!(catalog.find("gemm.unknown").is_none());
    }
}
