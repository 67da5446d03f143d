//! Split-k solver: the reduction dimension is cut into slices summed across
//! rayon tasks. The sum order varies between runs, so the solver is withheld
//! when deterministic results are requested.

use super::{is_plain_f32_gemm, step};
use crate::solver::{ExecutablePlan, ExecutionContext, PerformanceConfig, TunableSolver};
use serde::{Deserialize, Serialize};
use solverforge_kernels::matmul::SplitKMatmul;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

const SPLITS: [usize; 4] = [2, 4, 8, 16];

/// Smallest reduction slice worth a task of its own.
const MIN_SLICE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitKConfig {
    pub splits: usize,
}

impl PerformanceConfig for SplitKConfig {
    fn is_valid_value(&self) -> bool {
        SPLITS.contains(&self.splits)
    }

    fn set_next_value(&mut self, _problem: &MatmulProblem) -> bool {
        step(&SPLITS, &mut self.splits)
    }
}

#[derive(Debug, Default)]
pub struct SplitKSolver;

impl TunableSolver for SplitKSolver {
    type Config = SplitKConfig;

    fn name(&self) -> &'static str {
        "gemm.splitk"
    }

    fn is_deterministic(&self) -> bool {
        false
    }

    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        ctx.device.compute_units > 1
            && problem.k >= SPLITS[0] * MIN_SLICE * 2
            && is_plain_f32_gemm(problem)
    }

    fn default_config(&self, problem: &MatmulProblem) -> SplitKConfig {
        let splits = SPLITS
            .iter()
            .copied()
            .filter(|s| s * MIN_SLICE * 4 <= problem.k)
            .max()
            .unwrap_or(SPLITS[0]);
        SplitKConfig { splits }
    }

    fn search_start(&self, _problem: &MatmulProblem) -> SplitKConfig {
        SplitKConfig { splits: SPLITS[0] }
    }

    fn is_valid_config(&self, problem: &MatmulProblem, config: &SplitKConfig) -> bool {
        config.is_valid_value() && problem.k / config.splits >= MIN_SLICE
    }

    fn build_solution(&self, _problem: &MatmulProblem, config: &SplitKConfig) -> ExecutablePlan {
        ExecutablePlan::new(
            SolverId::new(self.name()),
            Arc::new(SplitKMatmul::new(config.splits)),
            format!("{} k slices", config.splits),
        )
    }
}
