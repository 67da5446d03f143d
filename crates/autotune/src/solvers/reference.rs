//! Naive single-configuration solver; the fallback of last resort.

use super::is_plain_f32_gemm;
use crate::solver::{ExecutablePlan, ExecutionContext, PerformanceConfig, TunableSolver};
use serde::{Deserialize, Serialize};
use solverforge_kernels::matmul::ReferenceMatmul;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceConfig;

impl PerformanceConfig for ReferenceConfig {
    fn set_next_value(&mut self, _problem: &MatmulProblem) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct ReferenceSolver;

impl TunableSolver for ReferenceSolver {
    type Config = ReferenceConfig;

    fn name(&self) -> &'static str {
        "gemm.reference"
    }

    fn is_tunable(&self) -> bool {
        false
    }

    fn is_applicable(&self, _ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        is_plain_f32_gemm(problem)
    }

    fn default_config(&self, _problem: &MatmulProblem) -> ReferenceConfig {
        ReferenceConfig
    }

    fn is_valid_config(&self, _problem: &MatmulProblem, _config: &ReferenceConfig) -> bool {
        true
    }

    fn build_solution(&self, _problem: &MatmulProblem, _config: &ReferenceConfig) -> ExecutablePlan {
        ExecutablePlan::new(
            SolverId::new(self.name()),
            Arc::new(ReferenceMatmul::new()),
            "reference",
        )
    }
}
