//! Row-parallel solver tuned over the rows each rayon task owns.

use super::{is_plain_f32_gemm, step};
use crate::solver::{ExecutablePlan, ExecutionContext, PerformanceConfig, TunableSolver};
use serde::{Deserialize, Serialize};
use solverforge_kernels::matmul::ParallelMatmul;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

const ROWS_PER_TASK: [usize; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Row blocks the heuristic splits `m` into.
const ROW_BLOCKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub rows_per_task: usize,
}

impl PerformanceConfig for ParallelConfig {
    fn is_valid_value(&self) -> bool {
        ROWS_PER_TASK.contains(&self.rows_per_task)
    }

    fn set_next_value(&mut self, _problem: &MatmulProblem) -> bool {
        step(&ROWS_PER_TASK, &mut self.rows_per_task)
    }
}

#[derive(Debug, Default)]
pub struct ParallelSolver;

impl TunableSolver for ParallelSolver {
    type Config = ParallelConfig;

    fn name(&self) -> &'static str {
        "gemm.parallel"
    }

    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        ctx.device.compute_units > 1 && problem.m >= 16 && is_plain_f32_gemm(problem)
    }

    fn default_config(&self, problem: &MatmulProblem) -> ParallelConfig {
        ParallelConfig {
            rows_per_task: snap(problem.m / ROW_BLOCKS),
        }
    }

    fn search_start(&self, _problem: &MatmulProblem) -> ParallelConfig {
        ParallelConfig {
            rows_per_task: ROWS_PER_TASK[0],
        }
    }

    fn is_valid_config(&self, problem: &MatmulProblem, config: &ParallelConfig) -> bool {
        config.is_valid_value() && config.rows_per_task <= problem.m
    }

    fn build_solution(&self, _problem: &MatmulProblem, config: &ParallelConfig) -> ExecutablePlan {
        ExecutablePlan::new(
            SolverId::new(self.name()),
            Arc::new(ParallelMatmul::new(config.rows_per_task)),
            format!("{} rows per task", config.rows_per_task),
        )
    }
}

/// Largest listed value not above `rows`, at least the smallest.
fn snap(rows: usize) -> usize {
    ROWS_PER_TASK
        .iter()
        .copied()
        .filter(|v| *v <= rows)
        .max()
        .unwrap_or(ROWS_PER_TASK[0])
}
