//! Trial execution and timing.

use crate::solver::ExecutablePlan;
use anyhow::{ensure, Result};
use solverforge_kernels::config::ActivationKind;
use solverforge_kernels::matmul::MatmulInputs;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_kernels::utils::synthetic_operands;
use std::time::{Duration, Instant};

/// Runs a plan and reports its cost in milliseconds. This is the only place
/// the search touches the device.
pub trait TrialExecutor: Send + Sync {
    fn measure(&self, plan: &ExecutablePlan, problem: &MatmulProblem) -> Result<f64>;
}

/// Times plans on the host CPU against seeded synthetic operands.
#[derive(Debug, Clone)]
pub struct CpuTrialExecutor {
    warmup_runs: usize,
    runs: usize,
    seed: u64,
}

impl CpuTrialExecutor {
    pub fn new() -> Self {
        Self {
            warmup_runs: 1,
            runs: 5,
            seed: 0x5eed,
        }
    }

    pub fn with_runs(mut self, warmup_runs: usize, runs: usize) -> Self {
        self.warmup_runs = warmup_runs;
        self.runs = runs.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl Default for CpuTrialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialExecutor for CpuTrialExecutor {
    fn measure(&self, plan: &ExecutablePlan, problem: &MatmulProblem) -> Result<f64> {
        ensure!(
            plan.kernel.supports(problem),
            "kernel {} does not support problem {}x{}x{}",
            plan.kernel.name(),
            problem.m,
            problem.n,
            problem.k
        );
        let (lhs, rhs) = synthetic_operands(problem, self.seed);
        let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::None);

        // Warmup runs to avoid cold-start noise.
        for _ in 0..self.warmup_runs {
            let _ = plan.run(problem, &inputs)?;
        }

        let mut total = Duration::default();
        for _ in 0..self.runs {
            let start = Instant::now();
            let _ = plan.run(problem, &inputs)?;
            total += start.elapsed();
        }

        Ok(total.as_secs_f64() * 1000.0 / self.runs as f64)
    }
}
