//! CPU runtime entrypoints.

use crate::dispatcher::{DispatchError, Dispatcher, Resolution};
use ndarray::Array2;
use solverforge_kernels::matmul::MatmulInputs;
use solverforge_kernels::problem::MatmulProblem;
use std::time::Instant;
use tracing::info;

pub struct Execution {
    pub output: Array2<f32>,
    pub resolution: Resolution,
    pub elapsed_ms: f64,
}

impl Dispatcher {
    /// Resolves `problem` and runs the chosen plan on `inputs`.
    pub fn execute(
        &self,
        problem: &MatmulProblem,
        inputs: &MatmulInputs<'_>,
    ) -> Result<Execution, DispatchError> {
        let resolution = self.resolve(problem)?;
        self.run(resolution, problem, inputs)
    }

    /// Runs an already resolved plan on `inputs` without consulting the
    /// tables or searching again.
    pub fn run(
        &self,
        resolution: Resolution,
        problem: &MatmulProblem,
        inputs: &MatmulInputs<'_>,
    ) -> Result<Execution, DispatchError> {
        info!(
            solver = %resolution.solver,
            kernel = resolution.plan.kernel.name(),
            config = %resolution.plan.description,
            source = ?resolution.source,
            m = problem.m,
            n = problem.n,
            k = problem.k,
            "executing matmul plan"
        );

        let start = Instant::now();
        let output = resolution
            .plan
            .run(problem, inputs)
            .map_err(|e| DispatchError::Execution {
                solver: resolution.solver.clone(),
                message: format!("{e:#}"),
            })?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        Ok(Execution {
            output,
            resolution,
            elapsed_ms,
        })
    }
}
