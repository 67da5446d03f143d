//! Solver over the precompiled kernel instance library.
//!
//! The configuration space is the list of library instances that support
//! the problem, queried once when the walk begins. Only the chosen
//! instance id is persisted.

use super::is_plain_f32_gemm;
use crate::solver::{ExecutablePlan, ExecutionContext, PerformanceConfig, TunableSolver};
use serde::{Deserialize, Serialize};
use solverforge_kernels::library::{find_instance, supported_instances};
use solverforge_kernels::matmul::ReferenceMatmul;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

/// Architectures the instance library is built for.
const SUPPORTED_ARCHS: [&str; 2] = ["x86_64", "aarch64"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub kernel_id: String,
    #[serde(skip)]
    valid_kernels: Vec<String>,
    #[serde(skip)]
    index: usize,
}

impl InstanceConfig {
    pub fn new(kernel_id: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            ..Self::default()
        }
    }

    fn seeded(problem: &MatmulProblem) -> Self {
        let valid_kernels: Vec<String> = supported_instances(problem)
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            kernel_id: valid_kernels.first().cloned().unwrap_or_default(),
            valid_kernels,
            index: 0,
        }
    }
}

// Walk state is not part of the configuration's identity.
impl PartialEq for InstanceConfig {
    fn eq(&self, other: &Self) -> bool {
        self.kernel_id == other.kernel_id
    }
}

impl PerformanceConfig for InstanceConfig {
    fn is_valid_value(&self) -> bool {
        self.index < self.valid_kernels.len()
    }

    fn set_next_value(&mut self, problem: &MatmulProblem) -> bool {
        if self.valid_kernels.is_empty() {
            *self = Self::seeded(problem);
            return !self.valid_kernels.is_empty();
        }
        self.index += 1;
        match self.valid_kernels.get(self.index) {
            Some(id) => {
                self.kernel_id = id.clone();
                true
            }
            None => {
                self.index = 0;
                self.kernel_id = self.valid_kernels[0].clone();
                false
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InstanceSolver;

impl TunableSolver for InstanceSolver {
    type Config = InstanceConfig;

    fn name(&self) -> &'static str {
        "gemm.instance"
    }

    fn is_applicable(&self, ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        if !is_plain_f32_gemm(problem) || !problem.is_packed() {
            return false;
        }
        if !SUPPORTED_ARCHS.contains(&ctx.device.arch.as_str()) {
            return false;
        }
        !supported_instances(problem).is_empty()
    }

    fn default_config(&self, problem: &MatmulProblem) -> InstanceConfig {
        InstanceConfig::seeded(problem)
    }

    fn is_valid_config(&self, problem: &MatmulProblem, config: &InstanceConfig) -> bool {
        find_instance(&config.kernel_id).is_some_and(|instance| instance.is_supported(problem))
    }

    fn build_solution(&self, _problem: &MatmulProblem, config: &InstanceConfig) -> ExecutablePlan {
        // Unknown ids fall back to the reference kernel.
        let kernel = match find_instance(&config.kernel_id) {
            Some(instance) => instance.kernel(),
            None => Arc::new(ReferenceMatmul::new()),
        };
        ExecutablePlan::new(SolverId::new(self.name()), kernel, config.kernel_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TrialExecutor;
    use crate::search::{search, SearchError, SearchOptions};
    use crate::solver::Solver;
    use solverforge_kernels::config::DataType;
    use solverforge_kernels::problem::DeviceInfo;

    struct FlatExecutor;

    impl TrialExecutor for FlatExecutor {
        fn measure(&self, _plan: &ExecutablePlan, _problem: &MatmulProblem) -> anyhow::Result<f64> {
            Ok(1.0)
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(DeviceInfo::new("x86_64", 4))
    }

    #[test]
    fn walk_visits_each_supported_instance() {
        let problem = MatmulProblem::new(128, 128, 128, DataType::F32);
        let mut config = InstanceSolver.search_start(&problem);
        let mut seen = vec![config.kernel_id.clone()];
        while config.set_next_value(&problem) {
            seen.push(config.kernel_id.clone());
        }
        let expected: Vec<String> = supported_instances(&problem)
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(seen, expected);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn unsupported_type_has_no_candidates() {
        let problem = MatmulProblem::new(128, 128, 128, DataType::F16);
        assert!(!Solver::is_applicable(&InstanceSolver, &ctx(), &problem));
        let err = search(&InstanceSolver, &ctx(), &problem, &FlatExecutor, &SearchOptions::default())
            .unwrap_err();
        assert!(matches!(err, SearchError::NoCandidates { .. }));
    }

    #[test]
    fn unknown_architecture_is_not_applicable() {
        let problem = MatmulProblem::new(64, 64, 64, DataType::F32);
        let riscv = ExecutionContext::new(DeviceInfo::new("riscv64", 4));
        assert!(TunableSolver::is_applicable(&InstanceSolver, &ctx(), &problem));
        assert!(!TunableSolver::is_applicable(&InstanceSolver, &riscv, &problem));
    }

    #[test]
    fn equality_matches_serialized_form() {
        let problem = MatmulProblem::new(128, 128, 128, DataType::F32);
        let mut walked = InstanceSolver.search_start(&problem);
        walked.set_next_value(&problem);
        let decoded = InstanceConfig::new(walked.kernel_id.clone());
        assert_eq!(walked, decoded);
        assert_eq!(walked.to_blob().unwrap(), decoded.to_blob().unwrap());
        assert_eq!(
            decoded.to_blob().unwrap(),
            "{\"kernel_id\":\"gemm_f32_64x64x32_v8_exact\"}"
        );
    }

    #[test]
    fn cached_instance_is_revalidated() {
        let solver = InstanceSolver;
        let small = MatmulProblem::new(64, 64, 64, DataType::F32);
        let blob = "{\"kernel_id\":\"gemm_f32_128x128x32_v8_exact\"}";
        assert!(solver.plan_from_record(&small, blob).is_none());
        let big = MatmulProblem::new(256, 256, 256, DataType::F32);
        let plan = solver.plan_from_record(&big, blob).unwrap();
        assert_eq!(plan.description, "gemm_f32_128x128x32_v8_exact");
    }
}
