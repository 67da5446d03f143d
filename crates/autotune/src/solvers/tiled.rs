//! Cache-blocked solver tuned over tile shape and vector width.

use super::{is_plain_f32_gemm, step};
use crate::solver::{ExecutablePlan, ExecutionContext, PerformanceConfig, TunableSolver};
use serde::{Deserialize, Serialize};
use solverforge_kernels::config::{DataType, MatmulTilingConfig};
use solverforge_kernels::matmul::TiledMatmul;
use solverforge_kernels::problem::MatmulProblem;
use solverforge_perfdb::record::SolverId;
use std::sync::Arc;

const TILE_MN: [usize; 4] = [16, 32, 64, 128];
const TILE_K: [usize; 3] = [16, 32, 64];
const VECTOR_WIDTH: [usize; 2] = [4, 8];

/// Per-tile budget for the A and B blocks, roughly an L1/L2 share.
const WORKING_SET_BYTES: usize = 64 * 1024;

/// Smallest dimension the solver takes on.
const MIN_DIM: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TiledConfig {
    pub tile_m: usize,
    pub tile_n: usize,
    pub tile_k: usize,
    pub vector_width: usize,
}

impl TiledConfig {
    pub fn first() -> Self {
        Self {
            tile_m: TILE_MN[0],
            tile_n: TILE_MN[0],
            tile_k: TILE_K[0],
            vector_width: VECTOR_WIDTH[0],
        }
    }

    pub fn tiling(&self) -> MatmulTilingConfig {
        MatmulTilingConfig::new(self.tile_m, self.tile_n, self.tile_k, self.vector_width)
    }
}

impl PerformanceConfig for TiledConfig {
    fn is_valid_value(&self) -> bool {
        TILE_MN.contains(&self.tile_m)
            && TILE_MN.contains(&self.tile_n)
            && TILE_K.contains(&self.tile_k)
            && VECTOR_WIDTH.contains(&self.vector_width)
    }

    // Odometer order: vector width fastest, tile_m slowest.
    fn set_next_value(&mut self, _problem: &MatmulProblem) -> bool {
        if !self.is_valid_value() {
            *self = Self::first();
            return true;
        }
        step(&VECTOR_WIDTH, &mut self.vector_width)
            || step(&TILE_K, &mut self.tile_k)
            || step(&TILE_MN, &mut self.tile_n)
            || step(&TILE_MN, &mut self.tile_m)
    }
}

fn padded(dim: usize) -> usize {
    dim.div_ceil(MIN_DIM) * MIN_DIM
}

/// Largest candidate not above `dim`, or the smallest candidate.
fn fit(values: &[usize], dim: usize) -> usize {
    values
        .iter()
        .copied()
        .filter(|v| *v <= dim)
        .max()
        .unwrap_or(values[0])
}

#[derive(Debug, Default)]
pub struct TiledSolver;

impl TunableSolver for TiledSolver {
    type Config = TiledConfig;

    fn name(&self) -> &'static str {
        "gemm.tiled"
    }

    fn is_applicable(&self, _ctx: &ExecutionContext, problem: &MatmulProblem) -> bool {
        is_plain_f32_gemm(problem)
            && problem.m >= MIN_DIM
            && problem.n >= MIN_DIM
            && problem.k >= MIN_DIM
    }

    fn default_config(&self, problem: &MatmulProblem) -> TiledConfig {
        let volume = problem.m.saturating_mul(problem.n).saturating_mul(problem.k);
        let (tile_mn, tile_k) = if volume < 100_000 {
            (32, 16)
        } else if volume < 10_000_000 {
            (64, 32)
        } else {
            (128, 64)
        };
        TiledConfig {
            tile_m: fit(&TILE_MN, tile_mn.min(problem.m)),
            tile_n: fit(&TILE_MN, tile_mn.min(problem.n)),
            tile_k: fit(&TILE_K, tile_k.min(problem.k)),
            vector_width: 8,
        }
    }

    fn search_start(&self, _problem: &MatmulProblem) -> TiledConfig {
        TiledConfig::first()
    }

    fn is_valid_config(&self, problem: &MatmulProblem, config: &TiledConfig) -> bool {
        config.is_valid_value()
            && config.tile_m <= padded(problem.m)
            && config.tile_n <= padded(problem.n)
            && config.tile_k <= padded(problem.k)
            && config.tiling().working_set_bytes(DataType::F32) <= WORKING_SET_BYTES
    }

    fn build_solution(&self, _problem: &MatmulProblem, config: &TiledConfig) -> ExecutablePlan {
        ExecutablePlan::new(
            SolverId::new(self.name()),
            Arc::new(TiledMatmul::new(config.tiling())),
            format!(
                "tile {}x{}x{} vw{}",
                config.tile_m, config.tile_n, config.tile_k, config.vector_width
            ),
        )
    }
}
