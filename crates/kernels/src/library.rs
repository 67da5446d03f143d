//! Precompiled kernel instance library.
//!
//! Each instance is a fixed tiling with its own support predicate, the way a
//! vendor library ships a factory of device operations. Solvers query the
//! library to enumerate the instances usable for a problem.

use crate::config::{DataType, MatmulTilingConfig};
use crate::matmul::{DynMatmulKernel, TiledMatmul};
use crate::problem::MatmulProblem;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelInstance {
    pub id: &'static str,
    pub tiling: MatmulTilingConfig,
    /// Instance requires every dimension to be a multiple of its tile.
    pub exact_tiles: bool,
}

impl KernelInstance {
    const fn new(id: &'static str, tiling: MatmulTilingConfig, exact_tiles: bool) -> Self {
        Self {
            id,
            tiling,
            exact_tiles,
        }
    }

    pub fn is_supported(&self, problem: &MatmulProblem) -> bool {
        if problem.a_type != DataType::F32 || !problem.has_uniform_type() {
            return false;
        }
        if problem.batch > 1 || !problem.is_row_major() || !problem.is_packed() {
            return false;
        }
        let t = &self.tiling;
        if problem.m < t.tile_m || problem.n < t.tile_n || problem.k < t.tile_k {
            return false;
        }
        !self.exact_tiles
            || (problem.m % t.tile_m == 0 && problem.n % t.tile_n == 0 && problem.k % t.tile_k == 0)
    }

    pub fn kernel(&self) -> DynMatmulKernel {
        Arc::new(TiledMatmul::new(self.tiling))
    }
}

const LIBRARY: &[KernelInstance] = &[
    KernelInstance::new(
        "gemm_f32_128x128x32_v8_exact",
        MatmulTilingConfig::new(128, 128, 32, 8),
        true,
    ),
    KernelInstance::new(
        "gemm_f32_64x64x32_v8_exact",
        MatmulTilingConfig::new(64, 64, 32, 8),
        true,
    ),
    KernelInstance::new(
        "gemm_f32_64x32x16_v4",
        MatmulTilingConfig::new(64, 32, 16, 4),
        false,
    ),
    KernelInstance::new(
        "gemm_f32_32x32x16_v4",
        MatmulTilingConfig::new(32, 32, 16, 4),
        false,
    ),
    KernelInstance::new(
        "gemm_f32_16x16x16_v4",
        MatmulTilingConfig::new(16, 16, 16, 4),
        false,
    ),
];

/// Every instance in library order.
pub fn instances() -> &'static [KernelInstance] {
    LIBRARY
}

/// Ids of the instances that support `problem`, in library order.
pub fn supported_instances(problem: &MatmulProblem) -> Vec<&'static str> {
    LIBRARY
        .iter()
        .filter(|instance| instance.is_supported(problem))
        .map(|instance| instance.id)
        .collect()
}

pub fn find_instance(id: &str) -> Option<&'static KernelInstance> {
    LIBRARY.iter().find(|instance| instance.id == id)
}
