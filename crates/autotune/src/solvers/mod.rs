//! Matmul solver variants.

mod instance;
mod parallel;
mod reference;
mod split_k;
mod tiled;

pub use instance::{InstanceConfig, InstanceSolver};
pub use parallel::{ParallelConfig, ParallelSolver};
pub use reference::{ReferenceConfig, ReferenceSolver};
pub use split_k::{SplitKConfig, SplitKSolver};
pub use tiled::{TiledConfig, TiledSolver};

use solverforge_kernels::config::DataType;
use solverforge_kernels::problem::MatmulProblem;

/// Problems larger than this are left to out-of-core paths.
const MAX_FOOTPRINT_BYTES: usize = 1 << 30;

/// Structural checks shared by the CPU solvers: one f32 type, untransposed,
/// unbatched, and within the size limit.
fn is_plain_f32_gemm(problem: &MatmulProblem) -> bool {
    problem.has_uniform_type()
        && problem.a_type == DataType::F32
        && problem.is_row_major()
        && problem.batch <= 1
        && problem
            .data_footprint_bytes()
            .is_some_and(|bytes| bytes <= MAX_FOOTPRINT_BYTES)
}

/// Steps `current` to the next entry of `values`, wrapping to the first.
/// Returns false when it wrapped.
fn step(values: &[usize], current: &mut usize) -> bool {
    let next = values
        .iter()
        .position(|v| v == current)
        .map(|idx| idx + 1)
        .unwrap_or(values.len());
    match values.get(next) {
        Some(value) => {
            *current = *value;
            true
        }
        None => {
            *current = values[0];
            false
        }
    }
}
