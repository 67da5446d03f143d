//! Shared helpers for kernel implementations.

use crate::config::ActivationKind;
use crate::problem::MatmulProblem;
use anyhow::{bail, Result};
use ndarray::{Array2, ArrayView2};

pub fn validate_matmul_inputs(lhs: &ArrayView2<'_, f32>, rhs: &ArrayView2<'_, f32>) -> Result<()> {
    if lhs.ncols() != rhs.nrows() {
        bail!(
            "matmul dimension mismatch: lhs {}x{} vs rhs {}x{}",
            lhs.nrows(),
            lhs.ncols(),
            rhs.nrows(),
            rhs.ncols()
        );
    }
    Ok(())
}

pub fn apply_bias_activation(
    mut output: Array2<f32>,
    bias: Option<&ArrayView2<'_, f32>>,
    activation: ActivationKind,
) -> Result<Array2<f32>> {
    if let Some(bias) = bias {
        if bias.shape() != output.shape() {
            bail!(
                "bias shape {:?} incompatible with output {:?}",
                bias.shape(),
                output.shape()
            );
        }
        output += bias;
    }

    match activation {
        ActivationKind::None => Ok(output),
        ActivationKind::Relu => {
            output.mapv_inplace(|x| x.max(0.0));
            Ok(output)
        }
        ActivationKind::Gelu => {
            // Approximate GELU (tanh formulation).
            output.mapv_inplace(|x| {
                let c = (2.0 / std::f32::consts::PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh())
            });
            Ok(output)
        }
    }
}

/// Seeded operands in [-1, 1) shaped for `problem`, used for timing trials.
pub fn synthetic_operands(problem: &MatmulProblem, seed: u64) -> (Array2<f32>, Array2<f32>) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let lhs = Array2::from_shape_fn((problem.m, problem.k), |_| rng.f32() * 2.0 - 1.0);
    let rhs = Array2::from_shape_fn((problem.k, problem.n), |_| rng.f32() * 2.0 - 1.0);
    (lhs, rhs)
}
