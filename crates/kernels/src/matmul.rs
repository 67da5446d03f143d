//! Matrix multiplication kernels.

use crate::config::{ActivationKind, MatmulTilingConfig};
use crate::problem::MatmulProblem;
use crate::utils::{apply_bias_activation, validate_matmul_inputs};
use anyhow::{ensure, Result};
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::sync::Arc;

pub struct MatmulInputs<'a> {
    pub lhs: ArrayView2<'a, f32>,
    pub rhs: ArrayView2<'a, f32>,
    pub bias: Option<ArrayView2<'a, f32>>,
    pub activation: ActivationKind,
}

impl<'a> MatmulInputs<'a> {
    pub fn new(
        lhs: ArrayView2<'a, f32>,
        rhs: ArrayView2<'a, f32>,
        bias: Option<ArrayView2<'a, f32>>,
        activation: ActivationKind,
    ) -> Self {
        Self {
            lhs,
            rhs,
            bias,
            activation,
        }
    }
}

pub trait MatmulKernel: Send + Sync {
    fn name(&self) -> &'static str;
    fn config(&self) -> MatmulTilingConfig;
    fn supports(&self, problem: &MatmulProblem) -> bool;
    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>>;
}

pub type DynMatmulKernel = Arc<dyn MatmulKernel>;

#[derive(Default)]
pub struct ReferenceMatmul;

impl ReferenceMatmul {
    pub fn new() -> Self {
        Self
    }
}

impl MatmulKernel for ReferenceMatmul {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn config(&self) -> MatmulTilingConfig {
        MatmulTilingConfig::default()
    }

    fn supports(&self, problem: &MatmulProblem) -> bool {
        problem.batch <= 1
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        ensure!(
            problem.batch <= 1,
            "reference kernel does not support batching yet"
        );
        validate_matmul_inputs(&inputs.lhs, &inputs.rhs)?;

        let result = inputs.lhs.dot(&inputs.rhs);
        let result = apply_bias_activation(result, inputs.bias.as_ref(), inputs.activation)?;
        Ok(result)
    }
}

/// Blocked matmul that honors explicit tiling and vector-width hints.
pub struct TiledMatmul {
    config: MatmulTilingConfig,
}

impl TiledMatmul {
    pub fn new(config: MatmulTilingConfig) -> Self {
        Self { config }
    }
}

impl MatmulKernel for TiledMatmul {
    fn name(&self) -> &'static str {
        "tiled"
    }

    fn config(&self) -> MatmulTilingConfig {
        self.config
    }

    fn supports(&self, problem: &MatmulProblem) -> bool {
        problem.batch <= 1
            && self.config.tile_m > 0
            && self.config.tile_n > 0
            && self.config.tile_k > 0
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        ensure!(
            problem.batch <= 1,
            "tiled kernel does not support batching yet"
        );
        validate_matmul_inputs(&inputs.lhs, &inputs.rhs)?;

        let mut output = Array2::<f32>::zeros((problem.m, problem.n));
        let tm = self.config.tile_m.max(1);
        let tn = self.config.tile_n.max(1);
        let tk = self.config.tile_k.max(1);
        let vw = self.config.unroll.max(1);

        let lhs = inputs.lhs;
        let rhs = inputs.rhs;

        let m = problem.m;
        let n = problem.n;
        let k = problem.k;

        for i0 in (0..m).step_by(tm) {
            let i_max = (i0 + tm).min(m);
            for j0 in (0..n).step_by(tn) {
                let j_max = (j0 + tn).min(n);
                for p0 in (0..k).step_by(tk) {
                    let p_max = (p0 + tk).min(k);
                    let a_block = lhs.slice(s![i0..i_max, p0..p_max]);
                    let b_block = rhs.slice(s![p0..p_max, j0..j_max]);
                    let mut c_block = output.slice_mut(s![i0..i_max, j0..j_max]);

                    for (row_idx, a_row) in a_block.outer_iter().enumerate() {
                        for (col_idx, b_col) in b_block.axis_iter(Axis(1)).enumerate() {
                            let mut acc = 0.0f32;
                            for chunk in (0..a_row.len()).step_by(vw) {
                                let end = (chunk + vw).min(a_row.len());
                                for idx in chunk..end {
                                    acc += a_row[idx] * b_col[idx];
                                }
                            }
                            c_block[(row_idx, col_idx)] += acc;
                        }
                    }
                }
            }
        }

        let output = apply_bias_activation(output, inputs.bias.as_ref(), inputs.activation)?;
        Ok(output)
    }
}

/// Row-parallel matmul; each rayon task owns `rows_per_task` output rows.
pub struct ParallelMatmul {
    rows_per_task: usize,
}

impl ParallelMatmul {
    pub fn new(rows_per_task: usize) -> Self {
        Self {
            rows_per_task: rows_per_task.max(1),
        }
    }

    pub fn rows_per_task(&self) -> usize {
        self.rows_per_task
    }
}

impl Default for ParallelMatmul {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MatmulKernel for ParallelMatmul {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn config(&self) -> MatmulTilingConfig {
        MatmulTilingConfig {
            tile_m: self.rows_per_task,
            ..MatmulTilingConfig::default()
        }
    }

    fn supports(&self, problem: &MatmulProblem) -> bool {
        problem.batch <= 1
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        ensure!(
            problem.batch <= 1,
            "parallel kernel does not support batching yet"
        );
        validate_matmul_inputs(&inputs.lhs, &inputs.rhs)?;

        let lhs = inputs.lhs;
        let rhs = inputs.rhs;
        let rows = self.rows_per_task;
        let mut output = Array2::<f32>::zeros((problem.m, problem.n));

        output
            .axis_chunks_iter_mut(Axis(0), rows)
            .into_par_iter()
            .enumerate()
            .for_each(|(chunk_idx, mut chunk)| {
                let row_base = chunk_idx * rows;
                for (offset, mut row) in chunk.outer_iter_mut().enumerate() {
                    let lhs_row = lhs.row(row_base + offset);
                    for (col_idx, value) in row.iter_mut().enumerate() {
                        *value = lhs_row.dot(&rhs.column(col_idx));
                    }
                }
            });

        let output = apply_bias_activation(output, inputs.bias.as_ref(), inputs.activation)?;
        Ok(output)
    }
}

/// Splits the reduction dimension into `splits` slices, multiplies them on
/// rayon tasks and sums the partial products.
///
/// The summation tree follows rayon's work splitting, so results may differ
/// in the low bits from run to run.
#[derive(Debug, Clone, Copy)]
pub struct SplitKMatmul {
    splits: usize,
}

impl SplitKMatmul {
    pub fn new(splits: usize) -> Self {
        Self {
            splits: splits.max(1),
        }
    }

    pub fn splits(&self) -> usize {
        self.splits
    }
}

impl MatmulKernel for SplitKMatmul {
    fn name(&self) -> &'static str {
        "split_k"
    }

    fn config(&self) -> MatmulTilingConfig {
        MatmulTilingConfig::default()
    }

    fn supports(&self, problem: &MatmulProblem) -> bool {
        problem.batch <= 1
    }

    fn run(&self, problem: &MatmulProblem, inputs: &MatmulInputs<'_>) -> Result<Array2<f32>> {
        ensure!(
            problem.batch <= 1,
            "split-k kernel does not support batching yet"
        );
        validate_matmul_inputs(&inputs.lhs, &inputs.rhs)?;

        let lhs = inputs.lhs;
        let rhs = inputs.rhs;
        let (m, k) = lhs.dim();
        let n = rhs.ncols();
        let chunk = k.div_ceil(self.splits).max(1);
        let starts: Vec<usize> = (0..k).step_by(chunk).collect();

        let output = starts
            .into_par_iter()
            .map(|start| {
                let end = (start + chunk).min(k);
                lhs.slice(s![.., start..end]).dot(&rhs.slice(s![start..end, ..]))
            })
            .reduce(|| Array2::<f32>::zeros((m, n)), |acc, partial| acc + partial);

        let output = apply_bias_activation(output, inputs.bias.as_ref(), inputs.activation)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataType;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn operands(problem: &MatmulProblem) -> (Array2<f32>, Array2<f32>) {
        let lhs = Array2::from_shape_fn((problem.m, problem.k), |(i, j)| (i + j) as f32 * 0.1);
        let rhs =
            Array2::from_shape_fn((problem.k, problem.n), |(i, j)| (i * j + 1) as f32 * 0.05);
        (lhs, rhs)
    }

    #[test]
    fn parallel_matmul_matches_reference() {
        let problem = MatmulProblem::new(33, 24, 16, DataType::F32);
        let (lhs, rhs) = operands(&problem);
        let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::None);

        let reference = ReferenceMatmul::new()
            .run(&problem, &inputs)
            .expect("reference matmul");

        for rows in [1, 4, 7, 64] {
            let parallel = ParallelMatmul::new(rows)
                .run(&problem, &inputs)
                .expect("parallel matmul");
            for i in 0..problem.m {
                for j in 0..problem.n {
                    assert_abs_diff_eq!(reference[(i, j)], parallel[(i, j)], epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn split_k_matches_reference() {
        let problem = MatmulProblem::new(12, 10, 67, DataType::F32);
        let (lhs, rhs) = operands(&problem);
        let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::Relu);

        let reference = ReferenceMatmul::new()
            .run(&problem, &inputs)
            .expect("reference matmul");

        for splits in [1, 2, 5, 128] {
            let split = SplitKMatmul::new(splits)
                .run(&problem, &inputs)
                .expect("split-k matmul");
            assert_eq!(split.dim(), (problem.m, problem.n));
            for i in 0..problem.m {
                for j in 0..problem.n {
                    assert_relative_eq!(reference[(i, j)], split[(i, j)], max_relative = 1e-4);
                }
            }
        }
    }

    #[test]
    fn tiled_matmul_handles_ragged_tiles() {
        let problem = MatmulProblem::new(37, 19, 23, DataType::F32);
        let (lhs, rhs) = operands(&problem);
        let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::Relu);

        let reference = ReferenceMatmul::new()
            .run(&problem, &inputs)
            .expect("reference matmul");
        let tiled = TiledMatmul::new(MatmulTilingConfig::new(16, 8, 16, 4))
            .run(&problem, &inputs)
            .expect("tiled matmul");

        for i in 0..problem.m {
            for j in 0..problem.n {
                assert_abs_diff_eq!(reference[(i, j)], tiled[(i, j)], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn kernels_reject_batched_problems() {
        let problem = MatmulProblem::new(4, 4, 4, DataType::F32).with_batch(2);
        let (lhs, rhs) = operands(&problem);
        let inputs = MatmulInputs::new(lhs.view(), rhs.view(), None, ActivationKind::None);
        assert!(ReferenceMatmul::new().run(&problem, &inputs).is_err());
        assert!(!ParallelMatmul::default().supports(&problem));
    }
}
