//! Problem descriptions, device descriptions and fingerprints.

use crate::config::{DataType, Transpose};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bumped whenever a kernel change can alter which configuration wins.
/// Records written under an older tag stop matching and are re-tuned.
pub const KERNEL_ABI_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulProblem {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub batch: usize,
    pub a_type: DataType,
    pub b_type: DataType,
    pub c_type: DataType,
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
}

impl MatmulProblem {
    /// Unbatched problem with packed row-major operands of a single type.
    pub fn new(m: usize, n: usize, k: usize, dtype: DataType) -> Self {
        Self {
            m,
            n,
            k,
            batch: 1,
            a_type: dtype,
            b_type: dtype,
            c_type: dtype,
            trans_a: Transpose::No,
            trans_b: Transpose::No,
            lda: k,
            ldb: n,
            ldc: n,
        }
    }

    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch;
        self
    }

    /// Switches operand storage order and re-derives packed leading dimensions.
    pub fn with_transpose(mut self, trans_a: Transpose, trans_b: Transpose) -> Self {
        self.trans_a = trans_a;
        self.trans_b = trans_b;
        self.lda = if trans_a.is_transposed() { self.m } else { self.k };
        self.ldb = if trans_b.is_transposed() { self.k } else { self.n };
        self
    }

    pub fn with_leading_dims(mut self, lda: usize, ldb: usize, ldc: usize) -> Self {
        self.lda = lda;
        self.ldb = ldb;
        self.ldc = ldc;
        self
    }

    pub fn with_types(mut self, a_type: DataType, b_type: DataType, c_type: DataType) -> Self {
        self.a_type = a_type;
        self.b_type = b_type;
        self.c_type = c_type;
        self
    }

    pub fn has_uniform_type(&self) -> bool {
        self.a_type == self.b_type && self.b_type == self.c_type
    }

    pub fn is_row_major(&self) -> bool {
        !self.trans_a.is_transposed() && !self.trans_b.is_transposed()
    }

    /// True when no operand carries row padding.
    pub fn is_packed(&self) -> bool {
        let lda = if self.trans_a.is_transposed() { self.m } else { self.k };
        let ldb = if self.trans_b.is_transposed() { self.k } else { self.n };
        self.lda == lda && self.ldb == ldb && self.ldc == self.n
    }

    pub fn is_empty(&self) -> bool {
        self.m == 0 || self.n == 0 || self.k == 0 || self.batch == 0
    }

    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64 * self.batch as f64
    }

    /// Bytes held by A, B and C across the batch, or `None` if the total
    /// does not fit in `usize`.
    pub fn data_footprint_bytes(&self) -> Option<usize> {
        let operand = |rows: usize, cols: usize, ty: DataType| {
            rows.checked_mul(cols)?.checked_mul(ty.element_size_bytes())
        };
        let a = operand(self.m, self.k, self.a_type)?;
        let b = operand(self.k, self.n, self.b_type)?;
        let c = operand(self.m, self.n, self.c_type)?;
        a.checked_add(b)?.checked_add(c)?.checked_mul(self.batch)
    }
}

/// The device a problem will run on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub arch: String,
    pub name: String,
    pub compute_units: usize,
}

impl DeviceInfo {
    pub fn new(arch: impl Into<String>, compute_units: usize) -> Self {
        let arch = arch.into();
        Self {
            name: arch.clone(),
            arch,
            compute_units,
        }
    }

    /// Describes the machine this process runs on.
    pub fn host() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            arch: std::env::consts::ARCH.to_string(),
            name: format!("{} host ({} threads)", std::env::consts::ARCH, compute_units),
            compute_units,
        }
    }
}

/// Deterministic cache key for a problem on a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProblemFingerprint(String);

impl ProblemFingerprint {
    /// Every field that can change which configuration is fastest goes into the key.
    pub fn derive(problem: &MatmulProblem, device: &DeviceInfo) -> Self {
        Self(format!(
            "v{}-{}x{}x{}-b{}-{}{}{}-{}{}-lda{}-ldb{}-ldc{}-{}",
            KERNEL_ABI_VERSION,
            problem.m,
            problem.n,
            problem.k,
            problem.batch,
            problem.a_type.tag(),
            problem.b_type.tag(),
            problem.c_type.tag(),
            problem.trans_a.tag(),
            problem.trans_b.tag(),
            problem.lda,
            problem.ldb,
            problem.ldc,
            device.arch,
        ))
    }

    /// Wraps a key read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProblemFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
