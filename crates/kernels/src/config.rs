//! Kernel configuration structures.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    BF16,
}

impl DataType {
    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F16 | DataType::BF16 => 2,
        }
    }

    /// Short tag used inside fingerprints.
    pub fn tag(&self) -> &'static str {
        match self {
            DataType::F32 => "f",
            DataType::F16 => "h",
            DataType::BF16 => "b",
        }
    }
}

/// Storage order of a matmul operand relative to its logical shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Transpose {
    #[default]
    No,
    Yes,
}

impl Transpose {
    pub fn tag(&self) -> &'static str {
        match self {
            Transpose::No => "N",
            Transpose::Yes => "T",
        }
    }

    pub fn is_transposed(&self) -> bool {
        matches!(self, Transpose::Yes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatmulTilingConfig {
    pub tile_m: usize,
    pub tile_n: usize,
    pub tile_k: usize,
    pub unroll: usize,
}

impl MatmulTilingConfig {
    pub const fn new(tile_m: usize, tile_n: usize, tile_k: usize, unroll: usize) -> Self {
        Self {
            tile_m,
            tile_n,
            tile_k,
            unroll,
        }
    }

    /// Bytes touched by one A tile plus one B tile.
    pub fn working_set_bytes(&self, dtype: DataType) -> usize {
        (self.tile_m * self.tile_k + self.tile_k * self.tile_n) * dtype.element_size_bytes()
    }
}

impl Default for MatmulTilingConfig {
    fn default() -> Self {
        Self {
            tile_m: 64,
            tile_n: 64,
            tile_k: 32,
            unroll: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub enum ActivationKind {
    #[default]
    None,
    Relu,
    Gelu,
}
