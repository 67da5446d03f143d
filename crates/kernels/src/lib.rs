//! Problem descriptions and reference CPU kernels for SolverForge.

pub mod config;
pub mod library;
pub mod matmul;
pub mod problem;
pub mod utils;

pub use config::*;
pub use library::*;
pub use matmul::*;
pub use problem::*;
pub use utils::*;
