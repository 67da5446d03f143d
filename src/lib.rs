//! SolverForge: solver selection, autotuning and performance-record caching
//! for matmul kernels.
//!
//! The workspace crates are re-exported here so applications can depend on a
//! single package.

pub use solverforge_autotune as autotune;
pub use solverforge_backend_cpu as backend_cpu;
pub use solverforge_kernels as kernels;
pub use solverforge_perfdb as perfdb;
