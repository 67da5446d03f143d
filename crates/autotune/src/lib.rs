//! Solver contract, configuration search and the default CPU matmul solvers.

pub mod catalog;
pub mod executor;
pub mod search;
pub mod solver;
pub mod solvers;

pub use catalog::*;
pub use executor::*;
pub use search::*;
pub use solver::*;
