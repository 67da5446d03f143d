//! CPU dispatch for SolverForge: cache lookup, autotuning on a miss and
//! execution of the chosen plan.

pub mod dispatcher;
pub mod options;
pub mod runtime;

pub use dispatcher::*;
pub use options::*;
pub use runtime::*;
