//! Performance-record cache for SolverForge.
//!
//! Tuned solver configurations are kept in memory keyed by problem
//! fingerprint and solver id, loaded eagerly from a backing table on disk.
//! [`ReadonlyStore`] serves immutable system tables; [`MutableStore`] also
//! accepts new records and appends them to its table. [`PreloadState`] moves
//! the eager load onto background threads at startup.

pub mod error;
pub mod preload;
pub mod record;
pub mod store;
pub mod table;

pub use error::*;
pub use preload::*;
pub use record::*;
pub use store::*;
pub use table::*;
