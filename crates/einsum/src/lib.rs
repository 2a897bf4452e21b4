//! Einsum problem instances for the einforge autotuner.
//!
//! Parsing and canonicalizing subscript strings happens upstream; this crate
//! only holds an already-canonical problem and knows how to fingerprint it
//! for the result cache.

pub mod canonical;
pub mod problem;

pub use canonical::to_canonical_string;
pub use problem::{DataType, EinsumProblem, Fingerprint, ShapeComponent};
