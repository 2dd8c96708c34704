//! Intermediate Representation (IR)
//!
//! A flat, block-structured form of the typed tree. Nested functions and
//! lambdas are gone (converted to classes), every operand is atomic, and
//! control flow is explicit labels and jumps.
//!
//! ## Pipeline
//!
//! ```text
//! typed tree → lower_program → verify_labels → optimize_program → emission
//! ```

pub mod lower;
pub mod names;
pub mod optimize;
pub mod types;
pub mod verify;

pub use lower::{closure_name, lower_program};
pub use names::NameGen;
pub use optimize::optimize_program;
pub use types::*;
pub use verify::verify_labels;
