//! # cpyc
//!
//! Middle and back end for a statically typed subset of Python.
//!
//! ## Pipeline
//!
//! | Stage    | Module          | Output                               |
//! |----------|-----------------|--------------------------------------|
//! | Lower    | `ir::lower`     | Block IR, closures as classes        |
//! | Verify   | `ir::verify`    | Every jump target resolved           |
//! | Optimize | `ir::optimize`  | Constants and copies propagated      |
//! | Run      | `heap`          | Refcounted objects for emitted code  |
//!
//! Parsing, type checking, and instruction emission happen elsewhere: this
//! crate takes a typed tree plus a [`registry::GlobalEnv`] and hands back an
//! [`ir::Program`].

pub mod ast;
pub mod config;
pub mod error;
pub mod heap;
pub mod ir;
pub mod registry;

pub use config::{CompileOptions, HeapConfig, OptLevel};
pub use error::{CompileError, Diagnostic, ErrorCode, HeapError};
pub use heap::Heap;
pub use registry::GlobalEnv;

/// Result type for compilation
pub type Result<T> = std::result::Result<T, CompileError>;

/// Compile a typed program to optimized IR
///
/// # Arguments
///
/// * `program` - The typed tree from the type checker
/// * `env` - Registry shared with earlier compilations; extended in place
/// * `options` - Optimization settings
pub fn compile(
    program: &ast::Program,
    env: &mut GlobalEnv,
    options: &CompileOptions,
) -> Result<ir::Program> {
    // Phase 1: Lower (verifies labels)
    let mut ir = ir::lower_program(program, env)?;

    // Phase 2: Optimize to fixpoint
    let rounds = ir::optimize_program(&mut ir, env, options)?;
    log::debug!(
        "compiled {} classes, {} top-level blocks ({} optimization rounds, {})",
        ir.classes.len(),
        ir.body.len(),
        rounds,
        options.opt_level
    );

    Ok(ir)
}
