//! Structural checks on lowered IR

use std::collections::HashSet;

use super::types::{BasicBlock, Program};
use crate::error::CompileError;
use crate::Result;

/// Every jump target must name exactly one block of the same body
pub fn verify_labels(program: &Program) -> Result<()> {
    for (scope, body) in program.bodies() {
        verify_body(scope, body)?;
    }
    Ok(())
}

pub fn verify_body(scope: &str, body: &[BasicBlock]) -> Result<()> {
    let mut defined = HashSet::new();
    for block in body {
        if !defined.insert(block.label.as_str()) {
            return Err(CompileError::DuplicateLabel {
                label: block.label.to_string(),
                scope: scope.to_string(),
            });
        }
    }
    for block in body {
        for target in block.successors() {
            if !defined.contains(target.as_str()) {
                return Err(CompileError::DanglingLabel {
                    label: target.to_string(),
                    scope: scope.to_string(),
                });
            }
        }
    }
    Ok(())
}
