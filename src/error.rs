//! Error types
//!
//! Every error in this crate is fatal. Compile errors signal an upstream
//! invariant violation (the typed tree or registry disagrees with itself);
//! heap errors signal resource exhaustion or a bad reference handed in by
//! emitted code. Neither is retried.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::{Location, Type};

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    // Lowering (E100-E199)
    E100, // Internal lowering invariant
    E101, // Unknown class
    E102, // Unknown field
    E103, // Object type expected

    // IR shape (E200-E299)
    E200, // Dangling label
    E201, // Duplicate label

    // Optimization (E300-E399)
    E300, // Unfoldable expression

    // Heap (H001-H099)
    H001, // Reference numbers exhausted
    H002, // Out of memory
    H003, // Invalid reference
    H004, // Field out of bounds
    H005, // Invalid layout
    H006, // Scope underflow
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::E100 => "E100",
            ErrorCode::E101 => "E101",
            ErrorCode::E102 => "E102",
            ErrorCode::E103 => "E103",
            ErrorCode::E200 => "E200",
            ErrorCode::E201 => "E201",
            ErrorCode::E300 => "E300",
            ErrorCode::H001 => "H001",
            ErrorCode::H002 => "H002",
            ErrorCode::H003 => "H003",
            ErrorCode::H004 => "H004",
            ErrorCode::H005 => "H005",
            ErrorCode::H006 => "H006",
        }
    }

    /// Get a brief description of the error category
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::E100 | ErrorCode::E101 | ErrorCode::E102 | ErrorCode::E103 => {
                "lowering error"
            }
            ErrorCode::E200 | ErrorCode::E201 => "ir error",
            ErrorCode::E300 => "optimization error",
            ErrorCode::H001
            | ErrorCode::H002
            | ErrorCode::H003
            | ErrorCode::H004
            | ErrorCode::H005
            | ErrorCode::H006 => "heap error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Internal compiler errors raised by lowering and optimization
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("internal compiler error: {message}")]
    Internal { message: String },

    #[error("unknown class `{name}`")]
    UnknownClass { name: String },

    #[error("class `{class}` has no field `{field}`")]
    UnknownField { class: String, field: String },

    #[error("expected an object in {context}, found `{found}` at {loc}")]
    NotAnObject {
        context: &'static str,
        found: Type,
        loc: Location,
    },

    #[error("jump to undefined label `{label}` in {scope}")]
    DanglingLabel { label: String, scope: String },

    #[error("label `{label}` defined more than once in {scope}")]
    DuplicateLabel { label: String, scope: String },

    #[error("cannot fold `{left} {op} {right}`")]
    Unfoldable {
        op: String,
        left: String,
        right: String,
    },
}

impl CompileError {
    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            CompileError::Internal { .. } => ErrorCode::E100,
            CompileError::UnknownClass { .. } => ErrorCode::E101,
            CompileError::UnknownField { .. } => ErrorCode::E102,
            CompileError::NotAnObject { .. } => ErrorCode::E103,
            CompileError::DanglingLabel { .. } => ErrorCode::E200,
            CompileError::DuplicateLabel { .. } => ErrorCode::E201,
            CompileError::Unfoldable { .. } => ErrorCode::E300,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            CompileError::NotAnObject { loc, .. } => Some(*loc),
            _ => None,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::new(self.code(), self.to_string());
        match self.location() {
            Some(loc) => diag.with_location(loc),
            None => diag,
        }
    }
}

/// Failures of the runtime heap manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeapError {
    #[error("maximum references allocated ({max})")]
    ReferencesExhausted { max: u32 },

    #[error("out of memory: {requested} words requested, {available} available after compaction")]
    OutOfMemory { requested: usize, available: usize },

    #[error("invalid reference: {0}")]
    InvalidReference(u32),

    #[error("field {offset} out of bounds for reference {reference} with {fields} fields")]
    FieldOutOfBounds {
        reference: u32,
        offset: usize,
        fields: usize,
    },

    #[error("reference bitmap {bitmap:#b} marks fields beyond the {fields} allocated")]
    InvalidLayout { bitmap: u32, fields: usize },

    #[error("scope stack underflow: the base scope cannot be popped")]
    ScopeUnderflow,
}

impl HeapError {
    pub fn code(&self) -> ErrorCode {
        match self {
            HeapError::ReferencesExhausted { .. } => ErrorCode::H001,
            HeapError::OutOfMemory { .. } => ErrorCode::H002,
            HeapError::InvalidReference(_) => ErrorCode::H003,
            HeapError::FieldOutOfBounds { .. } => ErrorCode::H004,
            HeapError::InvalidLayout { .. } => ErrorCode::H005,
            HeapError::ScopeUnderflow => ErrorCode::H006,
        }
    }

    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic::new(self.code(), self.to_string())
    }
}

/// Serializable error report handed to front ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, loc: Location) -> Self {
        self.location = Some(loc);
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]", self.code)?;
        if let Some(loc) = &self.location {
            write!(f, " at {}", loc)?;
        }
        write!(f, ": {}", self.message)
    }
}
