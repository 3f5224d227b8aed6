//! The closed error taxonomy (spec §4.5), used uniformly by the loader and
//! the execution engine.

use thiserror::Error;

/// Every fallible operation in this crate returns one of these kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("file not found")]
    FileNotFound,

    #[error("file exceeds the maximum accepted size (10 MiB)")]
    FileTooLarge,

    #[error("failed to read file: {0}")]
    FileRead(String),

    #[error("invalid image format")]
    InvalidFormat,

    #[error("null or missing pointer")]
    NullPointer,

    #[error("invalid operand")]
    InvalidOperand,

    #[error("out of memory")]
    OutOfMemory,

    #[error("evaluation stack overflow")]
    StackOverflow,

    #[error("evaluation stack underflow")]
    StackUnderflow,

    #[error("division by zero")]
    DivideByZero,

    #[error("illegal instruction")]
    IllegalInstruction,

    #[error("unknown error")]
    Unknown,
}

impl VmError {
    /// The numeric code used as the process exit status (spec §6, §7):
    /// "exit code equals the numeric error-kind code (0 for Success)".
    pub fn exit_code(&self) -> i32 {
        match self {
            VmError::FileNotFound => 1,
            VmError::FileTooLarge => 2,
            VmError::FileRead(_) => 3,
            VmError::InvalidFormat => 4,
            VmError::NullPointer => 5,
            VmError::InvalidOperand => 6,
            VmError::OutOfMemory => 7,
            VmError::StackOverflow => 8,
            VmError::StackUnderflow => 9,
            VmError::DivideByZero => 10,
            VmError::IllegalInstruction => 11,
            VmError::Unknown => 12,
        }
    }
}

/// Result alias used throughout the loader and engine.
pub type VmResult<T> = Result<T, VmError>;
