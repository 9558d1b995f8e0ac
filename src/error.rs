//! The crate's single error type, covering every fallible operation in the
//! virtual machine. Propagation is all-or-nothing: once raised, an error
//! aborts the current `run()` call rather than being recovered mid-instruction,
//! since VM state after a failed opcode is not well-defined.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZError {
    #[error("corrupted story file: {0}")]
    CorruptedStoryFile(String),

    #[error("memory protection violation: write to read-only address {addr:#06x}")]
    MemoryProtection { addr: u32 },

    #[error("out of bounds access at address {addr:#06x}")]
    OutOfBounds { addr: u32 },

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid object number: {0}")]
    InvalidObject(u16),

    #[error("invalid property {prop} on object {obj}")]
    InvalidProperty { obj: u16, prop: u8 },

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("save incompatible with running story: {0}")]
    SaveIncompatible(String),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("stack overflow")]
    StackOverflow,

    #[error("no active call frame")]
    NoActiveFrame,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type ZResult<T> = Result<T, ZError>;
