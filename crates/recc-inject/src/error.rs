//! Error types for the injection module.

use thiserror::Error;

use recc_common::Win32Error;

use crate::asm::AsmError;
use crate::stub::MAX_ARGS;

/// Errors that can occur while building or dispatching a remote call.
#[derive(Debug, Error)]
pub enum InjectError {
    /// An OS primitive refused the cross-process operation.
    #[error(transparent)]
    Os(#[from] Win32Error),

    /// More arguments than the first-four-registers convention carries.
    #[error("remote call takes at most {MAX_ARGS} arguments, got {0}")]
    TooManyArgs(usize),

    /// A kernel32 export the stub needs could not be resolved.
    #[error("kernel32 export {0} not found")]
    MissingImport(&'static str),

    /// The generated stub does not fit the remote allocation.
    #[error("stub needs {0} bytes, more than the remote region holds")]
    StubTooLarge(usize),

    /// Internal code-generation failure.
    #[error("stub assembly failed: {0}")]
    Codegen(#[from] AsmError),
}

/// Result type for injection operations.
pub type InjectResult<T> = Result<T, InjectError>;
