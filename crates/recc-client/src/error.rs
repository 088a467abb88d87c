//! Error types for the controller.

use thiserror::Error;

use recc_common::Win32Error;
use recc_inject::InjectError;

/// Terminal failures of the controller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An OS primitive failed.
    #[error(transparent)]
    Os(#[from] Win32Error),

    /// Building or dispatching a remote call failed.
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// A remote entry-point thread exited non-zero. The stub routes the
    /// OS-meaningful code out through the exit code.
    #[error("Thread for {entry} reported failure")]
    RemoteThread { entry: &'static str, code: u32 },

    /// A local path could not be resolved.
    #[error("could not resolve path {path:?}")]
    Path {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for controller operations.
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// The numeric code printed next to the terminal error message.
    pub fn code(&self) -> u32 {
        match self {
            Self::Os(err) => err.code,
            Self::Inject(InjectError::Os(err)) => err.code,
            Self::Inject(_) => 0,
            Self::RemoteThread { code, .. } => *code,
            Self::Path { source, .. } => source.raw_os_error().unwrap_or(0) as u32,
        }
    }
}
