//! Error types for the agent.

use std::io;

use thiserror::Error;

/// Status codes the entry points return for non-OS failures.
pub mod codes {
    /// The format tag named no known sink.
    pub const UNKNOWN_FORMAT: i32 = 0xFFF1;
    /// The API tag named no known capture device.
    pub const UNKNOWN_API: i32 = 0xFFF2;
    /// A fault that carries no OS code (including panics at the ABI edge).
    pub const UNHANDLED_FAULT: i32 = 0xFFF3;
}

/// Errors raised inside the agent's entry points and hook.
///
/// Message texts double as log lines, so they keep full sentences; the
/// controller tails them over the log pipe.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A Win32 or COM call inside the target failed.
    #[error("{message}")]
    Hook { message: &'static str, code: i32 },

    /// The log or output stream could not be opened.
    #[error("Output file could not be opened.")]
    OpenOutput(#[source] io::Error),

    /// Unrecognized format tag.
    #[error("Unknown output format {0:?}.")]
    UnknownFormat(String),

    /// Unrecognized API tag.
    #[error("Unknown API {0:?}.")]
    UnknownApi(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

impl AgentError {
    /// The 32-bit status an entry point reports for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Hook { code, .. } => *code,
            Self::OpenOutput(err) => err.raw_os_error().unwrap_or(codes::UNHANDLED_FAULT),
            Self::UnknownFormat(_) => codes::UNKNOWN_FORMAT,
            Self::UnknownApi(_) => codes::UNKNOWN_API,
        }
    }

    /// A hook failure carrying `GetLastError`.
    #[cfg(windows)]
    pub(crate) fn win32(message: &'static str) -> Self {
        let code = unsafe { windows::Win32::Foundation::GetLastError() }.0 as i32;
        Self::Hook { message, code }
    }

    /// A hook failure carrying an `HRESULT`.
    #[cfg(windows)]
    pub(crate) fn com(message: &'static str, hr: windows::core::HRESULT) -> Self {
        Self::Hook {
            message,
            code: hr.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_errors_have_distinct_codes() {
        let format = AgentError::UnknownFormat("ogg".into());
        let api = AgentError::UnknownApi("wasapi".into());
        assert_eq!(format.code(), codes::UNKNOWN_FORMAT);
        assert_eq!(api.code(), codes::UNKNOWN_API);
        assert_ne!(format.code(), api.code());
    }

    #[test]
    fn unknown_format_message_names_the_tag() {
        let err = AgentError::UnknownFormat("ogg".into());
        assert_eq!(err.to_string(), "Unknown output format \"ogg\".");
    }

    #[test]
    fn open_failure_prefers_the_os_code() {
        let err = AgentError::OpenOutput(io::Error::from_raw_os_error(5));
        assert_eq!(err.code(), 5);
        let err = AgentError::OpenOutput(io::Error::new(io::ErrorKind::Other, "synthetic"));
        assert_eq!(err.code(), codes::UNHANDLED_FAULT);
    }
}
