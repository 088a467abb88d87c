//! The structured Win32 error type.

use thiserror::Error;

/// A failed OS primitive, carrying the originating call name and the
/// 32-bit numeric code the OS reported.
///
/// The code is kept as `u32` rather than `i32` so `HRESULT`-shaped values
/// survive the round trip through thread exit codes unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{call} failed (code {code:#010X})")]
pub struct Win32Error {
    /// The OS primitive that failed.
    pub call: &'static str,
    /// The error code, `GetLastError` or `HRESULT` flavoured.
    pub code: u32,
}

/// Result type for raw Win32 operations.
pub type Win32Result<T> = Result<T, Win32Error>;

impl Win32Error {
    /// A failure with an explicit code.
    pub fn new(call: &'static str, code: u32) -> Self {
        Self { call, code }
    }

    /// Captures `GetLastError` for the given call site.
    #[cfg(windows)]
    pub fn last(call: &'static str) -> Self {
        let code = unsafe { windows::Win32::Foundation::GetLastError() }.0;
        Self { call, code }
    }

    /// Wraps an error returned by a `windows` crate binding.
    #[cfg(windows)]
    pub fn api(call: &'static str, err: windows::core::Error) -> Self {
        Self {
            call,
            code: err.code().0 as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_carries_hex_code() {
        let err = Win32Error::new("OpenProcess", 5);
        assert_eq!(err.to_string(), "OpenProcess failed (code 0x00000005)");
    }

    #[test]
    fn hresult_style_codes_print_unsigned() {
        let err = Win32Error::new("CreateSoundBuffer", 0x8878_000A);
        assert_eq!(
            err.to_string(),
            "CreateSoundBuffer failed (code 0x8878000A)"
        );
    }
}
