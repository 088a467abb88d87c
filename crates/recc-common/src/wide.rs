//! UTF-16 helpers for crossing the wide-string ABI.

/// Encodes `s` as UTF-16, no terminator.
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Encodes `s` as UTF-16 with a trailing NUL, ready for `PCWSTR` use.
pub fn to_wide_nul(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Reads a NUL-terminated UTF-16 string from a raw pointer.
///
/// # Safety
///
/// `ptr` must be null or point at a readable NUL-terminated UTF-16
/// sequence.
pub unsafe fn from_wide_ptr(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0usize;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let wide = to_wide_nul("C:\\temp\\rec.wav");
        assert_eq!(*wide.last().unwrap(), 0);
        let back = unsafe { from_wide_ptr(wide.as_ptr()) };
        assert_eq!(back, "C:\\temp\\rec.wav");
    }

    #[test]
    fn no_terminator_without_nul() {
        assert_eq!(to_wide("ab"), vec![b'a' as u16, b'b' as u16]);
    }

    #[test]
    fn null_pointer_reads_empty() {
        assert_eq!(unsafe { from_wide_ptr(std::ptr::null()) }, "");
    }
}
