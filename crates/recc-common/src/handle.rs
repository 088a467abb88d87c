//! Scoped ownership of a Win32 handle.

use windows::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};

/// Owns zero or one Win32 wait object and closes it exactly once.
///
/// Three states are distinguished: empty (null), invalid
/// (`INVALID_HANDLE_VALUE`) and owned. Only the owned state closes on
/// drop; APIs signal failure with either of the first two depending on
/// their vintage, and neither may be passed to `CloseHandle`.
#[derive(Debug)]
pub struct OwnedHandle(HANDLE);

impl OwnedHandle {
    /// A holder with nothing to close.
    pub const fn empty() -> Self {
        Self(HANDLE(std::ptr::null_mut()))
    }

    /// Assumes ownership of `handle`.
    pub fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    /// Whether an actual object is owned.
    pub fn is_valid(&self) -> bool {
        !self.0 .0.is_null() && self.0 != INVALID_HANDLE_VALUE
    }

    /// The raw handle value, ownership retained.
    pub fn as_raw(&self) -> HANDLE {
        self.0
    }

    /// Releases ownership to the caller.
    pub fn into_raw(mut self) -> HANDLE {
        std::mem::replace(&mut self.0, HANDLE(std::ptr::null_mut()))
    }

    /// Closes the owned object, if any, and resets to empty.
    pub fn close(&mut self) {
        if self.is_valid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
        self.0 = HANDLE(std::ptr::null_mut());
    }
}

impl Default for OwnedHandle {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_invalid_are_not_valid() {
        assert!(!OwnedHandle::empty().is_valid());
        assert!(!OwnedHandle::from_raw(INVALID_HANDLE_VALUE).is_valid());
    }

    #[test]
    fn into_raw_disarms_the_holder() {
        let mut holder = OwnedHandle::from_raw(INVALID_HANDLE_VALUE);
        holder.close();
        assert!(!holder.is_valid());

        let event = unsafe {
            windows::Win32::System::Threading::CreateEventW(
                None,
                true,
                false,
                windows::core::PCWSTR::null(),
            )
        }
        .expect("CreateEventW");
        let holder = OwnedHandle::from_raw(event);
        assert!(holder.is_valid());
        let raw = holder.into_raw();
        // Ownership left the holder; closing manually must succeed.
        unsafe { CloseHandle(raw) }.expect("CloseHandle");
    }
}
