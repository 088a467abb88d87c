//! The injected capture agent.
//!
//! Built as `recc_agent.dll` and loaded into the target by the
//! controller's remote-call stubs. Three C-ABI entry points drive it:
//! `recc_log` installs the log sink, `recc_capture` (re)initializes the
//! hook and output, `recc_release` tears everything down. A process
//! detach releases implicitly, so headers get patched even on an abrupt
//! unload.
//!
//! Every export returns a 32-bit status: 0 on success, an OS code where
//! one exists, or one of the sentinel codes in [`error::codes`].

pub mod capture;
mod error;
pub mod sink;
#[cfg(windows)]
mod state;

pub use error::{codes, AgentError, AgentResult};

#[cfg(windows)]
mod exports {
    use std::ffi::{c_char, c_void, CStr};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::SystemServices::DLL_PROCESS_DETACH;

    use recc_common::from_wide_ptr;

    use crate::error::{codes, AgentResult};
    use crate::state;

    /// Runs an entry-point body behind the ABI boundary: panics must not
    /// unwind into the foreign caller and map to the sentinel code.
    fn ffi_guard(body: impl FnOnce() -> AgentResult<()>) -> i32 {
        match catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => 0,
            Ok(Err(err)) => err.code(),
            Err(_) => codes::UNHANDLED_FAULT,
        }
    }

    unsafe fn tag_from_ptr(ptr: *const c_char) -> String {
        if ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }

    /// Opens (or reopens) the agent's log on the given path.
    ///
    /// ABI: `path` is a NUL-terminated wide string; returns 0 on success.
    #[no_mangle]
    pub unsafe extern "system" fn recc_log(path: *const u16) -> i32 {
        let path = from_wide_ptr(path);
        ffi_guard(|| state::lock().open_log(&path))
    }

    /// Initializes or reinitializes capture.
    ///
    /// ABI: `out` is a NUL-terminated wide path, `api` and `format` are
    /// NUL-terminated byte tags; returns 0 on success, an OS-style code
    /// otherwise.
    #[no_mangle]
    pub unsafe extern "system" fn recc_capture(
        out: *const u16,
        api: *const c_char,
        format: *const c_char,
    ) -> i32 {
        let out = from_wide_ptr(out);
        let api = tag_from_ptr(api);
        let format = tag_from_ptr(format);
        ffi_guard(|| {
            let mut agent = state::lock();
            agent.initialize(&out, &api, &format).inspect_err(|err| {
                agent.log_error(err);
            })
        })
    }

    /// Releases capture and closes the log.
    #[no_mangle]
    pub unsafe extern "system" fn recc_release() -> i32 {
        ffi_guard(|| {
            state::lock().release();
            Ok(())
        })
    }

    /// Releases capture on process detach; an abrupt unload behaves like
    /// an explicit `recc_release`.
    #[no_mangle]
    pub unsafe extern "system" fn DllMain(
        _module: HMODULE,
        reason: u32,
        _reserved: *mut c_void,
    ) -> bool {
        if reason == DLL_PROCESS_DETACH {
            recc_release();
        }
        true
    }
}

#[cfg(windows)]
pub use exports::{recc_capture, recc_log, recc_release};
