//! Target process lookup.
//!
//! Both lookups yield the empty handle for "no usable target": a pid that
//! names no live process, no window containing the fragment, or a 32-bit
//! process (whose address space the x64 stubs cannot run in).

use windows::Win32::Foundation::{BOOL, ERROR_INVALID_PARAMETER, HWND, LPARAM};
use windows::Win32::System::Threading::{IsWow64Process, OpenProcess, PROCESS_ALL_ACCESS};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowTextLengthW, GetWindowTextW, GetWindowThreadProcessId,
};

use recc_common::{OwnedHandle, Win32Error};

use crate::error::ClientResult;

/// Opens a 64-bit process by id with rights for injection.
pub fn process_from_id(pid: u32) -> ClientResult<OwnedHandle> {
    let handle = match unsafe { OpenProcess(PROCESS_ALL_ACCESS, false, pid) } {
        Ok(handle) => handle,
        // A dead or never-alive pid surfaces as an invalid parameter;
        // that is "not found", not a hard failure.
        Err(e) if e.code() == ERROR_INVALID_PARAMETER.to_hresult() => {
            return Ok(OwnedHandle::empty())
        }
        Err(e) => return Err(Win32Error::api("OpenProcess", e).into()),
    };
    let process = OwnedHandle::from_raw(handle);

    let mut wow64 = BOOL::default();
    unsafe { IsWow64Process(process.as_raw(), &mut wow64) }
        .map_err(|e| Win32Error::api("IsWow64Process", e))?;
    if wow64.as_bool() {
        return Ok(OwnedHandle::empty());
    }
    Ok(process)
}

/// Finds the first window whose title contains `fragment` and opens its
/// owning process.
pub fn process_from_window(fragment: &str) -> ClientResult<OwnedHandle> {
    struct Search {
        fragment: String,
        found: Option<HWND>,
    }

    unsafe extern "system" fn visit(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = &mut *(lparam.0 as *mut Search);
        let len = GetWindowTextLengthW(hwnd);
        if len > 0 {
            let mut title = vec![0u16; len as usize + 1];
            let read = GetWindowTextW(hwnd, &mut title);
            let title = String::from_utf16_lossy(&title[..read.max(0) as usize]);
            if title.contains(&search.fragment) {
                search.found = Some(hwnd);
                return BOOL(0); // stop the walk
            }
        }
        BOOL(1)
    }

    let mut search = Search {
        fragment: fragment.to_owned(),
        found: None,
    };
    // A match stops the enumeration, which EnumWindows reports as failure;
    // `found` is the real verdict.
    let _ = unsafe {
        EnumWindows(
            Some(visit),
            LPARAM(&mut search as *mut Search as isize),
        )
    };

    let Some(hwnd) = search.found else {
        return Ok(OwnedHandle::empty());
    };
    let mut pid = 0u32;
    if unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) } == 0 {
        return Err(Win32Error::last("GetWindowThreadProcessId").into());
    }
    process_from_id(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_is_a_valid_64_bit_target() {
        let process = process_from_id(std::process::id()).expect("lookup");
        assert!(process.is_valid());
    }

    #[test]
    fn nonexistent_pid_yields_the_empty_handle() {
        // Pid 0 is the idle process and never openable as a target.
        let process = process_from_id(0).expect("lookup");
        assert!(!process.is_valid());
    }

    #[test]
    fn unmatched_window_fragment_yields_the_empty_handle() {
        let process =
            process_from_window("recc-test-title-that-no-window-carries").expect("lookup");
        assert!(!process.is_valid());
    }
}
