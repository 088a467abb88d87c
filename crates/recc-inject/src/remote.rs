//! Remote memory and thread dispatch.

use std::ffi::c_void;

use tracing::debug;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows::Win32::System::Memory::{
    VirtualAllocEx, VirtualFreeEx, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ,
};
use windows::Win32::System::Threading::CreateRemoteThread;

use recc_common::{OwnedHandle, Win32Error};

use crate::error::InjectResult;
use crate::stub::{emit_agent_call, RemoteArg, RemoteImports, STUB_REGION_SIZE};

/// A page-granular allocation inside the target's address space.
///
/// The region is freed on drop until `into_remote` transfers ownership to
/// the stub written into it; after that the controller never touches the
/// address again.
pub struct RemoteBuffer {
    process: HANDLE,
    base: *mut c_void,
}

impl RemoteBuffer {
    /// Reserves `size` bytes of execute-read memory in `process`.
    pub fn alloc(process: HANDLE, size: usize) -> InjectResult<Self> {
        let base = unsafe {
            VirtualAllocEx(process, None, size, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READ)
        };
        if base.is_null() {
            return Err(Win32Error::last("VirtualAllocEx").into());
        }
        Ok(Self { process, base })
    }

    /// The remote address of the region.
    pub fn addr(&self) -> u64 {
        self.base as u64
    }

    /// Copies `bytes` into the region.
    pub fn write(&self, bytes: &[u8]) -> InjectResult<()> {
        unsafe {
            WriteProcessMemory(
                self.process,
                self.base,
                bytes.as_ptr() as *const c_void,
                bytes.len(),
                None,
            )
        }
        .map_err(|e| Win32Error::api("WriteProcessMemory", e))?;
        Ok(())
    }

    /// Hands the region over to the stub, which frees it itself.
    pub fn into_remote(self) -> u64 {
        let addr = self.addr();
        std::mem::forget(self);
        addr
    }
}

impl Drop for RemoteBuffer {
    fn drop(&mut self) {
        unsafe {
            let _ = VirtualFreeEx(self.process, self.base, 0, MEM_RELEASE);
        }
    }
}

/// Loads the agent into `process` (unless already present) and calls
/// `entry_point` with `args` on a fresh remote thread.
///
/// Returns the thread handle; the thread's exit code is the entry point's
/// return value, or an OS error code if loading or resolution failed.
/// With `unload_after` the agent module is freed once the call returns.
pub fn call_agent(
    process: &OwnedHandle,
    unload_after: bool,
    agent_path: &[u16],
    entry_point: &str,
    args: &[RemoteArg],
) -> InjectResult<OwnedHandle> {
    let imports = RemoteImports::resolve()?;
    let buffer = RemoteBuffer::alloc(process.as_raw(), STUB_REGION_SIZE)?;
    let code = emit_agent_call(
        buffer.addr(),
        &imports,
        unload_after,
        agent_path,
        entry_point.as_bytes(),
        args,
    )?;
    buffer.write(&code)?;

    let thread = unsafe {
        CreateRemoteThread(
            process.as_raw(),
            None,
            0,
            Some(std::mem::transmute::<
                usize,
                unsafe extern "system" fn(*mut c_void) -> u32,
            >(buffer.addr() as usize)),
            None,
            0,
            None,
        )
    }
    .map_err(|e| Win32Error::api("CreateRemoteThread", e))?;

    debug!(
        entry = entry_point,
        stub_len = code.len(),
        "remote thread dispatched at {:#X}",
        buffer.addr()
    );

    // The stub frees its own region from now on.
    buffer.into_remote();
    Ok(OwnedHandle::from_raw(thread))
}
