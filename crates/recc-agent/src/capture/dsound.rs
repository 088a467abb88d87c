//! DirectSound capture via a method-table patch.
//!
//! All live `IDirectSoundBuffer` instances of a process share one class
//! dispatch table inside dsound.dll. Overwriting its `Unlock` slot
//! observes every region a writer commits to any buffer; the otherwise
//! idle `QueryInterface` slot stores the back-pointer to the installed
//! device so the hook can recover its state without thread-local storage.

use std::ffi::c_void;

use windows::core::{s, Interface, GUID, HRESULT};
use windows::Win32::Foundation::{E_FAIL, S_OK};
use windows::Win32::Media::Audio::DirectSound::{
    IDirectSound, IDirectSoundBuffer, DSBUFFERDESC, DSBSIZE_MIN,
};
use windows::Win32::Media::Audio::WAVEFORMATEX;
use windows::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};
use windows::Win32::System::Memory::{VirtualProtect, PAGE_PROTECTION_FLAGS, PAGE_READWRITE};

use crate::capture::CaptureDevice;
use crate::error::{AgentError, AgentResult};
use crate::state;

/// `QueryInterface`'s slot; unused on the buffer hot path, so it carries
/// the device back-pointer while the hook is installed.
const QUERY_SLOT: usize = 0;
/// `IDirectSoundBuffer::Unlock`'s slot in the dispatch table.
const UNLOCK_SLOT: usize = 19;

type UnlockFn =
    unsafe extern "system" fn(*mut c_void, *mut c_void, u32, *mut c_void, u32) -> HRESULT;
type DirectSoundCreateFn =
    unsafe extern "system" fn(*const GUID, *mut *mut c_void, *mut c_void) -> HRESULT;

/// The installed DirectSound hook.
///
/// The three fields describing the patch stay constant for the device's
/// lifetime; drop restores both slots and the page protection recorded at
/// patch time.
pub struct DsoundCapture {
    vtable: *mut usize,
    old_query: usize,
    old_unlock: UnlockFn,
    old_protection: PAGE_PROTECTION_FLAGS,
}

// SAFETY: the table pointer targets dsound.dll's immortal class vtable and
// is only written under the agent's global mutex.
unsafe impl Send for DsoundCapture {}

impl CaptureDevice for DsoundCapture {}

impl DsoundCapture {
    /// Creates a throwaway buffer to reach the class vtable, then patches
    /// its query and unlock slots.
    ///
    /// The returned box never moves again: slot 0 holds its address until
    /// drop.
    pub fn install() -> AgentResult<Box<Self>> {
        let buffer = dummy_buffer()?;
        let raw = buffer.as_raw();
        // The pointed-at table is shared by every instance of the class.
        let vtable = unsafe { *(raw as *const *mut usize) };
        let old_query = unsafe { *vtable.add(QUERY_SLOT) };
        let old_unlock: UnlockFn = unsafe { std::mem::transmute(*vtable.add(UNLOCK_SLOT)) };

        let mut old_protection = PAGE_PROTECTION_FLAGS::default();
        unsafe {
            VirtualProtect(
                vtable as *const c_void,
                0x1000,
                PAGE_READWRITE,
                &mut old_protection,
            )
        }
        .map_err(|e| AgentError::com("VirtualProtect on the dispatch table failed.", e.code()))?;

        let device = Box::new(Self {
            vtable,
            old_query,
            old_unlock,
            old_protection,
        });
        // Aligned pointer-size stores are atomic on x86-64, so threads
        // already inside dsound see either slot value, never a mix.
        unsafe {
            *vtable.add(QUERY_SLOT) = &*device as *const Self as usize;
            *vtable.add(UNLOCK_SLOT) = hook_unlock as usize;
        }
        Ok(device)
    }
}

impl Drop for DsoundCapture {
    fn drop(&mut self) {
        unsafe {
            *self.vtable.add(UNLOCK_SLOT) = self.old_unlock as usize;
            *self.vtable.add(QUERY_SLOT) = self.old_query;
            let mut scratch = PAGE_PROTECTION_FLAGS::default();
            let _ = VirtualProtect(
                self.vtable as *const c_void,
                0x1000,
                self.old_protection,
                &mut scratch,
            );
        }
    }
}

/// Builds a dummy secondary buffer with a known PCM format.
///
/// dsound.dll must already inhabit the target; loading it ourselves would
/// hook a library the target never uses.
fn dummy_buffer() -> AgentResult<IDirectSoundBuffer> {
    let module = unsafe { GetModuleHandleA(s!("dsound.dll")) }
        .map_err(|e| AgentError::com("dsound.dll not loaded.", e.code()))?;
    let create = unsafe { GetProcAddress(module, s!("DirectSoundCreate")) }
        .ok_or_else(|| AgentError::win32("DirectSoundCreate not in dsound.dll."))?;
    let create: DirectSoundCreateFn = unsafe { std::mem::transmute(create) };

    let mut device_raw: *mut c_void = std::ptr::null_mut();
    let hr = unsafe { create(std::ptr::null(), &mut device_raw, std::ptr::null_mut()) };
    if hr != S_OK || device_raw.is_null() {
        return Err(AgentError::com("DirectSoundCreate failed.", hr));
    }
    let device = unsafe { IDirectSound::from_raw(device_raw) };

    let mut format = WAVEFORMATEX {
        wFormatTag: 1, // integer PCM
        nChannels: 2,
        nSamplesPerSec: 44100,
        nAvgBytesPerSec: 176_400,
        nBlockAlign: 4,
        wBitsPerSample: 16,
        cbSize: 0,
    };
    let desc = DSBUFFERDESC {
        dwSize: std::mem::size_of::<DSBUFFERDESC>() as u32,
        dwFlags: 0,
        dwBufferBytes: DSBSIZE_MIN as u32,
        dwReserved: 0,
        lpwfxFormat: &mut format,
        guid3DAlgorithm: GUID::zeroed(),
    };
    let mut buffer: Option<IDirectSoundBuffer> = None;
    unsafe { device.CreateSoundBuffer(&desc, &mut buffer, None) }
        .map_err(|e| AgentError::com("CreateSoundBuffer failed.", e.code()))?;
    buffer.ok_or_else(|| AgentError::com("CreateSoundBuffer failed.", E_FAIL))
}

/// The replacement for slot 19, running on whichever thread the target
/// unlocks from.
///
/// The original unlock always runs; only a successful unlock forwards its
/// regions, and only while a session is live.
unsafe extern "system" fn hook_unlock(
    buffer: *mut c_void,
    ptr1: *mut c_void,
    len1: u32,
    ptr2: *mut c_void,
    len2: u32,
) -> HRESULT {
    let vtable = *(buffer as *const *const usize);
    let device = *vtable.add(QUERY_SLOT) as *const DsoundCapture;
    let original = (*device).old_unlock;

    let mut agent = state::lock();
    let result = original(buffer, ptr1, len1, ptr2, len2);
    if result == S_OK {
        agent.deliver(|| probe_format(buffer), region(ptr1, len1), region(ptr2, len2));
    }
    result
}

unsafe fn region<'a>(ptr: *mut c_void, len: u32) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr as *const u8, len as usize)
    }
}

/// Reads the buffer's current format through `GetFormat` (slot 5, which
/// the patch leaves alone).
unsafe fn probe_format(buffer: *mut c_void) -> Option<(u32, u16, u16)> {
    let buffer = IDirectSoundBuffer::from_raw_borrowed(&buffer)?;
    let mut format = WAVEFORMATEX::default();
    buffer
        .GetFormat(
            Some(&mut format as *mut WAVEFORMATEX),
            std::mem::size_of::<WAVEFORMATEX>() as u32,
            None,
        )
        .ok()?;
    Some((
        format.nSamplesPerSec,
        format.wBitsPerSample,
        format.nChannels,
    ))
}
