//! Adapters from handle signals to task continuations.
//!
//! The controller's tasks are continuation-passing state machines: each
//! awaiter owns (or borrows through its captures) the handle it waits on
//! and a `FnOnce` to resume into, which may install further awaiters.

use windows::Win32::Foundation::HANDLE;
use windows::Win32::System::Console::{
    GetNumberOfConsoleInputEvents, GetStdHandle, ReadConsoleInputW, INPUT_RECORD, KEY_EVENT,
    STD_INPUT_HANDLE,
};
use windows::Win32::System::Threading::GetExitCodeThread;

use recc_common::{OwnedHandle, Win32Error};

use crate::error::ClientResult;
use crate::sched::{SignalContext, SignalObserver};

/// Resumes when a handle signals; yields nothing.
pub struct HandleAwaiter<F> {
    resume: F,
}

impl<F> HandleAwaiter<F>
where
    F: FnOnce(&mut SignalContext) -> ClientResult<()> + 'static,
{
    /// The handle's owner must keep it alive until the resumption runs;
    /// typically the continuation's captures own it.
    pub fn install(ctx: &mut SignalContext, handle: HANDLE, resume: F) {
        ctx.install(handle, Box::new(Self { resume }));
    }
}

impl<F> SignalObserver for HandleAwaiter<F>
where
    F: FnOnce(&mut SignalContext) -> ClientResult<()> + 'static,
{
    fn on_signaled(self: Box<Self>, ctx: &mut SignalContext) -> ClientResult<()> {
        (self.resume)(ctx)
    }
}

/// Owns a thread handle, resumes with the thread's exit code.
pub struct ThreadAwaiter<F> {
    thread: OwnedHandle,
    resume: F,
}

impl<F> ThreadAwaiter<F>
where
    F: FnOnce(&mut SignalContext, u32) -> ClientResult<()> + 'static,
{
    pub fn install(ctx: &mut SignalContext, thread: OwnedHandle, resume: F) {
        let raw = thread.as_raw();
        ctx.install(raw, Box::new(Self { thread, resume }));
    }
}

impl<F> SignalObserver for ThreadAwaiter<F>
where
    F: FnOnce(&mut SignalContext, u32) -> ClientResult<()> + 'static,
{
    fn on_signaled(self: Box<Self>, ctx: &mut SignalContext) -> ClientResult<()> {
        let mut code = 0u32;
        unsafe { GetExitCodeThread(self.thread.as_raw(), &mut code) }
            .map_err(|e| Win32Error::api("GetExitCodeThread", e))?;
        (self.resume)(ctx, code)
    }
}

/// Resumes on the first console wake that carries a key event.
pub struct ConsoleAwaiter<F> {
    input: HANDLE,
    resume: F,
}

impl<F> ConsoleAwaiter<F>
where
    F: FnOnce(&mut SignalContext) -> ClientResult<()> + 'static,
{
    pub fn install(ctx: &mut SignalContext, resume: F) -> ClientResult<()> {
        let input = unsafe { GetStdHandle(STD_INPUT_HANDLE) }
            .map_err(|e| Win32Error::api("GetStdHandle", e))?;
        ctx.install(input, Box::new(Self { input, resume }));
        Ok(())
    }
}

impl<F> SignalObserver for ConsoleAwaiter<F>
where
    F: FnOnce(&mut SignalContext) -> ClientResult<()> + 'static,
{
    /// Drains whatever is pending; mouse, focus and resize records alone
    /// make the wake spurious.
    fn is_spurious(&mut self) -> bool {
        let mut pending = 0u32;
        if unsafe { GetNumberOfConsoleInputEvents(self.input, &mut pending) }.is_err()
            || pending == 0
        {
            return true;
        }
        let mut records = vec![INPUT_RECORD::default(); pending as usize];
        let mut read = 0u32;
        if unsafe { ReadConsoleInputW(self.input, &mut records, &mut read) }.is_err() {
            return true;
        }
        !contains_key_event(&records[..read as usize])
    }

    fn on_signaled(self: Box<Self>, ctx: &mut SignalContext) -> ClientResult<()> {
        (self.resume)(ctx)
    }
}

/// Whether at least one drained record is a key event.
pub fn contains_key_event(records: &[INPUT_RECORD]) -> bool {
    records
        .iter()
        .any(|record| u32::from(record.EventType) == u32::from(KEY_EVENT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::System::Console::MOUSE_EVENT;

    fn record(event_type: u16) -> INPUT_RECORD {
        let mut record = INPUT_RECORD::default();
        record.EventType = event_type;
        record
    }

    #[test]
    fn key_events_are_not_spurious() {
        let records = [record(MOUSE_EVENT as u16), record(KEY_EVENT as u16)];
        assert!(contains_key_event(&records));
    }

    #[test]
    fn mouse_and_focus_wakes_are_spurious() {
        assert!(!contains_key_event(&[]));
        assert!(!contains_key_event(&[record(MOUSE_EVENT as u16)]));
    }
}
