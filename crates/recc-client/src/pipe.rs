//! Named-pipe sink tasks.
//!
//! When the user points the output or the log at `--`, the controller
//! creates a per-PID named pipe, the agent opens it like a file, and a
//! cooperative task forwards whatever arrives to the controller's own
//! standard stream.

/// Name of the data pipe for a controller instance.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn data_pipe_name(controller_pid: u32) -> String {
    format!(r"\\.\pipe\recc{controller_pid}")
}

/// Name of the log pipe for a controller instance.
#[cfg_attr(not(windows), allow(dead_code))]
pub fn log_pipe_name(controller_pid: u32) -> String {
    format!(r"\\.\pipe\recc_log{controller_pid}")
}

#[cfg(windows)]
pub use task::PipeSink;

#[cfg(windows)]
mod task {
    use tracing::debug;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_PIPE_CONNECTED, HANDLE};
    use windows::Win32::Storage::FileSystem::{
        ReadFile, WriteFile, FILE_FLAG_OVERLAPPED, PIPE_ACCESS_INBOUND,
    };
    use windows::Win32::System::Pipes::{ConnectNamedPipe, CreateNamedPipeW, PIPE_TYPE_BYTE};
    use windows::Win32::System::Threading::{CreateEventW, SetEvent};
    use windows::Win32::System::IO::{GetOverlappedResult, OVERLAPPED};

    use recc_common::{to_wide_nul, OwnedHandle, Win32Error};

    use crate::awaiters::HandleAwaiter;
    use crate::error::ClientResult;
    use crate::sched::SignalContext;

    const PIPE_BUFFER_SIZE: usize = 1024;

    /// Owns an inbound overlapped pipe and forwards its bytes to `dest`
    /// with unbuffered writes.
    pub struct PipeSink {
        pipe: OwnedHandle,
        event: OwnedHandle,
        // Boxed so the kernel-visible addresses survive the task moving
        // between continuations.
        overlapped: Box<OVERLAPPED>,
        buffer: Box<[u8; PIPE_BUFFER_SIZE]>,
        dest: HANDLE,
    }

    impl PipeSink {
        /// Creates the pipe and schedules the connect-forward loop.
        pub fn spawn(ctx: &mut SignalContext, path: &str, dest: HANDLE) -> ClientResult<()> {
            let wide = to_wide_nul(path);
            let pipe = unsafe {
                CreateNamedPipeW(
                    PCWSTR(wide.as_ptr()),
                    PIPE_ACCESS_INBOUND | FILE_FLAG_OVERLAPPED,
                    PIPE_TYPE_BYTE,
                    1,
                    PIPE_BUFFER_SIZE as u32,
                    PIPE_BUFFER_SIZE as u32,
                    0,
                    None,
                )
            };
            let pipe = OwnedHandle::from_raw(pipe);
            if !pipe.is_valid() {
                return Err(Win32Error::last("CreateNamedPipeW").into());
            }

            let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
                .map_err(|e| Win32Error::api("CreateEventW", e))?;
            let event = OwnedHandle::from_raw(event);

            let mut overlapped = Box::new(OVERLAPPED::default());
            overlapped.hEvent = event.as_raw();

            match unsafe { ConnectNamedPipe(pipe.as_raw(), Some(&mut *overlapped)) } {
                Ok(()) => {}
                Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => {}
                Err(e) if e.code() == ERROR_PIPE_CONNECTED.to_hresult() => {
                    // The writer raced the connect; no completion will
                    // fire, so reflect the connected state by hand.
                    unsafe { SetEvent(event.as_raw()) }
                        .map_err(|e| Win32Error::api("SetEvent", e))?;
                }
                Err(e) => return Err(Win32Error::api("ConnectNamedPipe", e).into()),
            }

            debug!(path, "pipe sink waiting for its writer");
            let task = Self {
                pipe,
                event,
                overlapped,
                buffer: Box::new([0u8; PIPE_BUFFER_SIZE]),
                dest,
            };
            let signal = task.event.as_raw();
            HandleAwaiter::install(ctx, signal, move |ctx| task.issue_read(ctx));
            Ok(())
        }

        fn issue_read(mut self, ctx: &mut SignalContext) -> ClientResult<()> {
            match unsafe {
                ReadFile(
                    self.pipe.as_raw(),
                    Some(&mut self.buffer[..]),
                    None,
                    Some(&mut *self.overlapped),
                )
            } {
                Ok(()) => {}
                Err(e) if e.code() == ERROR_IO_PENDING.to_hresult() => {}
                Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => {
                    debug!("pipe writer disconnected");
                    return Ok(());
                }
                Err(e) => return Err(Win32Error::api("ReadFile", e).into()),
            }
            let signal = self.event.as_raw();
            HandleAwaiter::install(ctx, signal, move |ctx| self.on_read(ctx));
            Ok(())
        }

        fn on_read(mut self, ctx: &mut SignalContext) -> ClientResult<()> {
            let mut transferred = 0u32;
            match unsafe {
                GetOverlappedResult(
                    self.pipe.as_raw(),
                    &*self.overlapped,
                    &mut transferred,
                    false,
                )
            } {
                Ok(()) => {}
                Err(e) if e.code() == ERROR_BROKEN_PIPE.to_hresult() => {
                    debug!("pipe writer disconnected");
                    return Ok(());
                }
                Err(e) => return Err(Win32Error::api("GetOverlappedResult", e).into()),
            }

            if transferred > 0 {
                let mut written = 0u32;
                unsafe {
                    WriteFile(
                        self.dest,
                        Some(&self.buffer[..transferred as usize]),
                        Some(&mut written),
                        None,
                    )
                }
                .map_err(|e| Win32Error::api("WriteFile", e))?;
            }
            self.issue_read(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_names_embed_the_controller_pid() {
        assert_eq!(data_pipe_name(4242), r"\\.\pipe\recc4242");
        assert_eq!(log_pipe_name(4242), r"\\.\pipe\recc_log4242");
    }
}
