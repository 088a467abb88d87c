//! Process-global agent state.
//!
//! One mutex serializes the three entry points against each other and
//! against the hook callback; everything mutable lives behind it.

use std::fmt;
use std::fs::File;
use std::io::Write;

use parking_lot::{Mutex, MutexGuard};

use crate::capture::CaptureDevice;
use crate::error::{AgentError, AgentResult};
use crate::sink::{self, FormatSink};

static STATE: Mutex<AgentState> = Mutex::new(AgentState {
    log: None,
    session: None,
});

/// Acquires the agent's global mutex.
pub fn lock() -> MutexGuard<'static, AgentState> {
    STATE.lock()
}

/// A live capture.
///
/// Field order is load-bearing: the device drops first (unhooking), then
/// the sink (flushing headers into the stream it owns, which closes with
/// it).
pub struct Session {
    device: Box<dyn CaptureDevice>,
    sink: Box<dyn FormatSink>,
    format_announced: bool,
}

/// Everything the agent keeps between entry-point calls.
pub struct AgentState {
    log: Option<File>,
    session: Option<Session>,
}

impl AgentState {
    /// Closes and reopens the log sink on `path`.
    pub fn open_log(&mut self, path: &str) -> AgentResult<()> {
        self.log = None;
        let file = File::create(path).map_err(AgentError::OpenOutput)?;
        self.log = Some(file);
        self.line(format_args!("Logging output from DLL."));
        Ok(())
    }

    /// Appends one line to the log, if one is open. Flushed per line so
    /// the pipe reader on the controller side sees it promptly.
    pub fn line(&mut self, args: fmt::Arguments<'_>) {
        if let Some(log) = &mut self.log {
            let _ = writeln!(log, "{args}");
            let _ = log.flush();
        }
    }

    /// Logs an error the way the entry points report it.
    pub fn log_error(&mut self, err: &AgentError) {
        self.line(format_args!("{err} (code 0x{:08X})", err.code()));
    }

    /// Initializes or reinitializes capture to `out`.
    ///
    /// On any failure the partially built session dies locally and the
    /// previous global state (already torn down if this was a
    /// reinitialization) stays untouched.
    pub fn initialize(&mut self, out: &str, api: &str, format: &str) -> AgentResult<()> {
        if self.session.is_some() {
            self.line(format_args!(
                "Reinitializing capture for API {api} with format {format} ..."
            ));
            self.session = None;
            self.line(format_args!("Old capture released."));
        } else {
            self.line(format_args!(
                "Initializing capture for API {api} with format {format} ..."
            ));
        }

        let file = File::create(out).map_err(AgentError::OpenOutput)?;
        let sink = sink::create(format, file)?;
        let device = crate::capture::create(api)?;
        self.session = Some(Session {
            device,
            sink,
            format_announced: false,
        });
        self.line(format_args!("Capture successfully initialized."));
        Ok(())
    }

    /// Tears the session down (device, then sink, then stream) and closes
    /// the log.
    pub fn release(&mut self) {
        self.line(format_args!("Capture releasing ..."));
        self.session = None;
        self.line(format_args!("Capture successfully released."));
        self.log = None;
    }

    /// Forwards one successful unlock to the sink.
    ///
    /// `probe` reads the stream format; it runs once, before the first
    /// bytes, and its result is announced in the log and fixed in the
    /// sink.
    pub fn deliver(
        &mut self,
        probe: impl FnOnce() -> Option<(u32, u16, u16)>,
        first: &[u8],
        second: &[u8],
    ) {
        let announced = match &self.session {
            Some(session) => session.format_announced,
            None => return,
        };
        if !announced {
            let Some((frequency, bits, channels)) = probe() else {
                return;
            };
            self.line(format_args!(
                "Output format: {frequency}Hz, {bits} bits, {channels} channels."
            ));
            let mut setup_error = None;
            if let Some(session) = self.session.as_mut() {
                if let Err(err) = session.sink.setup(frequency, bits, channels) {
                    setup_error = Some(err);
                }
                session.format_announced = true;
            }
            if let Some(err) = setup_error {
                self.line(format_args!("Format setup failed: {err}."));
                return;
            }
        }

        let mut write_error = None;
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.sink.write_pcm(first) {
                write_error = Some(err);
            } else if !second.is_empty() {
                if let Err(err) = session.sink.write_pcm(second) {
                    write_error = Some(err);
                }
            }
        }
        if let Some(err) = write_error {
            self.line(format_args!("PCM write failed: {err}."));
        }
    }
}
