//! Installable hooks against the target's audio APIs.

#[cfg(windows)]
pub mod dsound;

#[cfg(windows)]
use crate::error::{AgentError, AgentResult};

/// A live hook forwarding completed buffers to the session sink.
///
/// Construction installs the hook; dropping the device uninstalls it and
/// restores whatever it patched.
pub trait CaptureDevice: Send {}

/// Constructs the capture device for an API tag.
#[cfg(windows)]
pub fn create(api: &str) -> AgentResult<Box<dyn CaptureDevice>> {
    match api {
        "dsound" => Ok(dsound::DsoundCapture::install()?),
        other => Err(AgentError::UnknownApi(other.to_owned())),
    }
}
