//! PCM consumers on the agent side.
//!
//! A sink receives the raw byte stream the hook lifts out of the target's
//! audio buffers. It owns the output stream it writes to, so dropping a
//! sink finalizes and closes the file in one move.

mod pcm;
mod wave;

pub use pcm::PcmSink;
pub use wave::WaveSink;

use std::fs::File;
use std::io;

use crate::error::{AgentError, AgentResult};

/// Receives the capture stream.
pub trait FormatSink: Send {
    /// Fixes the stream parameters. Called at most once, before any PCM.
    fn setup(&mut self, frequency: u32, bits: u16, channels: u16) -> io::Result<()>;

    /// Appends raw sample bytes.
    fn write_pcm(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// Constructs the sink for a format tag, taking ownership of the stream.
pub fn create(format: &str, file: File) -> AgentResult<Box<dyn FormatSink>> {
    match format {
        "wav" => Ok(Box::new(WaveSink::new(file))),
        "pcm" => Ok(Box::new(PcmSink::new(file))),
        other => Err(AgentError::UnknownFormat(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_refused() {
        let file = tempfile();
        let err = create("ogg", file).err().expect("must refuse");
        assert!(matches!(err, AgentError::UnknownFormat(tag) if tag == "ogg"));
    }

    #[test]
    fn known_tags_build_sinks() {
        assert!(create("wav", tempfile()).is_ok());
        assert!(create("pcm", tempfile()).is_ok());
    }

    fn tempfile() -> File {
        let path = std::env::temp_dir().join(format!(
            "recc-sink-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        let file = File::create(&path).expect("temp file");
        let _ = std::fs::remove_file(&path);
        file
    }
}
