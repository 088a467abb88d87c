//! Raw PCM pass-through.

use std::io::{self, Write};

use super::FormatSink;

/// Writes the sample bytes exactly as received, no header, no fixup.
pub struct PcmSink<W: Write> {
    out: W,
}

impl<W: Write> PcmSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> FormatSink for PcmSink<W> {
    fn setup(&mut self, _frequency: u32, _bits: u16, _channels: u16) -> io::Result<()> {
        Ok(())
    }

    fn write_pcm(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pass_through_headerless() {
        let mut out = Vec::new();
        let mut sink = PcmSink::new(&mut out);
        sink.setup(48000, 16, 2).expect("setup");
        sink.write_pcm(b"\x01\x02").expect("write");
        sink.write_pcm(b"\x03").expect("write");
        assert_eq!(out, b"\x01\x02\x03");
    }
}
