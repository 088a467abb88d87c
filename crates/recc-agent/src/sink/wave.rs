//! RIFF/WAVE serialization.

use std::io::{self, Seek, SeekFrom, Write};

use super::FormatSink;

/// Size of the canonical RIFF header in bytes.
pub const HEADER_SIZE: u32 = 44;

/// Builds the 44-byte header with zeroed size fields.
///
/// Layout:
/// ```text
/// [0-3]   "RIFF"      [4-7]   file size - 8 (patched on drop)
/// [8-11]  "WAVE"      [12-15] "fmt "
/// [16-19] 16          [20-21] 1 (integer PCM)
/// [22-23] channels    [24-27] frequency
/// [28-31] bytes/sec   [32-33] frame size
/// [34-35] bits        [36-39] "data"
/// [40-43] data size (patched on drop)
/// ```
fn header(frequency: u32, bits: u16, channels: u16) -> [u8; HEADER_SIZE as usize] {
    let frame_size = channels * bits.div_ceil(8);
    let bytes_per_sec = frequency * u32::from(frame_size);

    let mut header = [0u8; HEADER_SIZE as usize];
    header[0..4].copy_from_slice(b"RIFF");
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&channels.to_le_bytes());
    header[24..28].copy_from_slice(&frequency.to_le_bytes());
    header[28..32].copy_from_slice(&bytes_per_sec.to_le_bytes());
    header[32..34].copy_from_slice(&frame_size.to_le_bytes());
    header[34..36].copy_from_slice(&bits.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header
}

/// Writes a RIFF/WAVE file.
///
/// The stream must be seekable: the two size fields can only be written
/// once the total PCM length is known, so they are patched when the sink
/// drops. On a non-seekable target (a pipe) the patch attempts are
/// silently skipped and the sizes stay zero.
pub struct WaveSink<W: Write + Seek> {
    out: W,
    data_len: u64,
}

impl<W: Write + Seek> WaveSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, data_len: 0 }
    }
}

impl<W: Write + Seek + Send> FormatSink for WaveSink<W> {
    fn setup(&mut self, frequency: u32, bits: u16, channels: u16) -> io::Result<()> {
        self.out.write_all(&header(frequency, bits, channels))
    }

    fn write_pcm(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.data_len += bytes.len() as u64;
        Ok(())
    }
}

impl<W: Write + Seek> Drop for WaveSink<W> {
    fn drop(&mut self) {
        let data = self.data_len as u32;
        // Each write is gated on its seek: a pipe rejects the seek, and
        // the size bytes must not leak into the stream as payload.
        if self.out.seek(SeekFrom::Start(4)).is_ok() {
            let _ = self.out.write_all(&(data + HEADER_SIZE - 8).to_le_bytes());
        }
        if self.out.seek(SeekFrom::Start(40)).is_ok() {
            let _ = self.out.write_all(&data.to_le_bytes());
        }
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn record(writes: &[&[u8]]) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut sink = WaveSink::new(&mut buffer);
            sink.setup(44100, 16, 2).expect("setup");
            for chunk in writes {
                sink.write_pcm(chunk).expect("write");
            }
        }
        buffer.into_inner()
    }

    fn le32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
    }

    fn le16(bytes: &[u8], at: usize) -> u16 {
        u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap())
    }

    #[test]
    fn header_matches_the_canonical_layout() {
        let file = record(&[]);
        assert_eq!(&file[0..4], b"RIFF");
        assert_eq!(&file[8..12], b"WAVE");
        assert_eq!(&file[12..16], b"fmt ");
        assert_eq!(le32(&file, 16), 16);
        assert_eq!(le16(&file, 20), 1);
        assert_eq!(le16(&file, 22), 2);
        assert_eq!(le32(&file, 24), 44100);
        assert_eq!(le32(&file, 28), 176_400);
        assert_eq!(le16(&file, 32), 4);
        assert_eq!(le16(&file, 34), 16);
        assert_eq!(&file[36..40], b"data");
    }

    #[test]
    fn size_fields_are_patched_on_drop() {
        let file = record(&[&[1u8; 1000], &[2u8; 234], &[3u8; 66]]);
        let n = 1300u32;
        assert_eq!(file.len() as u32, HEADER_SIZE + n);
        assert_eq!(le32(&file, 4), n + 36);
        assert_eq!(le32(&file, 40), n);
    }

    #[test]
    fn empty_recording_still_patches_sizes() {
        let file = record(&[]);
        assert_eq!(le32(&file, 4), 36);
        assert_eq!(le32(&file, 40), 0);
        assert_eq!(file.len(), HEADER_SIZE as usize);
    }

    #[test]
    fn odd_bit_depths_round_the_frame_size_up() {
        let header = header(8000, 12, 1);
        // 12 bits occupy 2 bytes per sample.
        assert_eq!(le16(&header, 32), 2);
        assert_eq!(le32(&header, 28), 16_000);
    }

    #[test]
    fn pcm_bytes_follow_the_header_untouched() {
        let file = record(&[b"abcd", b"efgh"]);
        assert_eq!(&file[44..], b"abcdefgh");
    }
}
