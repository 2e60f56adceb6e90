//! JPEG frame extraction from an unframed MJPEG byte stream.
//!
//! ESP32 camera servers push `multipart/x-mixed-replace` bodies whose part
//! headers are not trustworthy (missing or wrong `Content-Length`), so frame
//! boundaries are found purely by scanning for the JPEG Start-Of-Image
//! (`FF D8`) and End-Of-Image (`FF D9`) markers. Chunk boundaries are
//! arbitrary: a marker may be split across two reads.

use anyhow::{anyhow, Result};

/// Default accumulator cap. A healthy stream never buffers more than a
/// couple of frames; anything past this means the markers are not showing up.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Incremental JPEG extractor.
///
/// One instance per connection attempt; state never survives a reconnect.
/// Bytes already searched are not searched again, so each chunk costs time
/// proportional to its own length rather than to the accumulator.
#[derive(Debug)]
pub struct FrameExtractor {
    buffer: Vec<u8>,
    max_buffer_bytes: usize,
    discarded: u64,
    /// SOI of the frame being assembled, once seen.
    soi: Option<usize>,
    /// Everything before this offset has been searched for the pending marker.
    scanned: usize,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_BYTES)
    }

    pub fn with_max_buffer(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(64 * 1024),
            max_buffer_bytes,
            discarded: 0,
            soi: None,
            scanned: 0,
        }
    }

    /// Append a chunk and return the complete frames it made available.
    ///
    /// Frames are cut lazily as the iterator is driven; anything not pulled
    /// stays buffered for the next call. Fails only when the accumulator
    /// outgrows its cap, which the caller treats as a dead connection.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<impl Iterator<Item = Vec<u8>> + '_> {
        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > self.max_buffer_bytes && self.locate().is_none() {
            return Err(anyhow!(
                "mjpeg accumulator exceeded {} bytes without a complete frame",
                self.max_buffer_bytes
            ));
        }
        Ok(std::iter::from_fn(move || self.next_frame()))
    }

    /// Cut the next complete frame off the front of the accumulator.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let (start, end) = self.locate()?;
            let frame = self.buffer[start..end].to_vec();
            self.buffer.drain(..end);
            self.soi = None;
            self.scanned = 0;
            if frame.len() <= SOI.len() + EOI.len() {
                self.discarded += 1;
                continue;
            }
            return Some(frame);
        }
    }

    /// Bytes currently waiting for a closing marker.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Empty marker pairs dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    /// Locate `[start, end)` of the first complete JPEG: the first SOI and
    /// the first EOI that follows it. Resumes one byte before where the last
    /// search stopped so a marker split across chunks is still found.
    fn locate(&mut self) -> Option<(usize, usize)> {
        let start = match self.soi {
            Some(start) => start,
            None => match find_marker(&self.buffer, self.scanned.saturating_sub(1), SOI) {
                Some(start) => {
                    self.soi = Some(start);
                    self.scanned = start + SOI.len();
                    start
                }
                None => {
                    self.scanned = self.buffer.len();
                    return None;
                }
            },
        };
        let from = self.scanned.saturating_sub(1).max(start + SOI.len());
        match find_marker(&self.buffer, from, EOI) {
            Some(eoi) => Some((start, eoi + EOI.len())),
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }
}

fn find_marker(buffer: &[u8], from: usize, marker: [u8; 2]) -> Option<usize> {
    if from >= buffer.len() {
        return None;
    }
    buffer[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(payload);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn frame_split_across_three_chunks_is_reassembled() -> Result<()> {
        let original = jpeg(b"\x00\x10JFIF-body-bytes\x01\x02\x03");
        let mut extractor = FrameExtractor::new();

        assert_eq!(extractor.feed(&original[..3])?.count(), 0);
        assert_eq!(extractor.feed(&original[3..11])?.count(), 0);
        let frames: Vec<_> = extractor.feed(&original[11..])?.collect();

        assert_eq!(frames, vec![original]);
        assert_eq!(extractor.buffered(), 0);
        Ok(())
    }

    #[test]
    fn marker_split_between_chunks() -> Result<()> {
        let original = jpeg(b"abc");
        let split = original.len() - 1;
        let mut extractor = FrameExtractor::new();

        assert_eq!(extractor.feed(&original[..split])?.count(), 0);
        let frames: Vec<_> = extractor.feed(&original[split..])?.collect();
        assert_eq!(frames, vec![original]);
        Ok(())
    }

    #[test]
    fn multiple_frames_from_one_chunk_keep_trailing_partial() -> Result<()> {
        let first = jpeg(b"one");
        let second = jpeg(b"two");
        let mut chunk = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        chunk.extend_from_slice(&first);
        chunk.extend_from_slice(b"\r\n--frame\r\n\r\n");
        chunk.extend_from_slice(&second);
        chunk.extend_from_slice(&[0xFF, 0xD8, b'p']);

        let mut extractor = FrameExtractor::new();
        let frames: Vec<_> = extractor.feed(&chunk)?.collect();

        assert_eq!(frames, vec![first, second]);
        assert_eq!(extractor.buffered(), 3);
        Ok(())
    }

    #[test]
    fn empty_slice_is_discarded_and_extraction_continues() -> Result<()> {
        let real = jpeg(b"payload");
        let mut chunk = vec![0xFF, 0xD8, 0xFF, 0xD9];
        chunk.extend_from_slice(&real);

        let mut extractor = FrameExtractor::new();
        let frames: Vec<_> = extractor.feed(&chunk)?.collect();

        assert_eq!(frames, vec![real]);
        assert_eq!(extractor.discarded(), 1);
        Ok(())
    }

    #[test]
    fn lone_end_marker_waits_for_more_data() -> Result<()> {
        let mut extractor = FrameExtractor::new();
        assert_eq!(extractor.feed(&[0x00, 0xFF, 0xD9, 0x11])?.count(), 0);
        assert_eq!(extractor.buffered(), 4);

        let frame = jpeg(b"x");
        let frames: Vec<_> = extractor.feed(&frame)?.collect();
        assert_eq!(frames, vec![frame]);
        Ok(())
    }

    #[test]
    fn end_marker_before_start_is_ignored() -> Result<()> {
        let mut buffer = vec![0xFF, 0xD9];
        buffer.extend_from_slice(&jpeg(b"abc"));
        let mut extractor = FrameExtractor::new();
        let frames: Vec<_> = extractor.feed(&buffer)?.collect();
        assert_eq!(frames, vec![jpeg(b"abc")]);
        Ok(())
    }

    #[test]
    fn start_marker_split_between_chunks() -> Result<()> {
        let original = jpeg(b"body");
        let mut extractor = FrameExtractor::new();

        let mut head = b"garbage".to_vec();
        head.push(0xFF);
        assert_eq!(extractor.feed(&head)?.count(), 0);
        let frames: Vec<_> = extractor.feed(&original[1..])?.collect();
        assert_eq!(frames, vec![original]);
        Ok(())
    }

    #[test]
    fn end_marker_split_after_long_partial_frame() -> Result<()> {
        let mut extractor = FrameExtractor::new();
        assert_eq!(extractor.feed(&[0xFF, 0xD8])?.count(), 0);
        for _ in 0..64 {
            assert_eq!(extractor.feed(&[0x42; 1024])?.count(), 0);
        }
        assert_eq!(extractor.feed(&[0x42, 0xFF])?.count(), 0);
        let frames: Vec<_> = extractor.feed(&[0xD9, 0xFF, 0xD8])?.collect();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 2 + 64 * 1024 + 1 + 2);
        assert!(frames[0].ends_with(&[0x42, 0xFF, 0xD9]));
        assert_eq!(extractor.buffered(), 2);

        let frames: Vec<_> = extractor.feed(&jpeg(b"x")[2..])?.collect();
        assert_eq!(frames, vec![jpeg(b"x")]);
        Ok(())
    }

    #[test]
    fn overflow_of_many_small_chunks_is_detected_quickly() {
        let started = std::time::Instant::now();
        let mut extractor = FrameExtractor::new();
        let chunk = vec![0u8; 8 * 1024];
        let mut failed = extractor.feed(&[0xFF, 0xD8]).is_err();
        for _ in 0..1024 {
            if failed {
                break;
            }
            failed = extractor.feed(&chunk).map(|frames| frames.count()).is_err();
        }
        assert!(failed);
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn oversized_accumulator_fails_the_connection() {
        let mut extractor = FrameExtractor::with_max_buffer(16);
        let mut chunk = vec![0xFF, 0xD8];
        chunk.extend_from_slice(&[0u8; 32]);
        assert!(extractor.feed(&chunk).is_err());
    }
}
