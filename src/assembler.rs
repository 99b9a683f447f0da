//! Optional reassembly of response frames from an unaligned byte stream.
//!
//! Serial reads are not aligned to frames: one read may carry half a frame,
//! or the tail of one frame and the head of the next. [`FrameAssembler`]
//! buffers the chunks and cuts complete response frames using the length
//! implied by their function code. Frames whose length cannot be derived
//! (unknown function codes) are emitted as whatever has been buffered, which
//! is the same as treating a chunk as a frame.

use crate::protocol::{EXCEPTION_BIT, MIN_FRAME_LEN};
use log::trace;

/// Length of the response frame at the head of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// Not enough bytes yet to tell.
    Incomplete,
    Known(usize),
    /// Function code without a derivable length.
    Unsized,
}

/// Expected total length (CRC included) of the response frame at the start
/// of `buffer`.
pub fn expected_response_len(buffer: &[u8]) -> FrameLength {
    let Some(&function) = buffer.get(1) else {
        return FrameLength::Incomplete;
    };
    if function & EXCEPTION_BIT != 0 {
        return FrameLength::Known(MIN_FRAME_LEN);
    }
    match function {
        0x01..=0x04 => match buffer.get(2) {
            Some(&byte_count) => FrameLength::Known(MIN_FRAME_LEN + usize::from(byte_count)),
            None => FrameLength::Incomplete,
        },
        0x05 | 0x06 | 0x0F | 0x10 => FrameLength::Known(8),
        _ => FrameLength::Unsized,
    }
}

/// Buffers response bytes until whole frames are available.
///
/// The buffer never holds more than one partial frame, at most 259 bytes.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a chunk and returns every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        loop {
            match expected_response_len(&self.buffer) {
                FrameLength::Known(length) if self.buffer.len() >= length => {
                    frames.push(self.buffer.drain(..length).collect());
                }
                FrameLength::Known(_) | FrameLength::Incomplete => break,
                FrameLength::Unsized => {
                    frames.push(std::mem::take(&mut self.buffer));
                    break;
                }
            }
        }
        trace!(
            "Assembled {} frame(s), {} byte(s) pending",
            frames.len(),
            self.buffer.len()
        );
        frames
    }

    /// Returns the buffered partial frame, if any, and empties the buffer.
    ///
    /// Called after an inter-frame silence: whatever is left will not be
    /// completed by later bytes.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Frame;

    fn frame(body: &[u8]) -> Vec<u8> {
        Frame::with_crc(body.to_vec()).into_bytes()
    }

    #[test]
    fn expected_lengths() {
        assert_eq!(expected_response_len(&[]), FrameLength::Incomplete);
        assert_eq!(expected_response_len(&[0x01]), FrameLength::Incomplete);
        assert_eq!(expected_response_len(&[0x01, 0x03]), FrameLength::Incomplete);
        assert_eq!(expected_response_len(&[0x01, 0x03, 0x04]), FrameLength::Known(9));
        assert_eq!(expected_response_len(&[0x01, 0x83]), FrameLength::Known(5));
        assert_eq!(expected_response_len(&[0x01, 0x10]), FrameLength::Known(8));
        assert_eq!(expected_response_len(&[0x01, 0x2B]), FrameLength::Unsized);
    }

    #[test]
    fn joins_split_frame() {
        let bytes = frame(&[0x01, 0x03, 0x04, 0x00, 0x01, 0x00, 0x02]);
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&bytes[..2]).is_empty());
        assert!(assembler.push(&bytes[2..6]).is_empty());
        assert_eq!(assembler.push(&bytes[6..]), vec![bytes.clone()]);
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn splits_coalesced_frames() {
        let first = frame(&[0x01, 0x06, 0x00, 0x01, 0x00, 0x03]);
        let second = frame(&[0x01, 0x83, 0x02]);
        let third = frame(&[0x01, 0x01, 0x01, 0x05]);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        stream.extend_from_slice(&third[..3]);

        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(&stream), vec![first, second]);
        assert_eq!(assembler.pending(), 3);
        assert_eq!(assembler.push(&third[3..]), vec![third]);
    }

    #[test]
    fn unsized_function_emits_buffer() {
        let mut assembler = FrameAssembler::new();
        let frames = assembler.push(&[0x01, 0x2B, 0x0E, 0x01, 0x00, 0x00]);
        assert_eq!(frames, vec![vec![0x01, 0x2B, 0x0E, 0x01, 0x00, 0x00]]);
        assert_eq!(assembler.flush(), None);
    }

    #[test]
    fn flush_returns_partial_frame() {
        let mut assembler = FrameAssembler::new();
        assert!(assembler.push(&[0x01, 0x03, 0x02, 0x00]).is_empty());
        assert_eq!(assembler.flush(), Some(vec![0x01, 0x03, 0x02, 0x00]));
        assert_eq!(assembler.pending(), 0);
    }
}
