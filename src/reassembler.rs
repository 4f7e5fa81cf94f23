//! Slice reassembler
//!
//! Turns transport slices of arbitrary size into whole raw frames. A slice
//! may hold part of a frame, several frames, or the tail of one frame
//! followed by the head of the next; the unread rest of a slice is retained
//! for the following call.
//!
//! One wall-clock deadline is computed per [`Reassembler::next_frame`] call
//! and the remaining budget is passed to every slice wait, so a frame spread
//! over many slices cannot exceed the caller's timeout. A frame abandoned on
//! timeout is never returned half-filled; the bytes it still owed are skipped
//! before the next frame starts, keeping frames aligned.

use crate::error::{RadarError, Result};
use crate::profile::StatusPolicy;
use crate::transport::{DataFormat, Slice, Transport};
use std::time::{Duration, Instant};

/// Bytes of one frame exactly as delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
    /// Timestamp of the slice holding the first byte
    pub timestamp_us: u64,
    /// Number of slices the frame was read from
    pub slices: usize,
}

impl RawFrame {
    pub fn words(&self, format: DataFormat) -> Vec<u16> {
        unpack(format, &self.bytes)
    }
}

/// Unpack sample words of `format`
pub fn unpack(format: DataFormat, bytes: &[u8]) -> Vec<u16> {
    match format {
        DataFormat::Packed12 => unpack_packed12(bytes),
        DataFormat::Raw16 => unpack_raw16(bytes),
    }
}

/// Two 12-bit samples from every three bytes
///
/// Byte 0 holds the upper 8 bits of sample 0; the high nibble of byte 1 is
/// its low nibble, the low nibble of byte 1 the high nibble of sample 1.
/// A trailing pair of bytes carries one last sample.
pub fn unpack_packed12(bytes: &[u8]) -> Vec<u16> {
    let mut words = Vec::with_capacity(bytes.len() * 2 / 3 + 1);
    for chunk in bytes.chunks(3) {
        match *chunk {
            [b0, b1, b2] => {
                words.push(((b0 as u16) << 4) | ((b1 as u16) >> 4));
                words.push((((b1 as u16) & 0x0F) << 8) | b2 as u16);
            }
            [b0, b1] => words.push(((b0 as u16) << 4) | ((b1 as u16) >> 4)),
            _ => {}
        }
    }
    words
}

/// Little-endian 16-bit words; a trailing odd byte is ignored
pub fn unpack_raw16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Frame-length accounting across transport slices
#[derive(Debug)]
pub struct Reassembler {
    frame_bytes: usize,
    policy: StatusPolicy,
    retained: Option<Slice>,
    /// Bytes of an abandoned frame still to be skipped
    pending_discard: usize,
    frames_emitted: u64,
    bytes_consumed: u64,
}

impl Reassembler {
    pub fn new(frame_bytes: usize, policy: StatusPolicy) -> Self {
        Self {
            frame_bytes,
            policy,
            retained: None,
            pending_discard: 0,
            frames_emitted: 0,
            bytes_consumed: 0,
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Bytes taken from the transport for emitted frames
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    pub fn has_retained(&self) -> bool {
        self.retained.is_some()
    }

    /// Drop the retained slice and any alignment debt
    pub fn reset(&mut self) {
        if let Some(slice) = self.retained.take() {
            tracing::debug!("Discarding retained slice with {} unread bytes", slice.remaining());
        }
        self.pending_discard = 0;
    }

    /// Next slice: the retained one, or one from the transport within the deadline
    fn next_slice(&mut self, transport: &mut dyn Transport, deadline: Instant) -> Result<Slice> {
        if let Some(slice) = self.retained.take() {
            return Ok(slice);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let slice = transport.get_frame(remaining)?.ok_or(RadarError::Timeout)?;
        tracing::trace!(
            "Slice of {} bytes, status {}, timestamp {} us",
            slice.len(),
            slice.status,
            slice.timestamp_us
        );
        if let Err(e) = self.policy.check(slice.status) {
            self.pending_discard = 0;
            return Err(e);
        }
        Ok(slice)
    }

    fn skip_abandoned(&mut self, transport: &mut dyn Transport, deadline: Instant) -> Result<()> {
        while self.pending_discard > 0 {
            let mut slice = self.next_slice(transport, deadline)?;
            let skip = slice.remaining().min(self.pending_discard);
            slice.cursor += skip;
            self.pending_discard -= skip;
            if slice.remaining() > 0 {
                self.retained = Some(slice);
            }
        }
        Ok(())
    }

    /// Reassemble the next frame, waiting at most `timeout` in total
    pub fn next_frame(&mut self, transport: &mut dyn Transport, timeout: Duration) -> Result<RawFrame> {
        let deadline = Instant::now() + timeout;
        self.skip_abandoned(transport, deadline)?;

        let mut bytes = Vec::with_capacity(self.frame_bytes);
        let mut timestamp_us = None;
        let mut slices = 0;

        while bytes.len() < self.frame_bytes {
            let mut slice = match self.next_slice(transport, deadline) {
                Ok(slice) => slice,
                Err(RadarError::Timeout) => {
                    if !bytes.is_empty() {
                        self.pending_discard = self.frame_bytes - bytes.len();
                        tracing::debug!(
                            "Frame abandoned on timeout, {} bytes to skip",
                            self.pending_discard
                        );
                    }
                    return Err(RadarError::Timeout);
                }
                Err(e) => return Err(e),
            };

            slices += 1;
            timestamp_us.get_or_insert(slice.timestamp_us);
            let needed = self.frame_bytes - bytes.len();
            let take = slice.remaining().min(needed);
            bytes.extend_from_slice(&slice.unread()[..take]);
            slice.cursor += take;

            if slice.remaining() > 0 {
                self.retained = Some(slice);
            }
        }

        self.frames_emitted += 1;
        self.bytes_consumed += self.frame_bytes as u64;
        Ok(RawFrame {
            bytes,
            timestamp_us: timestamp_us.unwrap_or(0),
            slices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, SliceStatus};
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn scripted(slices: Vec<Slice>) -> MockTransport {
        let mut queue: VecDeque<Slice> = slices.into();
        let mut transport = MockTransport::new();
        transport
            .expect_get_frame()
            .returning(move |_| Ok(queue.pop_front()));
        transport
    }

    fn ok_slice(bytes: &[u8], timestamp_us: u64) -> Slice {
        Slice::new(bytes.to_vec(), SliceStatus::Ok, timestamp_us)
    }

    #[test]
    fn test_unpack_packed12() {
        assert_eq!(unpack_packed12(&[0xAB, 0xC1, 0x23]), vec![0xABC, 0x123]);
        assert_eq!(unpack_packed12(&[0xAB, 0xC0]), vec![0xABC]);
        assert_eq!(unpack_raw16(&[0x34, 0x12, 0xFF]), vec![0x1234]);
    }

    #[test]
    fn test_frame_spanning_two_slices() {
        let mut transport = scripted(vec![ok_slice(&[1, 2, 3], 10), ok_slice(&[4, 5, 6], 20)]);
        let mut reassembler = Reassembler::new(6, StatusPolicy::Framed);
        let frame = reassembler.next_frame(&mut transport, Duration::from_millis(10)).unwrap();
        assert_eq!(frame.bytes, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.timestamp_us, 10);
        assert_eq!(frame.slices, 2);
        assert!(!reassembler.has_retained());
    }

    #[test]
    fn test_slice_holding_several_frames() {
        let mut transport = scripted(vec![ok_slice(&[1, 2, 3, 4, 5], 10), ok_slice(&[6, 7, 8], 20)]);
        let mut reassembler = Reassembler::new(2, StatusPolicy::Framed);
        let timeout = Duration::from_millis(10);
        assert_eq!(reassembler.next_frame(&mut transport, timeout).unwrap().bytes, vec![1, 2]);
        assert!(reassembler.has_retained());
        assert_eq!(reassembler.next_frame(&mut transport, timeout).unwrap().bytes, vec![3, 4]);
        let straddling = reassembler.next_frame(&mut transport, timeout).unwrap();
        assert_eq!(straddling.bytes, vec![5, 6]);
        assert_eq!(straddling.timestamp_us, 10);
        assert_eq!(reassembler.bytes_consumed(), 6);
    }

    #[test]
    fn test_status_error_aborts_fetch() {
        let mut transport = scripted(vec![
            ok_slice(&[1, 2], 10),
            Slice::new(vec![3, 4], SliceStatus::QueueTrimmed, 20),
        ]);
        let mut reassembler = Reassembler::new(4, StatusPolicy::Framed);
        let err = reassembler.next_frame(&mut transport, Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, RadarError::FrameAcquisitionFailed));
        assert!(!reassembler.has_retained());
    }

    #[test]
    fn test_timeout_skips_rest_of_abandoned_frame() {
        let mut slices: VecDeque<Option<Slice>> = VecDeque::from(vec![
            Some(ok_slice(&[1, 2], 10)),
            None,
            Some(ok_slice(&[3, 4, 5, 6], 20)),
            Some(ok_slice(&[7, 8], 30)),
        ]);
        let mut transport = MockTransport::new();
        transport
            .expect_get_frame()
            .returning(move |_| Ok(slices.pop_front().flatten()));

        let mut reassembler = Reassembler::new(4, StatusPolicy::Framed);
        let timeout = Duration::from_millis(10);
        assert!(matches!(
            reassembler.next_frame(&mut transport, timeout),
            Err(RadarError::Timeout)
        ));
        // bytes 3 and 4 completed the abandoned frame
        let frame = reassembler.next_frame(&mut transport, timeout).unwrap();
        assert_eq!(frame.bytes, vec![5, 6, 7, 8]);
        assert_eq!(frame.timestamp_us, 20);
    }

    #[test]
    fn test_cancelled_wait_is_communication_error() {
        let mut transport = MockTransport::new();
        transport
            .expect_get_frame()
            .returning(|_| Err(RadarError::Communication("wait cancelled".to_string())));
        let mut reassembler = Reassembler::new(4, StatusPolicy::Framed);
        assert!(matches!(
            reassembler.next_frame(&mut transport, Duration::from_millis(10)),
            Err(RadarError::Communication(_))
        ));
    }

    #[cfg(feature = "mock-board")]
    #[test]
    fn test_timeout_bounds_multi_slice_wait() {
        use crate::transport::mock::MockBoard;
        use crate::transport::{DataSettings, ReadoutEntry};

        // 96-byte slices every 40 ms, ten per frame
        let mut board = MockBoard::avian("BGT60TR13C").with_slice_interval(Duration::from_millis(40));
        let settings = DataSettings::new(DataFormat::Packed12, vec![ReadoutEntry::new(0x60, 64)], 1);
        board.configure_data(0, &settings).unwrap();
        board.start(0).unwrap();
        board.start_streaming().unwrap();

        let mut reassembler = Reassembler::new(960, StatusPolicy::Framed);
        let timeout = Duration::from_millis(100);
        let started = Instant::now();
        let result = reassembler.next_frame(&mut board, timeout);
        let elapsed = started.elapsed();
        assert!(matches!(result, Err(RadarError::Timeout)));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(50), "waited {:?}", elapsed);

        // the abandoned frame is skipped, the next one starts on a frame boundary
        let frame = reassembler.next_frame(&mut board, Duration::from_secs(2)).unwrap();
        assert_eq!(frame.bytes.len(), 960);
        assert_eq!(reassembler.frames_emitted(), 1);
        board.stop_streaming().unwrap();
    }

    proptest! {
        #[test]
        fn prop_reassembly_is_lossless(
            frame_bytes in 1usize..64,
            frames in 1usize..8,
            cuts in proptest::collection::vec(1usize..50, 1..40),
        ) {
            let stream: Vec<u8> = (0..frame_bytes * frames).map(|i| (i % 251) as u8).collect();
            let mut slices = Vec::new();
            let mut offset = 0;
            let mut cut = cuts.iter().cycle();
            while offset < stream.len() {
                let len = (*cut.next().unwrap()).min(stream.len() - offset);
                slices.push(ok_slice(&stream[offset..offset + len], offset as u64));
                offset += len;
            }

            let mut transport = scripted(slices);
            let mut reassembler = Reassembler::new(frame_bytes, StatusPolicy::Framed);
            let mut collected = Vec::new();
            for _ in 0..frames {
                let frame = reassembler.next_frame(&mut transport, Duration::from_millis(5)).unwrap();
                prop_assert_eq!(frame.bytes.len(), frame_bytes);
                collected.extend(frame.bytes);
            }
            prop_assert_eq!(collected, stream);
            prop_assert_eq!(reassembler.bytes_consumed(), (frame_bytes * frames) as u64);
        }
    }
}
