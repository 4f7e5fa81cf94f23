//! Baseboard transport interface
//!
//! The driver never talks to USB directly. Everything it needs from a
//! baseboard goes through the [`Transport`] trait: register I/O, the
//! autonomous readout configuration, and the slice queue filled by the
//! board's I/O thread.
//!
//! A slice is not a frame. It may hold several frames, part of one, or the
//! tail of one frame followed by the head of the next; see
//! [`crate::reassembler`].

pub mod stats;

#[cfg(feature = "mock-board")]
pub mod mock;

pub use stats::TransportStats;

use crate::error::{RadarError, Result};
use crate::registers::{RegisterAccess, RegisterWord};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Status attached to every slice by the baseboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceStatus {
    Ok,
    /// The sensor FIFO overflowed before the board drained it
    FifoOverflow,
    FrameDropped,
    PoolDepleted,
    /// The host queue was full and slices were discarded before this one
    QueueTrimmed,
    SizeExceeded,
    LowLevel,
    Unknown(u32),
}

impl SliceStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, SliceStatus::Ok)
    }
}

impl fmt::Display for SliceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SliceStatus::Ok => write!(f, "ok"),
            SliceStatus::FifoOverflow => write!(f, "fifo overflow"),
            SliceStatus::FrameDropped => write!(f, "frame dropped"),
            SliceStatus::PoolDepleted => write!(f, "pool depleted"),
            SliceStatus::QueueTrimmed => write!(f, "queue trimmed"),
            SliceStatus::SizeExceeded => write!(f, "size exceeded"),
            SliceStatus::LowLevel => write!(f, "low level error"),
            SliceStatus::Unknown(code) => write!(f, "unknown status 0x{:X}", code),
        }
    }
}

/// One transport delivery unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    pub data: Vec<u8>,
    /// Bytes already consumed by earlier frames
    pub cursor: usize,
    pub status: SliceStatus,
    /// Monotonic sensor timestamp in microseconds
    pub timestamp_us: u64,
    /// Data channel that produced the slice
    pub channel: u8,
}

impl Slice {
    pub fn new(data: Vec<u8>, status: SliceStatus, timestamp_us: u64) -> Self {
        Self {
            data,
            cursor: 0,
            status,
            timestamp_us,
            channel: 0,
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.cursor.min(self.data.len())..]
    }
}

/// Sample word format delivered by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataFormat {
    /// Two 12-bit samples in every three bytes
    #[default]
    Packed12,
    /// One little-endian 16-bit word per sample
    Raw16,
}

impl DataFormat {
    /// Bytes needed to carry `words` sample words
    pub fn bytes_for(&self, words: usize) -> usize {
        match self {
            DataFormat::Packed12 => (words * 3).div_ceil(2),
            DataFormat::Raw16 => words * 2,
        }
    }
}

/// One `(address, count)` element of a readout descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadoutEntry {
    pub address: u32,
    /// Number of words read starting at `address`
    pub count: u32,
}

impl ReadoutEntry {
    pub fn new(address: u32, count: u32) -> Self {
        Self { address, count }
    }
}

/// What the board reads autonomously for one data channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSettings {
    pub format: DataFormat,
    /// Read in order for every record
    pub readout: Vec<ReadoutEntry>,
    /// Records per slice
    pub repetitions: u32,
    pub slice_bytes: usize,
}

impl DataSettings {
    /// Settings whose slices each hold exactly `repetitions` records
    pub fn new(format: DataFormat, readout: Vec<ReadoutEntry>, repetitions: u32) -> Self {
        let mut settings = Self {
            format,
            readout,
            repetitions: repetitions.max(1),
            slice_bytes: 0,
        };
        settings.slice_bytes = settings.record_bytes() * settings.repetitions as usize;
        settings
    }

    pub fn with_slice_bytes(mut self, slice_bytes: usize) -> Self {
        self.slice_bytes = slice_bytes;
        self
    }

    /// Words in one execution of the readout descriptor
    pub fn record_words(&self) -> usize {
        self.readout.iter().map(|e| e.count as usize).sum()
    }

    pub fn record_bytes(&self) -> usize {
        self.format.bytes_for(self.record_words())
    }
}

/// Baseboard firmware version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub major: u16,
    pub minor: u16,
    pub revision: u16,
    pub description: String,
}

impl FirmwareInfo {
    pub fn new(major: u16, minor: u16, revision: u16, description: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            revision,
            description: description.into(),
        }
    }

    pub fn version(&self) -> (u16, u16, u16) {
        (self.major, self.minor, self.revision)
    }

    /// Fail with `firmware_version_not_supported` below `minimum`
    pub fn require(&self, minimum: (u16, u16, u16)) -> Result<()> {
        if self.version() < minimum {
            return Err(RadarError::FirmwareVersionNotSupported(format!(
                "{} is older than {}.{}.{}",
                self,
                minimum.0,
                minimum.1,
                minimum.2
            )));
        }
        Ok(())
    }
}

impl fmt::Display for FirmwareInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Discovery entry for one baseboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Sensor family or variant name, e.g. `"BGT60TR13C"`
    pub sensor_type: String,
    pub board_type: String,
    /// Canonical 36 character UUID
    pub uuid: String,
    pub port: String,
}

impl fmt::Display for BoardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({}) - {}",
            self.sensor_type, self.board_type, self.port, self.uuid
        )
    }
}

/// How to pick a board during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardSelector {
    First,
    Uuid(String),
    Port(String),
}

impl BoardSelector {
    pub fn matches(&self, info: &BoardInfo) -> bool {
        match self {
            BoardSelector::First => true,
            BoardSelector::Uuid(uuid) => info.uuid.eq_ignore_ascii_case(uuid),
            BoardSelector::Port(port) => &info.port == port,
        }
    }
}

/// Unblocks a pending [`Transport::get_frame`] from another thread
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Sender<()>,
}

impl CancelHandle {
    /// Create a handle and the receiver a transport waits on
    pub fn new() -> (Self, Receiver<()>) {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        (Self { sender }, receiver)
    }

    pub fn cancel(&self) {
        // one pending token is enough to wake the waiter
        let _ = self.sender.try_send(());
    }
}

/// Link to one baseboard
///
/// Implementations must be `Send` so a device can be moved to the thread
/// that drives acquisition.
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    fn board_info(&self) -> BoardInfo;

    fn firmware_info(&self) -> FirmwareInfo;

    fn read_register(&mut self, address: u32) -> Result<u32>;

    fn write_register(&mut self, address: u32, value: u32) -> Result<()>;

    /// Read `count` consecutive registers
    fn read_burst(&mut self, address: u32, count: usize) -> Result<Vec<u32>>;

    /// Write consecutive registers starting at `address`
    fn write_burst(&mut self, address: u32, values: &[u32]) -> Result<()>;

    /// Set the readout descriptor and slice size of a data channel
    fn configure_data(&mut self, channel: u8, settings: &DataSettings) -> Result<()>;

    fn start(&mut self, channel: u8) -> Result<()>;

    fn stop(&mut self, channel: u8) -> Result<()>;

    fn start_streaming(&mut self) -> Result<()>;

    /// Stop streaming and discard queued slices
    fn stop_streaming(&mut self) -> Result<()>;

    /// Wait at most `timeout` for the next slice
    ///
    /// Returns `Ok(None)` on timeout and `Err(Communication)` when cancelled.
    fn get_frame(&mut self, timeout: Duration) -> Result<Option<Slice>>;

    fn set_frame_buffer_size(&mut self, bytes: usize) -> Result<()>;

    fn set_frame_queue_size(&mut self, slices: usize) -> Result<()>;

    fn cancel_handle(&self) -> Option<CancelHandle>;

    fn stats(&self) -> TransportStats;

    fn reset_stats(&mut self);
}

/// Register view of a transport with fixed address and value widths
pub struct RegisterAccessor<'t> {
    transport: &'t mut dyn Transport,
}

impl<'t> RegisterAccessor<'t> {
    pub fn new(transport: &'t mut dyn Transport) -> Self {
        Self { transport }
    }
}

fn narrow_read<V: RegisterWord>(address: u32, raw: u32) -> Result<V> {
    V::from_u32(raw).ok_or_else(|| {
        RadarError::Communication(format!(
            "register 0x{:X} returned 0x{:X}, wider than {} bits",
            address,
            raw,
            V::BITS
        ))
    })
}

impl<'t, A: RegisterWord, V: RegisterWord> RegisterAccess<A, V> for RegisterAccessor<'t> {
    fn read(&mut self, address: A) -> Result<V> {
        let address = address.to_u32();
        let raw = self.transport.read_register(address)?;
        narrow_read(address, raw)
    }

    fn write(&mut self, address: A, value: V) -> Result<()> {
        self.transport.write_register(address.to_u32(), value.to_u32())
    }

    fn read_burst(&mut self, address: A, count: usize) -> Result<Vec<V>> {
        let address = address.to_u32();
        self.transport
            .read_burst(address, count)?
            .into_iter()
            .map(|raw| narrow_read(address, raw))
            .collect()
    }

    fn write_burst(&mut self, address: A, values: &[V]) -> Result<()> {
        let values: Vec<u32> = values.iter().map(|v| v.to_u32()).collect();
        self.transport.write_burst(address.to_u32(), &values)
    }
}

/// Source of baseboards
pub trait TransportProvider {
    fn list(&self) -> Vec<BoardInfo>;

    fn open(&self, selector: &BoardSelector) -> Result<Box<dyn Transport>>;

    fn open_by_uuid(&self, uuid: &str) -> Result<Box<dyn Transport>> {
        self.open(&BoardSelector::Uuid(uuid.to_string()))
    }

    fn open_by_port(&self, port: &str) -> Result<Box<dyn Transport>> {
        self.open(&BoardSelector::Port(port.to_string()))
    }
}

/// Check the canonical `xxxxxxxx-xxxx-Mxxx-Nxxx-xxxxxxxxxxxx` form
pub fn is_canonical_uuid(text: &str) -> bool {
    text.len() == 36 && uuid::Uuid::parse_str(text).is_ok() && text.chars().filter(|&c| c == '-').count() == 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_remaining() {
        let mut slice = Slice::new(vec![1, 2, 3, 4], SliceStatus::Ok, 10);
        assert_eq!(slice.remaining(), 4);
        slice.cursor = 3;
        assert_eq!(slice.remaining(), 1);
        assert_eq!(slice.unread(), &[4]);
        slice.cursor = 9;
        assert_eq!(slice.remaining(), 0);
        assert!(slice.unread().is_empty());
    }

    #[test]
    fn test_data_settings_sizes() {
        let ltr = DataSettings::new(
            DataFormat::Raw16,
            vec![
                ReadoutEntry::new(0x28, 2),
                ReadoutEntry::new(0x38, 1),
                ReadoutEntry::new(0xFF, 1),
            ],
            256,
        );
        assert_eq!(ltr.record_bytes(), 8);
        assert_eq!(ltr.slice_bytes, 2048);

        let fifo = DataSettings::new(DataFormat::Packed12, vec![ReadoutEntry::new(0x60, 4096)], 1);
        assert_eq!(fifo.slice_bytes, 6144);
        assert_eq!(DataFormat::Packed12.bytes_for(3), 5);
    }

    #[test]
    fn test_firmware_minimum() {
        let fw = FirmwareInfo::new(2, 5, 3, "Radar Baseboard MCU7");
        assert!(fw.require((2, 5, 3)).is_ok());
        let err = fw.require((2, 5, 4)).unwrap_err();
        assert!(matches!(err, RadarError::FirmwareVersionNotSupported(_)));
        assert_eq!(fw.to_string(), "2.5.3");
    }

    #[test]
    fn test_selector_matching() {
        let info = BoardInfo {
            sensor_type: "BGT60TR13C".to_string(),
            board_type: "MCU7".to_string(),
            uuid: "0a1b2c3d-0000-4000-8000-000000000001".to_string(),
            port: "/dev/ttyACM0".to_string(),
        };
        assert!(BoardSelector::First.matches(&info));
        assert!(BoardSelector::Uuid("0A1B2C3D-0000-4000-8000-000000000001".to_string()).matches(&info));
        assert!(!BoardSelector::Port("/dev/ttyACM1".to_string()).matches(&info));
        assert!(is_canonical_uuid(&info.uuid));
        assert!(!is_canonical_uuid("0a1b2c3d000040008000000000000001"));
    }

    #[test]
    fn test_accessor_narrows_reads() {
        let mut transport = MockTransport::new();
        transport.expect_read_register().returning(|_| Ok(0x1_0000));
        let mut accessor = RegisterAccessor::new(&mut transport);
        let result: Result<u16> = RegisterAccess::<u16, u16>::read(&mut accessor, 0x10);
        assert!(matches!(result, Err(RadarError::Communication(_))));
    }

    #[test]
    fn test_cancel_handle_wakes_receiver() {
        let (handle, receiver) = CancelHandle::new();
        handle.cancel();
        handle.cancel();
        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }
}
