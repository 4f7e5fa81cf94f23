//! Software baseboard for testing without hardware
//!
//! [`MockBoard`] implements [`Transport`] on top of a register memory and a
//! producer thread that harvests the configured readout descriptor into
//! slices, the way a real baseboard drains the sensor autonomously.
//!
//! # Features
//!
//! - **Register memory**: reads return the last written value, or a preset
//! - **Sample sources**: address ranges (or a FIFO address) that return
//!   generated sample words of a given bit width instead of register values
//! - **Bounded queue**: a full queue drops the slice and marks the next
//!   delivered one [`SliceStatus::QueueTrimmed`]
//! - **Status injection**: force the status of upcoming slices
//! - **Virtual time**: slice timestamps advance by a fixed step per tick and
//!   keep counting across restarts
//!
//! # Example
//!
//! ```ignore
//! use mmradar_rs::transport::mock::{MockBoard, MockSamplePattern};
//!
//! let board = MockBoard::avian("BGT60TR13C")
//!     .with_slice_interval(Duration::from_millis(5))
//!     .with_pattern(MockSamplePattern::Constant(0.5));
//! let control = board.control();
//! let device = Device::open_transport(Box::new(board))?;
//! control.inject_status(SliceStatus::FifoOverflow);
//! ```
//!
//! # Enabling
//!
//! The software baseboard is only available with the `mock-board` feature
//! (on by default):
//!
//! ```bash
//! cargo test --features mock-board
//! ```

use super::{
    BoardInfo, BoardSelector, CancelHandle, DataFormat, DataSettings, FirmwareInfo, Slice, SliceStatus, Transport,
    TransportProvider, TransportStats,
};
use crate::error::{RadarError, Result};
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Default time between producer ticks
pub const DEFAULT_SLICE_INTERVAL: Duration = Duration::from_millis(2);

/// Default virtual time between ticks in microseconds
pub const DEFAULT_TIMESTAMP_STEP_US: u64 = 1000;

/// Default slice queue depth
pub const DEFAULT_QUEUE_SIZE: usize = 16;

/// Pattern for generating sample words, in full-scale units `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockSamplePattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments once per word
    Counter { step: f64, min: f64, max: f64 },
    /// Random values within range
    Random { min: f64, max: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave around mid-scale
    Square { period: f64, amplitude: f64 },
    /// Triangle wave around mid-scale
    Triangle { period: f64, amplitude: f64 },
}

impl Default for MockSamplePattern {
    fn default() -> Self {
        MockSamplePattern::Sine {
            frequency: 1000.0,
            amplitude: 0.4,
            offset: 0.5,
        }
    }
}

/// Sample generator state for one board
#[derive(Debug, Clone)]
pub struct MockSampleGenerator {
    pub pattern: MockSamplePattern,
    /// Current counter value (for Counter pattern)
    counter_value: f64,
    /// Noise amplitude to add (0.0 = no noise)
    pub noise_amplitude: f64,
}

impl MockSampleGenerator {
    pub fn new(pattern: MockSamplePattern) -> Self {
        Self {
            pattern,
            counter_value: 0.0,
            noise_amplitude: 0.0,
        }
    }

    /// Add noise to the generated values
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise_amplitude = amplitude;
        self
    }

    /// Generate a value in `[0, 1]` for the given virtual time
    pub fn generate_value(&mut self, elapsed_secs: f64) -> f64 {
        let base_value = match self.pattern {
            MockSamplePattern::Constant(v) => v,
            MockSamplePattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            MockSamplePattern::Counter { step, min, max } => {
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                self.counter_value
            }
            MockSamplePattern::Random { min, max } => min + rand_simple() * (max - min),
            MockSamplePattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            MockSamplePattern::Square { period, amplitude } => {
                let t = elapsed_secs % period;
                if t < period / 2.0 {
                    0.5 + amplitude / 2.0
                } else {
                    0.5 - amplitude / 2.0
                }
            }
            MockSamplePattern::Triangle { period, amplitude } => {
                let t = elapsed_secs % period;
                let half = period / 2.0;
                let unit = if t < half {
                    2.0 * t / half - 1.0
                } else {
                    1.0 - 2.0 * (t - half) / half
                };
                0.5 + unit * amplitude / 2.0
            }
        };

        let value = if self.noise_amplitude > 0.0 {
            base_value + (rand_simple() - 0.5) * 2.0 * self.noise_amplitude
        } else {
            base_value
        };
        value.clamp(0.0, 1.0)
    }

    /// Generate one word of `bits` width
    pub fn generate_word(&mut self, elapsed_secs: f64, bits: u32) -> u32 {
        let full_scale = ((1u64 << bits) - 1) as f64;
        (self.generate_value(elapsed_secs) * full_scale).round() as u32
    }
}

/// Simple pseudo-random number generator (no external dependency)
fn rand_simple() -> f64 {
    use std::cell::Cell;
    thread_local! {
        static SEED: Cell<u64> = Cell::new(12345);
    }
    SEED.with(|seed| {
        let mut s = seed.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        seed.set(s);
        (s as f64) / (u64::MAX as f64)
    })
}

/// Address region that returns generated samples instead of register memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSource {
    pub start: u32,
    /// Number of addresses covered
    pub len: u32,
    /// Width of each sample word
    pub bits: u32,
    /// Every word of a burst comes from `start`, as with a FIFO port
    pub fifo: bool,
}

impl SampleSource {
    fn contains(&self, address: u32) -> bool {
        address >= self.start && address < self.start + self.len
    }
}

#[derive(Debug, Clone, Default)]
struct ChannelState {
    settings: Option<DataSettings>,
    started: bool,
}

/// Everything shared between the board handle and its producer thread
#[derive(Debug)]
struct BoardState {
    registers: HashMap<u32, u32>,
    channels: BTreeMap<u8, ChannelState>,
    sources: Vec<SampleSource>,
    generator: MockSampleGenerator,
    timestamp_us: u64,
    timestamp_step_us: u64,
    injected: VecDeque<SliceStatus>,
    trim_pending: bool,
    /// Register incremented once per producer tick
    counter_register: Option<u32>,
    link_down: bool,
    /// Write transactions accepted before the link drops
    writes_before_failure: Option<usize>,
    write_log: Vec<(u32, u32)>,
    slices_produced: u64,
    slices_trimmed: u64,
}

impl BoardState {
    fn new() -> Self {
        Self {
            registers: HashMap::new(),
            channels: BTreeMap::new(),
            sources: Vec::new(),
            generator: MockSampleGenerator::new(MockSamplePattern::default()),
            timestamp_us: 0,
            timestamp_step_us: DEFAULT_TIMESTAMP_STEP_US,
            injected: VecDeque::new(),
            trim_pending: false,
            counter_register: None,
            link_down: false,
            writes_before_failure: None,
            write_log: Vec::new(),
            slices_produced: 0,
            slices_trimmed: 0,
        }
    }

    fn check_link(&self) -> Result<()> {
        if self.link_down {
            return Err(RadarError::Communication("mock board link is down".to_string()));
        }
        Ok(())
    }

    fn check_write(&mut self) -> Result<()> {
        self.check_link()?;
        match self.writes_before_failure {
            Some(0) => {
                self.link_down = true;
                self.writes_before_failure = None;
                self.check_link()
            }
            Some(n) => {
                self.writes_before_failure = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn read_words(&mut self, address: u32, count: usize) -> Vec<u32> {
        let elapsed = self.timestamp_us as f64 * 1e-6;
        let fifo = self.sources.iter().find(|s| s.fifo && s.start == address).copied();
        (0..count)
            .map(|i| {
                let t = elapsed + i as f64 * 1e-6;
                if let Some(source) = fifo {
                    return self.generator.generate_word(t, source.bits);
                }
                let current = address + i as u32;
                match self.sources.iter().find(|s| !s.fifo && s.contains(current)) {
                    Some(source) => {
                        let bits = source.bits;
                        self.generator.generate_word(t, bits)
                    }
                    None => self.registers.get(&current).copied().unwrap_or(0),
                }
            })
            .collect()
    }

    /// Harvest one slice for a started channel
    fn harvest(&mut self, settings: &DataSettings) -> Vec<u8> {
        let record_bytes = settings.record_bytes().max(1);
        let records = (settings.slice_bytes / record_bytes).max(1);
        let mut words = Vec::with_capacity(settings.record_words() * records);
        for _ in 0..records {
            for entry in &settings.readout {
                let chunk = self.read_words(entry.address, entry.count as usize);
                words.extend(chunk);
            }
        }
        encode_words(settings.format, &words)
    }

    fn next_status(&mut self) -> SliceStatus {
        if let Some(status) = self.injected.pop_front() {
            return status;
        }
        if self.trim_pending {
            self.trim_pending = false;
            return SliceStatus::QueueTrimmed;
        }
        SliceStatus::Ok
    }

    /// One producer tick: a slice per started channel, in channel order
    fn tick(&mut self, queue: &Sender<Slice>) {
        let started: Vec<(u8, DataSettings)> = self
            .channels
            .iter()
            .filter(|(_, c)| c.started)
            .filter_map(|(&ch, c)| c.settings.clone().map(|s| (ch, s)))
            .collect();
        if started.is_empty() {
            return;
        }

        for (channel, settings) in started {
            let data = self.harvest(&settings);
            let status = self.next_status();
            let slice = Slice::new(data, status, self.timestamp_us).with_channel(channel);
            match queue.try_send(slice) {
                Ok(()) => self.slices_produced += 1,
                Err(TrySendError::Full(_)) => {
                    self.trim_pending = true;
                    self.slices_trimmed += 1;
                    tracing::trace!("Mock board queue full, slice dropped");
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }

        if let Some(address) = self.counter_register {
            let value = self.registers.entry(address).or_insert(0);
            *value = value.wrapping_add(1) & 0xFFFF;
        }
        self.timestamp_us += self.timestamp_step_us;
    }
}

/// Pack sample words in the wire format of a data channel
pub fn encode_words(format: DataFormat, words: &[u32]) -> Vec<u8> {
    match format {
        DataFormat::Raw16 => words.iter().flat_map(|&w| (w as u16).to_le_bytes()).collect(),
        DataFormat::Packed12 => {
            let mut bytes = Vec::with_capacity(format.bytes_for(words.len()));
            for pair in words.chunks(2) {
                let s0 = pair[0] & 0xFFF;
                let s1 = pair.get(1).copied().unwrap_or(0) & 0xFFF;
                bytes.push((s0 >> 4) as u8);
                bytes.push((((s0 & 0xF) << 4) | (s1 >> 8)) as u8);
                if pair.len() == 2 {
                    bytes.push((s1 & 0xFF) as u8);
                }
            }
            bytes
        }
    }
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for steering a [`MockBoard`] after it was handed to a device
#[derive(Debug, Clone)]
pub struct MockBoardControl {
    state: Arc<Mutex<BoardState>>,
}

impl MockBoardControl {
    /// Force the status of the next produced slice
    pub fn inject_status(&self, status: SliceStatus) {
        lock(&self.state).injected.push_back(status);
    }

    pub fn set_register(&self, address: u32, value: u32) {
        lock(&self.state).registers.insert(address, value);
    }

    pub fn register(&self, address: u32) -> Option<u32> {
        lock(&self.state).registers.get(&address).copied()
    }

    /// Make every register and streaming call fail with a communication error
    pub fn set_link_down(&self, down: bool) {
        lock(&self.state).link_down = down;
    }

    /// Drop the link after `transactions` more register or burst writes
    pub fn fail_writes_after(&self, transactions: usize) {
        lock(&self.state).writes_before_failure = Some(transactions);
    }

    /// Register writes seen so far, in order
    pub fn writes(&self) -> Vec<(u32, u32)> {
        lock(&self.state).write_log.clone()
    }

    pub fn clear_writes(&self) {
        lock(&self.state).write_log.clear();
    }

    pub fn set_pattern(&self, pattern: MockSamplePattern) {
        lock(&self.state).generator = MockSampleGenerator::new(pattern);
    }

    /// Slices dropped because the queue was full
    pub fn slices_trimmed(&self) -> u64 {
        lock(&self.state).slices_trimmed
    }

    pub fn slices_produced(&self) -> u64 {
        lock(&self.state).slices_produced
    }

    pub fn channel_settings(&self, channel: u8) -> Option<DataSettings> {
        lock(&self.state)
            .channels
            .get(&channel)
            .and_then(|c| c.settings.clone())
    }
}

struct Producer {
    running: Arc<AtomicBool>,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Software baseboard
pub struct MockBoard {
    info: BoardInfo,
    firmware: FirmwareInfo,
    state: Arc<Mutex<BoardState>>,
    slice_interval: Duration,
    queue_size: usize,
    frame_buffer_size: usize,
    queue: Option<Receiver<Slice>>,
    producer: Option<Producer>,
    cancel: CancelHandle,
    cancel_rx: Receiver<()>,
    stats: TransportStats,
}

impl MockBoard {
    /// Create a board reporting the given sensor type
    pub fn new(sensor_type: impl Into<String>) -> Self {
        let (cancel, cancel_rx) = CancelHandle::new();
        Self {
            info: BoardInfo {
                sensor_type: sensor_type.into(),
                board_type: "MockBoard".to_string(),
                uuid: uuid::Uuid::new_v4().to_string(),
                port: "mock0".to_string(),
            },
            firmware: FirmwareInfo::new(2, 5, 4, "Mock Radar Baseboard"),
            state: Arc::new(Mutex::new(BoardState::new())),
            slice_interval: DEFAULT_SLICE_INTERVAL,
            queue_size: DEFAULT_QUEUE_SIZE,
            frame_buffer_size: 0,
            queue: None,
            producer: None,
            cancel,
            cancel_rx,
            stats: TransportStats::default(),
        }
    }

    /// Avian FMCW board with the FIFO port at 0x60 and a room-temperature SADC
    pub fn avian(variant: &str) -> Self {
        Self::new(variant)
            .with_fifo_source(0x60, 12)
            .with_register(0x02, 0x0307)
            .with_register(0x5E, 728)
    }

    /// Avian board driven in continuous-wave mode
    pub fn cw(variant: &str) -> Self {
        Self::avian(variant)
    }

    /// LTR11 board outside the Japan band with motion detected
    pub fn ltr11() -> Self {
        Self::new("BGT60LTR11AIP")
            .with_sample_source(0x28, 2, 10)
            .with_register(0x37, 0x8000)
            .with_register(0x38, 0x0100)
            .with_register(0xFF, 0b01)
    }

    /// Mimose board, A2 silicon, with AFC and AOC status presets
    pub fn mimose() -> Self {
        let mut board = Self::new("BGT24ATR22")
            .with_sample_source(crate::registers::layouts::MIMOSE_RAW_MEMORY, 0x500, 12)
            .with_register(0x0002, 0x0001)
            .with_register(0x002A, 114)
            .with_register(0x002B, 9074)
            .with_register(0x002C, 0);
        // I offsets negative, Q offsets positive
        for pc in 0..4u32 {
            board = board
                .with_register(0x00A1 + 2 * pc, 0x1F0 - pc)
                .with_register(0x00A2 + 2 * pc, 0x010 + pc);
        }
        lock(&board.state).counter_register = Some(0x00F2);
        board
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.info.uuid = uuid.into();
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.info.port = port.into();
        self
    }

    pub fn with_firmware(mut self, major: u16, minor: u16, revision: u16) -> Self {
        self.firmware = FirmwareInfo::new(major, minor, revision, self.firmware.description.clone());
        self
    }

    /// Set the wall-clock time between producer ticks
    pub fn with_slice_interval(mut self, interval: Duration) -> Self {
        self.slice_interval = interval;
        self
    }

    /// Set the virtual time between ticks
    pub fn with_timestamp_step_us(self, step_us: u64) -> Self {
        lock(&self.state).timestamp_step_us = step_us;
        self
    }

    pub fn with_register(self, address: u32, value: u32) -> Self {
        lock(&self.state).registers.insert(address, value);
        self
    }

    pub fn with_pattern(self, pattern: MockSamplePattern) -> Self {
        lock(&self.state).generator = MockSampleGenerator::new(pattern);
        self
    }

    pub fn with_generator(self, generator: MockSampleGenerator) -> Self {
        lock(&self.state).generator = generator;
        self
    }

    /// Serve generated words for `len` consecutive addresses from `start`
    pub fn with_sample_source(self, start: u32, len: u32, bits: u32) -> Self {
        lock(&self.state).sources.push(SampleSource {
            start,
            len,
            bits,
            fifo: false,
        });
        self
    }

    /// Serve generated words for every word of a burst at `address`
    pub fn with_fifo_source(self, address: u32, bits: u32) -> Self {
        lock(&self.state).sources.push(SampleSource {
            start: address,
            len: 1,
            bits,
            fifo: true,
        });
        self
    }

    pub fn control(&self) -> MockBoardControl {
        MockBoardControl {
            state: Arc::clone(&self.state),
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn frame_buffer_size(&self) -> usize {
        self.frame_buffer_size
    }

    pub fn is_streaming(&self) -> bool {
        self.producer.is_some()
    }

    fn spawn_producer(&mut self) -> Receiver<Slice> {
        let (tx, rx) = bounded(self.queue_size.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::clone(&self.state);
        let interval = self.slice_interval;
        let flag = Arc::clone(&running);

        let handle = std::thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => lock(&state).tick(&tx),
                    _ => break,
                }
            }
        });

        self.producer = Some(Producer {
            running,
            stop_tx,
            handle,
        });
        rx
    }

    fn join_producer(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.running.store(false, Ordering::Relaxed);
            let _ = producer.stop_tx.try_send(());
            if producer.handle.join().is_err() {
                tracing::warn!("Mock board producer thread panicked");
            }
        }
    }
}

impl Drop for MockBoard {
    fn drop(&mut self) {
        self.join_producer();
    }
}

impl Transport for MockBoard {
    fn board_info(&self) -> BoardInfo {
        self.info.clone()
    }

    fn firmware_info(&self) -> FirmwareInfo {
        self.firmware.clone()
    }

    fn read_register(&mut self, address: u32) -> Result<u32> {
        let mut state = lock(&self.state);
        state.check_link()?;
        let value = state.read_words(address, 1)[0];
        drop(state);
        self.stats.record_read(1);
        Ok(value)
    }

    fn write_register(&mut self, address: u32, value: u32) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_write()?;
        state.registers.insert(address, value);
        state.write_log.push((address, value));
        drop(state);
        self.stats.record_write(1);
        Ok(())
    }

    fn read_burst(&mut self, address: u32, count: usize) -> Result<Vec<u32>> {
        let mut state = lock(&self.state);
        state.check_link()?;
        let values = state.read_words(address, count);
        drop(state);
        self.stats.record_read(count);
        Ok(values)
    }

    fn write_burst(&mut self, address: u32, values: &[u32]) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_write()?;
        for (i, &value) in values.iter().enumerate() {
            let current = address + i as u32;
            state.registers.insert(current, value);
            state.write_log.push((current, value));
        }
        drop(state);
        self.stats.record_write(values.len());
        Ok(())
    }

    fn configure_data(&mut self, channel: u8, settings: &DataSettings) -> Result<()> {
        if settings.readout.is_empty() {
            return Err(RadarError::ArgumentInvalid("empty readout descriptor".to_string()));
        }
        let mut state = lock(&self.state);
        state.check_link()?;
        state.channels.entry(channel).or_default().settings = Some(settings.clone());
        tracing::debug!(
            "Mock board channel {} configured: {} words per record, {} byte slices",
            channel,
            settings.record_words(),
            settings.slice_bytes
        );
        Ok(())
    }

    fn start(&mut self, channel: u8) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_link()?;
        let entry = state.channels.entry(channel).or_default();
        if entry.settings.is_none() {
            return Err(RadarError::NotConfigured);
        }
        entry.started = true;
        Ok(())
    }

    fn stop(&mut self, channel: u8) -> Result<()> {
        let mut state = lock(&self.state);
        state.check_link()?;
        if let Some(entry) = state.channels.get_mut(&channel) {
            entry.started = false;
        }
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        lock(&self.state).check_link()?;
        if self.producer.is_some() {
            return Ok(());
        }
        // drain a stale cancel token
        while self.cancel_rx.try_recv().is_ok() {}
        let rx = self.spawn_producer();
        self.queue = Some(rx);
        tracing::debug!("Mock board streaming, queue depth {}", self.queue_size);
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        self.join_producer();
        self.queue = None;
        let mut state = lock(&self.state);
        state.trim_pending = false;
        state.check_link()
    }

    fn get_frame(&mut self, timeout: Duration) -> Result<Option<Slice>> {
        let started = Instant::now();
        let slice = match self.queue.as_ref() {
            Some(queue) => select! {
                recv(queue) -> msg => msg.ok(),
                recv(self.cancel_rx) -> _ => {
                    return Err(RadarError::Communication("wait cancelled".to_string()));
                }
                default(timeout) => None,
            },
            None => select! {
                recv(self.cancel_rx) -> _ => {
                    return Err(RadarError::Communication("wait cancelled".to_string()));
                }
                default(timeout) => None,
            },
        };

        match slice {
            Some(slice) => {
                let wait_us = started.elapsed().as_micros() as u64;
                self.stats.record_slice(wait_us, slice.len() as u64, slice.status);
                Ok(Some(slice))
            }
            None => {
                self.stats.record_timeout();
                Ok(None)
            }
        }
    }

    fn set_frame_buffer_size(&mut self, bytes: usize) -> Result<()> {
        self.frame_buffer_size = bytes;
        Ok(())
    }

    fn set_frame_queue_size(&mut self, slices: usize) -> Result<()> {
        if slices == 0 {
            return Err(RadarError::ArgumentOutOfBounds("queue size must be at least 1".to_string()));
        }
        self.queue_size = slices;
        Ok(())
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        Some(self.cancel.clone())
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }
}

/// Factory for one mock board, in the shape of a board enumerator
type BoardFactory = Box<dyn Fn() -> MockBoard + Send + Sync>;

/// Enumerates a fixed set of software baseboards
#[derive(Default)]
pub struct MockBoardProvider {
    boards: Vec<(BoardInfo, BoardFactory)>,
}

impl MockBoardProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a board; the factory runs on every `open`
    pub fn with_board<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> MockBoard + Send + Sync + 'static,
    {
        let info = factory().board_info();
        self.boards.push((info, Box::new(factory)));
        self
    }

    /// One board of every sensor family
    pub fn standard() -> Self {
        Self::new()
            .with_board(|| {
                MockBoard::avian("BGT60TR13C")
                    .with_uuid("00000000-0000-4000-8000-000000000001")
                    .with_port("mock0")
            })
            .with_board(|| {
                MockBoard::ltr11()
                    .with_uuid("00000000-0000-4000-8000-000000000002")
                    .with_port("mock1")
            })
            .with_board(|| {
                MockBoard::mimose()
                    .with_uuid("00000000-0000-4000-8000-000000000003")
                    .with_port("mock2")
            })
    }
}

impl TransportProvider for MockBoardProvider {
    fn list(&self) -> Vec<BoardInfo> {
        self.boards.iter().map(|(info, _)| info.clone()).collect()
    }

    fn open(&self, selector: &BoardSelector) -> Result<Box<dyn Transport>> {
        let (_, factory) = self
            .boards
            .iter()
            .find(|(info, _)| selector.matches(info))
            .ok_or(RadarError::NoDevice)?;
        Ok(Box::new(factory()))
    }
}

/// Information about available mock boards
pub fn list_mock_boards() -> Vec<BoardInfo> {
    MockBoardProvider::standard().list()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReadoutEntry;

    fn fifo_settings(words: u32) -> DataSettings {
        DataSettings::new(DataFormat::Packed12, vec![ReadoutEntry::new(0x60, words)], 1)
    }

    #[test]
    fn test_register_memory() {
        let mut board = MockBoard::new("BGT60TR13C").with_register(0x10, 0xABC);
        assert_eq!(board.read_register(0x10).unwrap(), 0xABC);
        assert_eq!(board.read_register(0x11).unwrap(), 0);
        board.write_burst(0x20, &[1, 2, 3]).unwrap();
        assert_eq!(board.read_burst(0x20, 3).unwrap(), vec![1, 2, 3]);
        assert_eq!(board.control().writes().len(), 3);
        assert_eq!(board.stats().burst_transactions, 2);
    }

    #[test]
    fn test_packed12_encoding() {
        let bytes = encode_words(DataFormat::Packed12, &[0xABC, 0x123]);
        assert_eq!(bytes, vec![0xAB, 0xC1, 0x23]);
        let bytes = encode_words(DataFormat::Raw16, &[0x3FC]);
        assert_eq!(bytes, vec![0xFC, 0x03]);
    }

    #[test]
    fn test_fifo_source_fills_whole_burst() {
        let mut board = MockBoard::avian("BGT60TR13C").with_pattern(MockSamplePattern::Constant(1.0));
        let words = board.read_burst(0x60, 4).unwrap();
        assert_eq!(words, vec![0xFFF; 4]);
        // the next address is ordinary memory
        assert_eq!(board.read_register(0x61).unwrap(), 0);
    }

    #[test]
    fn test_streaming_delivers_slices_in_order() {
        let mut board = MockBoard::avian("BGT60TR13C").with_slice_interval(Duration::from_millis(1));
        board.configure_data(0, &fifo_settings(64)).unwrap();
        board.start(0).unwrap();
        board.start_streaming().unwrap();

        let mut last = None;
        for _ in 0..5 {
            let slice = board.get_frame(Duration::from_secs(1)).unwrap().unwrap();
            assert_eq!(slice.len(), 96);
            assert_eq!(slice.status, SliceStatus::Ok);
            if let Some(prev) = last {
                assert_eq!(slice.timestamp_us, prev + DEFAULT_TIMESTAMP_STEP_US);
            }
            last = Some(slice.timestamp_us);
        }
        board.stop_streaming().unwrap();
        assert_eq!(board.stats().slices_received, 5);
    }

    #[test]
    fn test_full_queue_marks_next_slice_trimmed() {
        let mut board = MockBoard::avian("BGT60TR13C").with_slice_interval(Duration::from_millis(1));
        board.set_frame_queue_size(1).unwrap();
        board.configure_data(0, &fifo_settings(16)).unwrap();
        board.start(0).unwrap();
        board.start_streaming().unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let first = board.get_frame(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(first.status, SliceStatus::Ok);
        let second = board.get_frame(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(second.status, SliceStatus::QueueTrimmed);
        assert!(board.control().slices_trimmed() > 0);
        board.stop_streaming().unwrap();
    }

    #[test]
    fn test_injected_status() {
        let mut board = MockBoard::avian("BGT60TR13C").with_slice_interval(Duration::from_millis(1));
        board.control().inject_status(SliceStatus::FifoOverflow);
        board.configure_data(0, &fifo_settings(16)).unwrap();
        board.start(0).unwrap();
        board.start_streaming().unwrap();
        let slice = board.get_frame(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(slice.status, SliceStatus::FifoOverflow);
    }

    #[test]
    fn test_timeout_without_streaming() {
        let mut board = MockBoard::new("BGT60TR13C");
        let started = Instant::now();
        assert!(board.get_frame(Duration::from_millis(20)).unwrap().is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(board.stats().timeouts, 1);
    }

    #[test]
    fn test_cancel_unblocks_wait() {
        let mut board = MockBoard::new("BGT60TR13C");
        let cancel = board.cancel_handle().unwrap();
        let waiter = std::thread::spawn(move || board.get_frame(Duration::from_secs(10)));
        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(RadarError::Communication(_))));
    }

    #[test]
    fn test_link_down() {
        let mut board = MockBoard::new("BGT60TR13C");
        board.control().set_link_down(true);
        assert!(matches!(board.read_register(0), Err(RadarError::Communication(_))));
        assert!(board.write_register(0, 1).is_err());
    }

    #[test]
    fn test_provider_selects_by_uuid_and_port() {
        let provider = MockBoardProvider::standard();
        assert_eq!(provider.list().len(), 3);
        let board = provider.open_by_port("mock1").unwrap();
        assert_eq!(board.board_info().sensor_type, "BGT60LTR11AIP");
        let board = provider.open_by_uuid("00000000-0000-4000-8000-000000000003").unwrap();
        assert_eq!(board.board_info().sensor_type, "BGT24ATR22");
        assert!(matches!(
            provider.open_by_port("nope").err(),
            Some(RadarError::NoDevice)
        ));
    }

    #[test]
    fn test_pattern_values_stay_in_range() {
        let mut generator = MockSampleGenerator::new(MockSamplePattern::Sine {
            frequency: 10.0,
            amplitude: 2.0,
            offset: 0.5,
        })
        .with_noise(0.1);
        for i in 0..200 {
            let value = generator.generate_value(i as f64 * 1e-3);
            assert!((0.0..=1.0).contains(&value));
        }
        assert!(generator.generate_word(0.0, 10) <= 1023);
    }
}
