//! Acquisition controllers
//!
//! A [`Device`] owns one baseboard transport and one sensor profile. Every
//! family follows the same lifecycle:
//!
//! ```text
//! Ready --set_config--> Configured --start--> Active
//!   ^                    |  ^                   |
//!   |                    |  +-------stop--------+
//!   +------destroy-------+--------destroy-------+
//! ```
//!
//! `get_next_frame` on a configured device starts acquisition first.
//! Mutating operations are serialised by a mutex inside each device; board
//! and sensor information is captured at open time and readable at any
//! moment. [`RadarDevice::interrupt`] wakes a blocked `get_next_frame` from
//! another thread without taking the lock.
//!
//! # Components
//!
//! - [`FmcwDevice`] - Avian sensors running FMCW sequences
//! - [`CwDevice`] - Avian sensors in continuous-wave mode
//! - [`Ltr11Device`] - BGT60LTR11 pulsed Doppler sensor
//! - [`MimoseDevice`] - BGT24ATR22 pulsed sensor
//! - [`DummyDevice`] - Avian compiler without a board, for register export

pub mod cw;
pub mod dummy;
pub mod fmcw;
pub mod ltr11;
pub mod mimose;

pub use cw::CwDevice;
pub use dummy::DummyDevice;
pub use fmcw::FmcwDevice;
pub use ltr11::Ltr11Device;
pub use mimose::MimoseDevice;

use crate::config::DeviceOptions;
use crate::error::{RadarError, Result};
use crate::frame::Frame;
use crate::profile::avian::AvianVariant;
use crate::profile::{DataPlan, SensorFamily, SensorInfo, StatusPolicy};
use crate::reassembler::{RawFrame, Reassembler};
use crate::sequence::{CubeShape, Sequence};
use crate::transport::{
    BoardInfo, BoardSelector, CancelHandle, DataFormat, FirmwareInfo, RegisterAccessor, Transport, TransportProvider,
};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceState {
    /// Opened, nothing programmed
    Ready,
    /// Registers programmed, not streaming
    Configured,
    /// Streaming frames
    Active,
}

/// Capabilities shared by every sensor family
pub trait RadarDevice: Send + Sync {
    fn sensor_info(&self) -> SensorInfo;

    fn board_info(&self) -> BoardInfo;

    fn firmware_info(&self) -> FirmwareInfo;

    fn state(&self) -> DeviceState;

    /// Program a sequence; fails with `DeviceBusy` while streaming
    fn set_sequence(&self, sequence: &Sequence) -> Result<()>;

    /// The sequence the chip is running, read back from the registers
    fn sequence(&self) -> Result<Sequence>;

    /// Cube shapes of the frames `get_next_frame` returns
    fn frame_shape(&self) -> Result<Vec<CubeShape>>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    /// Wait for the next frame; `None` uses the family's default timeout
    fn get_next_frame(&self, timeout: Option<Duration>) -> Result<Frame>;

    /// Fill a caller-owned frame, which must already have the frame shape
    fn get_next_frame_into(&self, frame: &mut Frame, timeout: Option<Duration>) -> Result<()> {
        frame.check_shape(&self.frame_shape()?)?;
        let next = self.get_next_frame(timeout)?;
        frame.fill_from(&next)
    }

    /// Chip temperature in °C
    fn temperature(&self) -> Result<f64> {
        Err(RadarError::NotSupported("temperature sensor".to_string()))
    }

    /// Wake a `get_next_frame` blocked on the transport
    fn interrupt(&self);
}

/// Lock a device mutex, recovering the state of a panicked holder
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Device lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Values read from a board once, when it is opened
#[derive(Debug, Clone)]
pub(crate) struct BoardIdentity {
    pub board: BoardInfo,
    pub firmware: FirmwareInfo,
    pub cancel: Option<CancelHandle>,
}

impl BoardIdentity {
    /// Read the identity, rejecting firmware older than `minimum`
    pub fn read(transport: &dyn Transport, minimum: Option<(u16, u16, u16)>) -> Result<Self> {
        let board = transport.board_info();
        let firmware = transport.firmware_info();
        if let Some(minimum) = minimum {
            firmware.require(minimum)?;
        }
        tracing::info!("Opened {} (firmware {})", board, firmware);
        Ok(Self {
            board,
            firmware,
            cancel: transport.cancel_handle(),
        })
    }

    pub fn interrupt(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

/// The streaming half of a device: transport, data plan and reassembler
pub(crate) struct Link {
    transport: Box<dyn Transport>,
    state: DeviceState,
    policy: StatusPolicy,
    plan: Option<DataPlan>,
    reassembler: Option<Reassembler>,
    queue_override: Option<usize>,
}

impl Link {
    pub fn new(transport: Box<dyn Transport>, policy: StatusPolicy, options: &DeviceOptions) -> Self {
        Self {
            transport,
            state: DeviceState::Ready,
            policy,
            plan: None,
            reassembler: None,
            queue_override: options.frame_queue_size,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Register view of the transport
    pub fn io(&mut self) -> RegisterAccessor<'_> {
        RegisterAccessor::new(self.transport.as_mut())
    }

    /// Fail with `DeviceBusy` while streaming
    pub fn ensure_idle(&self) -> Result<()> {
        if self.state == DeviceState::Active {
            return Err(RadarError::DeviceBusy);
        }
        Ok(())
    }

    /// Adopt the data plan of a freshly programmed configuration
    pub fn configure(&mut self, plan: DataPlan) {
        tracing::debug!(
            "Data plan: {} channel(s), {} bytes per frame, queue {}",
            plan.channels.len(),
            plan.frame_bytes,
            plan.queue_size
        );
        self.reassembler = Some(Reassembler::new(plan.frame_bytes, self.policy));
        self.plan = Some(plan);
        if self.state == DeviceState::Ready {
            self.state = DeviceState::Configured;
        }
    }

    /// Forget the data plan after a failed reprogramming
    pub fn invalidate(&mut self) {
        self.plan = None;
        self.reassembler = None;
        if self.state == DeviceState::Configured {
            self.state = DeviceState::Ready;
        }
    }

    pub fn format(&self) -> DataFormat {
        self.plan.as_ref().map(DataPlan::format).unwrap_or_default()
    }

    /// Program the data channels and start streaming
    pub fn open_stream(&mut self) -> Result<()> {
        let plan = self.plan.as_ref().ok_or(RadarError::NotConfigured)?;
        let transport = self.transport.as_mut();
        for (channel, settings) in &plan.channels {
            transport.configure_data(*channel, settings)?;
        }
        transport.set_frame_buffer_size(plan.max_slice_bytes())?;
        transport.set_frame_queue_size(self.queue_override.unwrap_or(plan.queue_size))?;
        for (channel, _) in &plan.channels {
            transport.start(*channel)?;
        }
        transport.start_streaming()?;
        self.state = DeviceState::Active;
        tracing::info!("Streaming started");
        Ok(())
    }

    /// Stop streaming; every step runs even if an earlier one fails
    pub fn close_stream(&mut self) -> Result<()> {
        let mut first_error = None;
        let transport = self.transport.as_mut();
        if let Some(plan) = &self.plan {
            for (channel, _) in &plan.channels {
                if let Err(e) = transport.stop(*channel) {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Err(e) = transport.stop_streaming() {
            first_error.get_or_insert(e);
        }
        if let Some(reassembler) = self.reassembler.as_mut() {
            reassembler.reset();
        }
        if self.state == DeviceState::Active {
            self.state = DeviceState::Configured;
            tracing::info!("Streaming stopped");
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Reassemble the next raw frame
    pub fn next_raw(&mut self, timeout: Duration) -> Result<RawFrame> {
        let reassembler = self.reassembler.as_mut().ok_or(RadarError::NotConfigured)?;
        let frame = reassembler.next_frame(self.transport.as_mut(), timeout)?;
        tracing::trace!("Frame of {} bytes from {} slice(s)", frame.bytes.len(), frame.slices);
        Ok(frame)
    }

    /// Words of the next frame in the plan's format
    pub fn next_words(&mut self, timeout: Duration) -> Result<(Vec<u16>, u64)> {
        let format = self.format();
        let raw = self.next_raw(timeout)?;
        Ok((raw.words(format), raw.timestamp_us))
    }
}

/// Any opened radar device
pub enum Device {
    Fmcw(FmcwDevice),
    Cw(CwDevice),
    Ltr11(Ltr11Device),
    Mimose(MimoseDevice),
    Dummy(DummyDevice),
}

impl Device {
    /// Boards the provider can open
    pub fn list(provider: &dyn TransportProvider) -> Vec<BoardInfo> {
        provider.list()
    }

    /// Open the selected board with the controller matching its sensor
    pub fn open(provider: &dyn TransportProvider, selector: &BoardSelector, options: DeviceOptions) -> Result<Self> {
        let transport = provider.open(selector)?;
        Self::open_transport(transport, options)
    }

    /// Wrap an opened transport; Avian boards start in FMCW mode
    pub fn open_transport(transport: Box<dyn Transport>, options: DeviceOptions) -> Result<Self> {
        let sensor_type = transport.board_info().sensor_type;
        let family = SensorFamily::from_sensor_type(&sensor_type)
            .ok_or_else(|| RadarError::DeviceNotSupported(sensor_type.clone()))?;
        tracing::debug!("Sensor {} classified as {:?}", sensor_type, family);
        Ok(match family {
            SensorFamily::Avian(variant) => Device::Fmcw(FmcwDevice::open(transport, variant, options)?),
            SensorFamily::Ltr11 => Device::Ltr11(Ltr11Device::open(transport, options)?),
            SensorFamily::Mimose => Device::Mimose(MimoseDevice::open(transport, options)?),
        })
    }

    /// Open an Avian board in continuous-wave mode
    pub fn open_cw(provider: &dyn TransportProvider, selector: &BoardSelector, options: DeviceOptions) -> Result<Self> {
        let transport = provider.open(selector)?;
        let sensor_type = transport.board_info().sensor_type;
        match SensorFamily::from_sensor_type(&sensor_type) {
            Some(SensorFamily::Avian(variant)) => Ok(Device::Cw(CwDevice::open(transport, variant, options)?)),
            _ => Err(RadarError::DeviceNotSupported(format!("{} has no CW mode", sensor_type))),
        }
    }

    /// Compile-only Avian device without a board
    pub fn dummy(variant: AvianVariant) -> Result<Self> {
        Ok(Device::Dummy(DummyDevice::new(variant)?))
    }

    pub fn family_name(&self) -> &'static str {
        match self {
            Device::Fmcw(_) => "fmcw",
            Device::Cw(_) => "cw",
            Device::Ltr11(_) => "ltr11",
            Device::Mimose(_) => "mimose",
            Device::Dummy(_) => "dummy",
        }
    }

    pub fn as_radar(&self) -> &dyn RadarDevice {
        match self {
            Device::Fmcw(d) => d,
            Device::Cw(d) => d,
            Device::Ltr11(d) => d,
            Device::Mimose(d) => d,
            Device::Dummy(d) => d,
        }
    }

    /// Stop acquisition and release the board; teardown errors are logged
    pub fn destroy(self) {
        tracing::info!("Destroying {} device", self.family_name());
        drop(self);
    }
}

impl RadarDevice for Device {
    fn sensor_info(&self) -> SensorInfo {
        self.as_radar().sensor_info()
    }

    fn board_info(&self) -> BoardInfo {
        self.as_radar().board_info()
    }

    fn firmware_info(&self) -> FirmwareInfo {
        self.as_radar().firmware_info()
    }

    fn state(&self) -> DeviceState {
        self.as_radar().state()
    }

    fn set_sequence(&self, sequence: &Sequence) -> Result<()> {
        self.as_radar().set_sequence(sequence)
    }

    fn sequence(&self) -> Result<Sequence> {
        self.as_radar().sequence()
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        self.as_radar().frame_shape()
    }

    fn start(&self) -> Result<()> {
        self.as_radar().start()
    }

    fn stop(&self) -> Result<()> {
        self.as_radar().stop()
    }

    fn get_next_frame(&self, timeout: Option<Duration>) -> Result<Frame> {
        self.as_radar().get_next_frame(timeout)
    }

    fn get_next_frame_into(&self, frame: &mut Frame, timeout: Option<Duration>) -> Result<()> {
        self.as_radar().get_next_frame_into(frame, timeout)
    }

    fn temperature(&self) -> Result<f64> {
        self.as_radar().temperature()
    }

    fn interrupt(&self) {
        self.as_radar().interrupt()
    }
}
