//! Continuous-wave controller for Avian sensors
//!
//! The CW signal and the sample capture are independent: the signal runs
//! between [`CwDevice::start_signal`] and [`CwDevice::stop_signal`], and
//! every [`CwDevice::capture_frame`] streams exactly one capture. Changing
//! the configuration while the signal is on stops it, reprograms the chip
//! and starts it again.

use super::fmcw::write_main;
use super::{lock, BoardIdentity, DeviceState, Link, RadarDevice};
use crate::config::DeviceOptions;
use crate::error::{RadarError, Result};
use crate::frame::{Frame, FrameData, FrameMetadata, RealCube};
use crate::profile::avian::AvianVariant;
use crate::profile::cw::{AdcConfig, CwConfig, CwProfile, TestSignalConfig};
use crate::profile::{SensorInfo, StatusPolicy};
use crate::sequence::{Chirp, CubeShape, Sequence};
use crate::transport::{BoardInfo, FirmwareInfo, Transport};
use std::sync::Mutex;
use std::time::Duration;

struct CwInner {
    link: Link,
    profile: CwProfile,
    config: CwConfig,
    signal_active: bool,
    default_timeout: Duration,
}

/// Avian sensor emitting a continuous wave
pub struct CwDevice {
    inner: Mutex<CwInner>,
    identity: BoardIdentity,
    info: SensorInfo,
}

impl CwDevice {
    /// Open a board in CW mode and program the default configuration
    pub fn open(transport: Box<dyn Transport>, variant: AvianVariant, options: DeviceOptions) -> Result<Self> {
        let identity = BoardIdentity::read(transport.as_ref(), None)?;
        let mut profile = CwProfile::new(variant)?;
        profile.avian_mut().map_mut().set_coalescing(options.coalesce_writes);
        let config = profile.default_config();
        let mut inner = CwInner {
            link: Link::new(transport, StatusPolicy::Framed, &options),
            profile,
            config: config.clone(),
            signal_active: false,
            default_timeout: options.fmcw_timeout(),
        };
        inner.program(&config)?;

        Ok(Self {
            info: inner.profile.sensor_info(),
            inner: Mutex::new(inner),
            identity,
        })
    }

    pub fn config(&self) -> CwConfig {
        lock(&self.inner).config.clone()
    }

    pub fn set_config(&self, config: &CwConfig) -> Result<()> {
        lock(&self.inner).set_config(config)
    }

    pub fn set_baseband(&self, baseband: &Chirp) -> Result<()> {
        let mut inner = lock(&self.inner);
        let config = CwConfig {
            baseband: Chirp {
                end_frequency_hz: baseband.start_frequency_hz,
                ..baseband.clone()
            },
            ..inner.config.clone()
        };
        inner.set_config(&config)
    }

    pub fn set_adc(&self, adc: AdcConfig) -> Result<()> {
        let mut inner = lock(&self.inner);
        let config = CwConfig {
            adc,
            ..inner.config.clone()
        };
        inner.set_config(&config)
    }

    pub fn set_test_signal(&self, test_signal: TestSignalConfig) -> Result<()> {
        let mut inner = lock(&self.inner);
        let config = CwConfig {
            test_signal,
            ..inner.config.clone()
        };
        inner.set_config(&config)
    }

    pub fn start_signal(&self) -> Result<()> {
        lock(&self.inner).start_signal()
    }

    pub fn stop_signal(&self) -> Result<()> {
        lock(&self.inner).stop_signal()
    }

    pub fn is_signal_active(&self) -> bool {
        lock(&self.inner).signal_active
    }

    /// Capture one `(num_rx, 1, num_samples)` block, starting the signal if needed
    pub fn capture_frame(&self, timeout: Option<Duration>) -> Result<RealCube> {
        lock(&self.inner).capture(timeout).map(|(cube, _)| cube)
    }
}

impl CwInner {
    /// Compile and flush a configuration, then adopt what was read back
    fn program(&mut self, config: &CwConfig) -> Result<()> {
        let batch = self.profile.compile(config)?;
        self.profile
            .avian_mut()
            .map_mut()
            .write_batch(&mut self.link.io(), &batch)?;
        let running = self.profile.decode(&self.profile.avian().map().cached_image())?;
        let plan = self.profile.data_plan(&running.baseband)?;
        self.link.configure(plan);
        tracing::info!(
            "CW configuration programmed: {:.4} GHz, {} samples",
            running.baseband.start_frequency_hz / 1e9,
            running.baseband.num_samples
        );
        self.config = running;
        Ok(())
    }

    fn set_config(&mut self, config: &CwConfig) -> Result<()> {
        let restart = self.signal_active;
        if restart {
            self.stop_signal()?;
        }
        self.program(config)?;
        if restart {
            self.start_signal()?;
        }
        Ok(())
    }

    fn write_main(&mut self, fields: &[(&str, u32)]) -> Result<()> {
        write_main(self.profile.avian_mut().map_mut(), &mut self.link.io(), fields)
    }

    fn start_signal(&mut self) -> Result<()> {
        if self.signal_active {
            return Ok(());
        }
        self.write_main(&[("MAIN.FSM_RESET", 0), ("MAIN.FRAME_START", 1)])?;
        self.signal_active = true;
        tracing::info!("CW signal on");
        Ok(())
    }

    fn stop_signal(&mut self) -> Result<()> {
        if !self.signal_active {
            return Ok(());
        }
        self.write_main(&[("MAIN.FRAME_START", 0), ("MAIN.FSM_RESET", 1)])?;
        self.signal_active = false;
        tracing::info!("CW signal off");
        Ok(())
    }

    fn capture(&mut self, timeout: Option<Duration>) -> Result<(RealCube, u64)> {
        self.start_signal()?;
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.link.open_stream()?;
        let words = self.link.next_words(timeout);
        let closed = self.link.close_stream();
        let (words, timestamp_us) = words?;
        closed?;
        let cube = CwProfile::decode_samples(&words, CwProfile::frame_shape(&self.config.baseband))?;
        Ok((cube, timestamp_us))
    }
}

impl RadarDevice for CwDevice {
    fn sensor_info(&self) -> SensorInfo {
        self.info.clone()
    }

    fn board_info(&self) -> BoardInfo {
        self.identity.board.clone()
    }

    fn firmware_info(&self) -> FirmwareInfo {
        self.identity.firmware.clone()
    }

    fn state(&self) -> DeviceState {
        let inner = lock(&self.inner);
        if inner.signal_active {
            DeviceState::Active
        } else {
            inner.link.state()
        }
    }

    fn set_sequence(&self, sequence: &Sequence) -> Result<()> {
        let baseband = CwProfile::baseband_from_sequence(sequence)?;
        self.set_baseband(&baseband)
    }

    fn sequence(&self) -> Result<Sequence> {
        Ok(CwProfile::to_sequence(&lock(&self.inner).config.baseband))
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        Ok(vec![CwProfile::frame_shape(&lock(&self.inner).config.baseband)])
    }

    fn start(&self) -> Result<()> {
        self.start_signal()
    }

    fn stop(&self) -> Result<()> {
        self.stop_signal()
    }

    fn get_next_frame(&self, timeout: Option<Duration>) -> Result<Frame> {
        let (cube, timestamp_us) = lock(&self.inner).capture(timeout)?;
        Ok(Frame::new(
            FrameData::Real(vec![cube]),
            FrameMetadata {
                timestamp_us,
                active: true,
                ..Default::default()
            },
        ))
    }

    fn interrupt(&self) {
        self.identity.interrupt();
    }
}

impl Drop for CwDevice {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.stop_signal() {
            tracing::warn!("Error stopping CW signal at teardown: {}", e);
        }
    }
}

#[cfg(all(test, feature = "mock-board"))]
mod tests {
    use super::*;
    use crate::profile::cw::TestSignalMode;
    use crate::transport::mock::{MockBoard, MockBoardControl};

    fn device() -> (CwDevice, MockBoardControl) {
        let board = MockBoard::cw("BGT60ATR24C").with_slice_interval(Duration::from_millis(1));
        let control = board.control();
        (
            CwDevice::open(Box::new(board), AvianVariant::Bgt60Atr24c, DeviceOptions::default()).unwrap(),
            control,
        )
    }

    #[test]
    fn test_open_programs_defaults() {
        let (device, control) = device();
        assert_eq!(device.state(), DeviceState::Configured);
        assert!(!device.is_signal_active());
        // MAIN carries CW_MODE
        assert!(control.writes().iter().any(|(address, _)| *address == 0x00));
        let config = device.config();
        assert_eq!(config.baseband.start_frequency_hz, config.baseband.end_frequency_hz);
    }

    #[test]
    fn test_capture_shape_and_range() {
        let (device, _) = device();
        let mut baseband = device.config().baseband;
        baseband.rx_mask = 0b11;
        baseband.num_samples = 64;
        device.set_baseband(&baseband).unwrap();

        let cube = device.capture_frame(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(cube.shape(), CubeShape::new(2, 1, 64));
        assert!(cube.as_slice().iter().all(|v| (-1.0..=1.0).contains(v)));
        assert!(device.is_signal_active());
        assert_eq!(device.state(), DeviceState::Active);
    }

    #[test]
    fn test_reconfigure_restarts_signal() {
        let (device, control) = device();
        device.start_signal().unwrap();
        control.clear_writes();

        device
            .set_test_signal(TestSignalConfig {
                mode: TestSignalMode::BasebandTest,
                frequency_hz: 1e6,
            })
            .unwrap();
        assert!(device.is_signal_active());
        assert_eq!(device.config().test_signal.mode, TestSignalMode::BasebandTest);

        // stop, program, start: the last MAIN write sets FRAME_START again
        let main_writes: Vec<u32> = control
            .writes()
            .into_iter()
            .filter(|(address, _)| *address == 0x00)
            .map(|(_, value)| value)
            .collect();
        assert!(main_writes.len() >= 2);
        assert_eq!(main_writes.last().copied().unwrap() & 1, 1);
        assert!(main_writes.iter().any(|v| v & 1 == 0));
    }

    #[test]
    fn test_invalid_adc_rejected() {
        let (device, _) = device();
        let before = device.config();
        let bad = AdcConfig {
            oversampling_factor: 3,
            ..AdcConfig::default()
        };
        assert!(matches!(device.set_adc(bad), Err(RadarError::ArgumentInvalid(_))));
        assert_eq!(device.config(), before);
    }

    #[test]
    fn test_sequence_view() {
        let (device, _) = device();
        let sequence = device.sequence().unwrap();
        assert_eq!(sequence.chirps().len(), 1);
        device.set_sequence(&sequence).unwrap();
        assert_eq!(device.frame_shape().unwrap(), vec![CwProfile::frame_shape(&device.config().baseband)]);
    }
}
