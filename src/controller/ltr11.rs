//! Pulsed-Doppler controller for the BGT60LTR11AIP
//!
//! The chip pulses autonomously once `REG15.START_PM` is set; the
//! baseboard harvests one I/Q pair, the amplitude word and the detector
//! word per pulse. Frames come back as complex `(1, 1, num_samples)` cubes
//! together with the detector bits and an active/low-power flag derived
//! from the timestamp delta.

use super::{lock, BoardIdentity, DeviceState, Link, RadarDevice};
use crate::config::DeviceOptions;
use crate::error::{RadarError, Result};
use crate::frame::{Frame, FrameData, FrameMetadata, MetadataCache};
use crate::profile::ltr11::{Ltr11Config, Ltr11Limits, Ltr11Mode, Ltr11Profile, MIN_FIRMWARE};
use crate::profile::{SensorInfo, StatusPolicy};
use crate::sequence::{CubeShape, Sequence};
use crate::transport::{BoardInfo, FirmwareInfo, Transport};
use std::sync::Mutex;
use std::time::Duration;

struct Ltr11Inner {
    link: Link,
    profile: Ltr11Profile,
    config: Ltr11Config,
    metadata: MetadataCache,
    default_timeout: Duration,
}

/// BGT60LTR11AIP pulsed-Doppler sensor
pub struct Ltr11Device {
    inner: Mutex<Ltr11Inner>,
    identity: BoardIdentity,
    info: SensorInfo,
}

impl Ltr11Device {
    /// Open the board, pick the RF band from the fuses and program the defaults
    pub fn open(transport: Box<dyn Transport>, options: DeviceOptions) -> Result<Self> {
        let identity = BoardIdentity::read(transport.as_ref(), Some(MIN_FIRMWARE))?;
        let mut link = Link::new(transport, StatusPolicy::Framed, &options);

        let fuses = Ltr11Profile::new(false)?.map().read(&mut link.io(), "E_FUSES")?;
        let japan = Ltr11Profile::japan_band_from_fuses(fuses);
        if japan {
            tracing::info!("LTR11 fused for the Japan band");
        }
        let mut profile = Ltr11Profile::new(japan)?;
        profile.map_mut().set_coalescing(options.coalesce_writes);

        let config = profile.default_config();
        let mut inner = Ltr11Inner {
            link,
            profile,
            config: config.clone(),
            metadata: MetadataCache::default(),
            default_timeout: options.pulsed_timeout(),
        };
        inner.set_config(&config)?;

        Ok(Self {
            info: inner.profile.sensor_info(),
            inner: Mutex::new(inner),
            identity,
        })
    }

    pub fn config(&self) -> Ltr11Config {
        lock(&self.inner).config.clone()
    }

    /// Program a configuration; fails with `DeviceBusy` while streaming
    pub fn set_config(&self, config: &Ltr11Config) -> Result<()> {
        lock(&self.inner).set_config(config)
    }

    pub fn limits(&self) -> Ltr11Limits {
        lock(&self.inner).profile.limits()
    }

    pub fn japan_band(&self) -> bool {
        lock(&self.inner).profile.japan_band()
    }

    /// Estimated power draw in mW in active and low-power mode
    pub fn power_consumption_mw(&self) -> (f64, f64) {
        let inner = lock(&self.inner);
        (
            Ltr11Profile::active_power_mw(&inner.config),
            Ltr11Profile::low_power_mw(&inner.config),
        )
    }
}

impl Ltr11Inner {
    fn set_config(&mut self, config: &Ltr11Config) -> Result<()> {
        self.link.ensure_idle()?;
        let batch = self.profile.compile(config)?;
        let plan = self.profile.data_plan(config)?;
        self.profile.map_mut().write_batch(&mut self.link.io(), &batch)?;
        // pulsing stays off until start
        self.write_start_bits(false)?;

        self.link.configure(plan);
        self.metadata.reset();
        tracing::info!(
            "LTR11 configuration programmed: {} Hz, PRT {} us, {} samples, APRT {:?}",
            config.rf_frequency_hz,
            config.prt.micros(),
            config.num_samples,
            config.aprt_factor
        );
        self.config = config.clone();
        Ok(())
    }

    fn write_start_bits(&mut self, run: bool) -> Result<()> {
        let continuous = self.config.mode == Ltr11Mode::Continuous;
        let map = self.profile.map_mut();
        let mut image = map.image();
        image.set("REG15.START_PM", run as u32)?;
        image.set("REG15.START_CW", (run && continuous) as u32)?;
        let batch = image.into_batch();
        map.write_batch(&mut self.link.io(), &batch)
    }

    fn start(&mut self) -> Result<()> {
        match self.link.state() {
            DeviceState::Ready => return Err(RadarError::NotConfigured),
            DeviceState::Active => return Ok(()),
            DeviceState::Configured => {}
        }
        self.metadata.reset();
        self.link.open_stream()?;
        if let Err(e) = self.write_start_bits(true) {
            if let Err(close) = self.link.close_stream() {
                tracing::warn!("Failed to close stream after start error: {}", close);
            }
            return Err(e);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.link.state() != DeviceState::Active {
            return Ok(());
        }
        let chip = self.write_start_bits(false);
        if let Err(e) = &chip {
            tracing::warn!("Failed to stop pulsing: {}", e);
        }
        self.link.close_stream()?;
        chip
    }

    fn timeout(&self, requested: Option<Duration>) -> Result<Duration> {
        match requested {
            Some(timeout) => {
                Ltr11Profile::check_timeout(&self.config, timeout)?;
                Ok(timeout)
            }
            None if self.config.aprt_factor.is_enabled() => {
                Ok(self.default_timeout + self.config.frame_time() * self.config.aprt_factor.factor())
            }
            None => Ok(self.default_timeout),
        }
    }

    fn next_frame(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        if self.link.state() == DeviceState::Ready {
            return Err(RadarError::NotConfigured);
        }
        let timeout = self.timeout(timeout)?;
        self.start()?;
        let (words, timestamp_us) = self.link.next_words(timeout)?;
        let samples = Ltr11Profile::decode_samples(&words, self.config.num_samples as usize)?;

        let active = self
            .metadata
            .observe_timestamp(timestamp_us, Ltr11Profile::active_period_us(&self.config));
        let power = if active {
            Ltr11Profile::active_power_mw(&self.config)
        } else {
            Ltr11Profile::low_power_mw(&self.config)
        };
        let avg_power_mw = self.metadata.power.update(power);

        Ok(Frame::new(
            FrameData::Complex(samples.cube),
            FrameMetadata {
                timestamp_us,
                active,
                avg_power_mw,
                motion: Some(samples.motion),
                direction_approaching: Some(samples.direction_approaching),
                ..Default::default()
            },
        ))
    }
}

impl RadarDevice for Ltr11Device {
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
        lock(&self.inner).link.state()
    }

    fn set_sequence(&self, sequence: &Sequence) -> Result<()> {
        let mut inner = lock(&self.inner);
        let config = inner.profile.config_from_sequence(sequence, &inner.config)?;
        inner.set_config(&config)
    }

    fn sequence(&self) -> Result<Sequence> {
        Ok(Ltr11Profile::to_sequence(&lock(&self.inner).config))
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        Ok(vec![Ltr11Profile::frame_shape(&lock(&self.inner).config)])
    }

    fn start(&self) -> Result<()> {
        lock(&self.inner).start()
    }

    fn stop(&self) -> Result<()> {
        lock(&self.inner).stop()
    }

    fn get_next_frame(&self, timeout: Option<Duration>) -> Result<Frame> {
        lock(&self.inner).next_frame(timeout)
    }

    fn interrupt(&self) {
        self.identity.interrupt();
    }
}

impl Drop for Ltr11Device {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.stop() {
            tracing::warn!("Error stopping LTR11 device at teardown: {}", e);
        }
    }
}

#[cfg(all(test, feature = "mock-board"))]
mod tests {
    use super::*;
    use crate::profile::ltr11::{AprtFactor, Prt};
    use crate::transport::mock::{MockBoard, MockBoardControl};

    const REG15: u32 = 0x0F;
    const START_PM: u32 = 1 << 14;

    fn device_with(board: MockBoard) -> (Ltr11Device, MockBoardControl) {
        let board = board.with_slice_interval(Duration::from_millis(1));
        let control = board.control();
        (Ltr11Device::open(Box::new(board), DeviceOptions::default()).unwrap(), control)
    }

    fn small_config(device: &Ltr11Device) -> Ltr11Config {
        Ltr11Config {
            num_samples: 64,
            prt: Prt::Us250,
            ..device.config()
        }
    }

    #[test]
    fn test_open_reads_band_from_fuses() {
        let (device, control) = device_with(MockBoard::ltr11());
        assert!(!device.japan_band());
        assert_eq!(device.state(), DeviceState::Configured);
        assert_eq!(control.register(REG15).unwrap() & START_PM, 0);

        let (japan, _) = device_with(MockBoard::ltr11().with_register(0x37, 0));
        assert!(japan.japan_band());
        assert_eq!(japan.config().rf_frequency_hz, japan.limits().rf_frequency_hz.0);
    }

    #[test]
    fn test_frames_carry_detector_state() {
        let (device, control) = device_with(MockBoard::ltr11());
        device.set_config(&small_config(&device)).unwrap();

        let frame = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(device.state(), DeviceState::Active);
        assert_ne!(control.register(REG15).unwrap() & START_PM, 0);

        let cube = frame.complex_cube().unwrap();
        assert_eq!(cube.shape(), CubeShape::new(1, 1, 64));
        assert!(cube.as_slice().iter().all(|c| (0.0..=1.0).contains(&c.re) && (0.0..=1.0).contains(&c.im)));
        assert_eq!(frame.metadata.motion, Some(true));
        assert_eq!(frame.metadata.direction_approaching, Some(false));
        // the first frame is always active
        assert!(frame.metadata.active);
        let (active_mw, _) = device.power_consumption_mw();
        assert!((frame.metadata.avg_power_mw - active_mw).abs() < 1e-9);

        device.stop().unwrap();
        assert_eq!(control.register(REG15).unwrap() & START_PM, 0);
    }

    #[test]
    fn test_low_power_frames_flagged() {
        // 64 samples at 250 us span 16 ms; 50 ms steps look like low-power frames
        let (device, _) = device_with(MockBoard::ltr11().with_timestamp_step_us(50_000));
        let config = Ltr11Config {
            aprt_factor: AprtFactor::X2,
            ..small_config(&device)
        };
        device.set_config(&config).unwrap();

        let first = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        let second = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        assert!(first.metadata.active);
        assert!(!second.metadata.active);
        let (active_mw, low_mw) = device.power_consumption_mw();
        let expected = (active_mw + low_mw) / 2.0;
        assert!((second.metadata.avg_power_mw - expected).abs() < 1e-9);
    }

    #[test]
    fn test_set_config_while_streaming() {
        let (device, _) = device_with(MockBoard::ltr11());
        device.start().unwrap();
        let config = small_config(&device);
        assert!(matches!(device.set_config(&config), Err(RadarError::DeviceBusy)));
        device.stop().unwrap();
        device.set_config(&config).unwrap();
        assert_eq!(device.config(), config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (device, _) = device_with(MockBoard::ltr11());
        let before = device.config();
        let off_grid = Ltr11Config {
            rf_frequency_hz: before.rf_frequency_hz + 1_000_000,
            ..before.clone()
        };
        assert!(matches!(device.set_config(&off_grid), Err(RadarError::RfOutOfRange)));
        assert_eq!(device.config(), before);
    }

    #[test]
    fn test_short_timeout_in_low_power_mode() {
        let (device, _) = device_with(MockBoard::ltr11());
        let config = Ltr11Config {
            aprt_factor: AprtFactor::X16,
            ..device.config()
        };
        device.set_config(&config).unwrap();
        let result = device.get_next_frame(Some(Duration::from_millis(10)));
        assert!(matches!(result, Err(RadarError::ArgumentOutOfBounds(_))));
        assert_eq!(device.state(), DeviceState::Configured);
    }

    #[test]
    fn test_sequence_view_round_trip() {
        let (device, _) = device_with(MockBoard::ltr11());
        let sequence = device.sequence().unwrap();
        device.set_sequence(&sequence).unwrap();
        assert_eq!(device.frame_shape().unwrap(), vec![CubeShape::new(1, 1, 256)]);
    }
}
