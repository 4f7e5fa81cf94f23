//! FMCW controller for Avian sensors

use super::{lock, BoardIdentity, DeviceState, Link, RadarDevice};
use crate::config::DeviceOptions;
use crate::error::{RadarError, Result};
use crate::frame::{Frame, FrameData, FrameMetadata, TemperatureCache};
use crate::profile::avian::{temperature_from_raw, AvianProfile, AvianVariant, Metrics, TEMPERATURE_CHANNEL};
use crate::profile::{SensorInfo, StatusPolicy};
use crate::registers::RegisterMap;
use crate::sequence::{CubeShape, Sequence, SimpleSequenceConfig};
use crate::transport::{BoardInfo, FirmwareInfo, RegisterAccessor, Transport};
use std::sync::Mutex;
use std::time::Duration;

const SADC_POLL_ATTEMPTS: u32 = 20;
const SADC_POLL_INTERVAL: Duration = Duration::from_micros(500);

struct FmcwInner {
    link: Link,
    profile: AvianProfile,
    sequence: Option<Sequence>,
    shapes: Vec<CubeShape>,
    temperature: TemperatureCache,
    default_timeout: Duration,
}

/// Avian sensor streaming FMCW frames
pub struct FmcwDevice {
    inner: Mutex<FmcwInner>,
    identity: BoardIdentity,
    info: SensorInfo,
}

impl FmcwDevice {
    pub fn open(transport: Box<dyn Transport>, variant: AvianVariant, options: DeviceOptions) -> Result<Self> {
        let identity = BoardIdentity::read(transport.as_ref(), None)?;
        let mut profile = AvianProfile::new(variant)?;
        profile.set_max_slice_rate(options.max_slice_rate_hz);
        profile.map_mut().set_coalescing(options.coalesce_writes);
        let mut link = Link::new(transport, StatusPolicy::Framed, &options);

        let chip_id = profile.map().read(&mut link.io(), "CHIP_ID")?;
        tracing::debug!("{} chip id {:#08x}", variant, chip_id);

        Ok(Self {
            info: profile.sensor_info(),
            inner: Mutex::new(FmcwInner {
                link,
                profile,
                sequence: None,
                shapes: Vec::new(),
                temperature: TemperatureCache::new(options.temperature_ttl()),
                default_timeout: options.fmcw_timeout(),
            }),
            identity,
        })
    }

    pub fn variant(&self) -> AvianVariant {
        lock(&self.inner).profile.variant()
    }

    /// Program a simple sequence
    pub fn set_simple_config(&self, config: &SimpleSequenceConfig) -> Result<()> {
        self.set_sequence(&config.to_sequence())
    }

    /// Running sequence as a simple sequence
    pub fn simple_config(&self) -> Result<SimpleSequenceConfig> {
        SimpleSequenceConfig::from_sequence(&self.sequence()?)
    }

    /// Range and speed figures of the running configuration
    pub fn metrics(&self) -> Result<Metrics> {
        Ok(Metrics::from_config(&self.simple_config()?))
    }

    /// Register values written so far, as `(name, address, value)`
    pub fn register_dump(&self) -> Vec<(String, u8, u32)> {
        lock(&self.inner).profile.map().dump()
    }
}

impl FmcwInner {
    fn set_sequence(&mut self, sequence: &Sequence) -> Result<()> {
        self.link.ensure_idle()?;
        let batch = self.profile.compile(sequence)?;
        if let Err(e) = self.profile.map_mut().write_batch(&mut self.link.io(), &batch) {
            // the chip holds a mix of old and new registers
            self.sequence = None;
            self.shapes.clear();
            self.link.invalidate();
            return Err(e);
        }

        let running = self.profile.decode(&self.profile.map().cached_image())?;
        let plan = self.profile.data_plan(&running)?;
        self.shapes = running.frame_shape();
        self.link.configure(plan);
        tracing::info!(
            "FMCW sequence programmed: {} register writes, frame shape {:?}",
            batch.len(),
            self.shapes.iter().map(CubeShape::dims).collect::<Vec<_>>()
        );
        self.sequence = Some(running);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        match self.link.state() {
            DeviceState::Ready => return Err(RadarError::NotConfigured),
            DeviceState::Active => return Ok(()),
            DeviceState::Configured => {}
        }
        self.link.open_stream()?;
        if let Err(e) = write_main(self.profile.map_mut(), &mut self.link.io(), &[("MAIN.FSM_RESET", 0), ("MAIN.FRAME_START", 1)]) {
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
        let chip = write_main(self.profile.map_mut(), &mut self.link.io(), &[("MAIN.FRAME_START", 0), ("MAIN.FSM_RESET", 1)]);
        if let Err(e) = &chip {
            tracing::warn!("Failed to stop the frame sequencer: {}", e);
        }
        self.link.close_stream()?;
        chip
    }

    fn timeout(&self, requested: Option<Duration>) -> Result<Duration> {
        if let Some(timeout) = requested {
            return Ok(timeout);
        }
        let period = self
            .sequence
            .as_ref()
            .and_then(Sequence::frame_repetition_time)
            .unwrap_or(0.0);
        if period > self.default_timeout.as_secs_f64() {
            return Err(RadarError::ArgumentInvalid(format!(
                "frame period {:.3} s exceeds the default timeout, pass a timeout",
                period
            )));
        }
        Ok(self.default_timeout)
    }

    fn next_frame(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        if self.link.state() == DeviceState::Ready {
            return Err(RadarError::NotConfigured);
        }
        let timeout = self.timeout(timeout)?;
        self.start()?;
        let (words, timestamp_us) = self.link.next_words(timeout)?;
        let cubes = AvianProfile::decode_samples(&words, &self.shapes)?;
        Ok(Frame::new(
            FrameData::Real(cubes),
            FrameMetadata {
                timestamp_us,
                active: true,
                ..Default::default()
            },
        ))
    }

    fn temperature(&mut self) -> Result<f64> {
        if !self.profile.traits().has_temperature_sensor {
            return Err(RadarError::NotSupported(format!(
                "{} has no temperature sensor",
                self.profile.variant()
            )));
        }
        let Self {
            link,
            profile,
            temperature,
            ..
        } = self;
        temperature.get_or_measure(|| measure_temperature(profile.map_mut(), &mut link.io()))
    }
}

/// Set fields of `MAIN` in one register write
pub(super) fn write_main(map: &mut RegisterMap<u8, u32>, io: &mut RegisterAccessor<'_>, fields: &[(&str, u32)]) -> Result<()> {
    let mut image = map.image();
    for (name, value) in fields {
        image.set(name, *value)?;
    }
    let batch = image.into_batch();
    map.write_batch(io, &batch)
}

/// One SADC conversion of the temperature channel
fn measure_temperature(map: &mut RegisterMap<u8, u32>, io: &mut RegisterAccessor<'_>) -> Result<f64> {
    let mut image = map.image();
    image.set("SADC_CTRL.SADC_CHSEL", TEMPERATURE_CHANNEL)?;
    image.set("SADC_CTRL.START_SADC", 1)?;
    let batch = image.into_batch();
    map.write_batch(io, &batch)?;

    for _ in 0..SADC_POLL_ATTEMPTS {
        if map.read(io, "SADC_RESULT.BUSY")? == 0 {
            let raw = map.read(io, "SADC_RESULT.RESULT")?;
            let celsius = temperature_from_raw(raw);
            tracing::debug!("Temperature {:.1} °C (SADC {})", celsius, raw);
            return Ok(celsius);
        }
        std::thread::sleep(SADC_POLL_INTERVAL);
    }
    Err(RadarError::Timeout)
}

impl RadarDevice for FmcwDevice {
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
        lock(&self.inner).set_sequence(sequence)
    }

    fn sequence(&self) -> Result<Sequence> {
        lock(&self.inner).sequence.clone().ok_or(RadarError::NotConfigured)
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        let inner = lock(&self.inner);
        if inner.sequence.is_none() {
            return Err(RadarError::NotConfigured);
        }
        Ok(inner.shapes.clone())
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

    fn temperature(&self) -> Result<f64> {
        lock(&self.inner).temperature()
    }

    fn interrupt(&self) {
        self.identity.interrupt();
    }
}

impl Drop for FmcwDevice {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.stop() {
            tracing::warn!("Error stopping FMCW device at teardown: {}", e);
        }
    }
}

#[cfg(all(test, feature = "mock-board"))]
mod tests {
    use super::*;
    use crate::transport::mock::MockBoard;
    use crate::transport::MockTransport;

    fn device(variant: &str) -> (FmcwDevice, crate::transport::mock::MockBoardControl) {
        let board = MockBoard::avian(variant).with_slice_interval(Duration::from_millis(1));
        let control = board.control();
        let variant = variant.parse().unwrap();
        (FmcwDevice::open(Box::new(board), variant, DeviceOptions::default()).unwrap(), control)
    }

    fn small_config() -> SimpleSequenceConfig {
        let mut config = SimpleSequenceConfig {
            frame_repetition_time_s: 0.05,
            chirp_repetition_time_s: 0.5e-3,
            num_chirps: 8,
            ..Default::default()
        };
        config.chirp.num_samples = 32;
        config
    }

    #[test]
    fn test_lifecycle_states() {
        let (device, _) = device("BGT60TR13C");
        assert_eq!(device.state(), DeviceState::Ready);
        assert!(matches!(device.start(), Err(RadarError::NotConfigured)));
        assert!(matches!(device.get_next_frame(None), Err(RadarError::NotConfigured)));

        device.set_simple_config(&small_config()).unwrap();
        assert_eq!(device.state(), DeviceState::Configured);
        device.start().unwrap();
        assert_eq!(device.state(), DeviceState::Active);
        assert!(matches!(device.set_simple_config(&small_config()), Err(RadarError::DeviceBusy)));
        device.stop().unwrap();
        assert_eq!(device.state(), DeviceState::Configured);
    }

    #[test]
    fn test_frames_have_sequence_shape() {
        let (device, control) = device("BGT60TR13C");
        device.set_simple_config(&small_config()).unwrap();
        assert_eq!(device.frame_shape().unwrap(), vec![CubeShape::new(1, 8, 32)]);

        // auto-start on the first fetch
        let frame = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(device.state(), DeviceState::Active);
        let cubes = frame.real_cubes().unwrap();
        assert_eq!(cubes[0].shape(), CubeShape::new(1, 8, 32));
        assert!(cubes[0].as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(frame.metadata.active);

        // FRAME_START was written to MAIN
        let main = control.register(0x00).unwrap();
        assert_eq!(main & 1, 1);
    }

    #[test]
    fn test_caller_owned_frame_shape_checked() {
        let (device, _) = device("BGT60TR13C");
        device.set_simple_config(&small_config()).unwrap();
        let mut wrong = Frame::real(&[CubeShape::new(1, 4, 32)]);
        assert!(matches!(
            device.get_next_frame_into(&mut wrong, Some(Duration::from_secs(1))),
            Err(RadarError::DimensionMismatch { .. })
        ));

        let mut frame = Frame::real(&device.frame_shape().unwrap());
        let buffer = frame.real_cubes().unwrap()[0].as_slice().as_ptr();
        device.get_next_frame_into(&mut frame, Some(Duration::from_secs(2))).unwrap();
        assert_eq!(frame.shapes(), vec![CubeShape::new(1, 8, 32)]);
        // filled in place
        assert_eq!(frame.real_cubes().unwrap()[0].as_slice().as_ptr(), buffer);
        assert!(frame.metadata.active);
    }

    #[test]
    fn test_failed_programming_drops_cached_sequence() {
        let (device, control) = device("BGT60TR13C");
        device.set_simple_config(&small_config()).unwrap();
        assert_eq!(device.state(), DeviceState::Configured);

        let mut other = small_config();
        other.num_chirps = 16;
        control.fail_writes_after(1);
        assert!(matches!(device.set_simple_config(&other), Err(RadarError::Communication(_))));
        assert_eq!(device.state(), DeviceState::Ready);
        assert!(matches!(device.sequence(), Err(RadarError::NotConfigured)));
        assert!(matches!(device.frame_shape(), Err(RadarError::NotConfigured)));
        assert!(matches!(device.start(), Err(RadarError::NotConfigured)));

        control.set_link_down(false);
        device.set_simple_config(&other).unwrap();
        assert_eq!(device.frame_shape().unwrap(), vec![CubeShape::new(1, 16, 32)]);
    }

    #[test]
    fn test_readback_matches_simple_config() {
        let (device, _) = device("BGT60TR13C");
        let config = small_config();
        device.set_simple_config(&config).unwrap();
        let back = device.simple_config().unwrap();
        assert_eq!(back.num_chirps, config.num_chirps);
        assert_eq!(back.chirp.num_samples, config.chirp.num_samples);
        assert_eq!(back.chirp.rx_mask, config.chirp.rx_mask);
        assert!((back.frame_repetition_time_s - config.frame_repetition_time_s).abs() < 1e-3);
    }

    #[test]
    fn test_temperature_from_sadc() {
        let (device, control) = device("BGT60TR13C");
        let celsius = device.temperature().unwrap();
        assert!((celsius - temperature_from_raw(728)).abs() < 1e-9);

        // cached within the TTL
        control.set_register(0x5E, 800);
        assert_eq!(device.temperature().unwrap(), celsius);
    }

    #[test]
    fn test_temperature_not_supported_on_utr11() {
        let (device, _) = device("BGT60UTR11AIP");
        assert!(matches!(device.temperature(), Err(RadarError::NotSupported(_))));
    }

    #[test]
    fn test_long_frame_period_needs_explicit_timeout() {
        let (device, _) = device("BGT60TR13C");
        let config = SimpleSequenceConfig {
            frame_repetition_time_s: 12.0,
            ..small_config()
        };
        device.set_simple_config(&config).unwrap();
        assert!(matches!(device.get_next_frame(None), Err(RadarError::ArgumentInvalid(_))));
    }

    #[test]
    fn test_open_propagates_link_failure() {
        let mut transport = MockTransport::new();
        transport.expect_board_info().returning(|| BoardInfo {
            sensor_type: "BGT60TR13C".to_string(),
            board_type: "Test".to_string(),
            uuid: "00000000-0000-4000-8000-00000000000a".to_string(),
            port: "test".to_string(),
        });
        transport
            .expect_firmware_info()
            .returning(|| FirmwareInfo::new(2, 5, 4, "test"));
        transport.expect_cancel_handle().returning(|| None);
        transport
            .expect_read_register()
            .returning(|_| Err(RadarError::Communication("no answer".to_string())));

        let result = FmcwDevice::open(Box::new(transport), AvianVariant::Bgt60Tr13c, DeviceOptions::default());
        assert!(matches!(result, Err(RadarError::Communication(_))));
    }

    #[test]
    fn test_stop_clears_retained_slice() {
        let (device, _) = device("BGT60TR13C");
        device.set_simple_config(&small_config()).unwrap();
        device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        device.stop().unwrap();
        let inner = lock(&device.inner);
        assert!(!inner.link.reassembler.as_ref().unwrap().has_retained());
    }
}
