//! Controller for the Mimose BGT24ATR22 pulsed radar
//!
//! Two frame configurations are resident in the chip at once; one of them
//! streams. [`MimoseDevice::switch_frame_configuration`] moves streaming to
//! the other one without reprogramming the pulse and frame registers.

use super::{lock, BoardIdentity, DeviceState, Link, RadarDevice};
use crate::config::DeviceOptions;
use crate::error::{RadarError, Result};
use crate::frame::{Frame, FrameData, FrameMetadata, MetadataCache};
use crate::profile::mimose::{AcquisitionPlan, ChipVersion, MimoseConfig, MimoseLimits, MimoseProfile, MIN_FIRMWARE};
use crate::profile::{SensorInfo, StatusPolicy};
use crate::registers::RegisterBatch;
use crate::sequence::{CubeShape, Sequence};
use crate::transport::{BoardInfo, FirmwareInfo, Transport};
use std::sync::Mutex;
use std::time::Duration;

struct MimoseInner {
    link: Link,
    profile: MimoseProfile,
    config: MimoseConfig,
    active: usize,
    plan: Option<AcquisitionPlan>,
    metadata: MetadataCache,
    default_timeout: Duration,
}

/// BGT24ATR22 sensor
pub struct MimoseDevice {
    inner: Mutex<MimoseInner>,
    identity: BoardIdentity,
    info: SensorInfo,
}

impl MimoseDevice {
    /// Open the board, reset the chip and program the default configuration
    pub fn open(transport: Box<dyn Transport>, options: DeviceOptions) -> Result<Self> {
        let identity = BoardIdentity::read(transport.as_ref(), Some(MIN_FIRMWARE))?;
        let mut link = Link::new(transport, StatusPolicy::Pulsed, &options);

        let chip_type = MimoseProfile::new(ChipVersion::Unknown)?
            .map()
            .read(&mut link.io(), "CHIP_TYPE")?;
        let chip = ChipVersion::from_register(chip_type);
        tracing::debug!("Mimose chip type {:#06x} ({:?})", chip_type, chip);
        if chip == ChipVersion::Unknown {
            tracing::warn!("Unknown Mimose chip type {:#06x}, assuming A-step timing", chip_type);
        }

        let mut profile = MimoseProfile::new(chip)?;
        profile.map_mut().set_coalescing(options.coalesce_writes);
        for batch in profile.reset_sequence()? {
            profile.map_mut().write_batch(&mut link.io(), &batch)?;
        }

        let config = profile.default_config();
        let mut inner = MimoseInner {
            link,
            profile,
            config,
            active: 0,
            plan: None,
            metadata: MetadataCache::default(),
            default_timeout: options.pulsed_timeout(),
        };
        inner.set_config(&config, 0)?;

        Ok(Self {
            info: inner.profile.sensor_info(),
            inner: Mutex::new(inner),
            identity,
        })
    }

    pub fn chip_version(&self) -> ChipVersion {
        lock(&self.inner).profile.chip_version()
    }

    pub fn config(&self) -> MimoseConfig {
        lock(&self.inner).config
    }

    /// Configuration as currently held in the register cache
    pub fn register_config(&self) -> Result<MimoseConfig> {
        let inner = lock(&self.inner);
        inner.profile.decode(&inner.profile.map().cached_image(), &inner.config)
    }

    /// Program both frame configurations and stream `active_index`
    pub fn set_config(&self, config: &MimoseConfig, active_index: usize) -> Result<()> {
        lock(&self.inner).set_config(config, active_index)
    }

    /// Index of the streaming frame configuration
    pub fn active_frame(&self) -> usize {
        lock(&self.inner).active
    }

    /// Limits of the frame configuration `index` under the current settings
    pub fn limits(&self, index: usize) -> Result<MimoseLimits> {
        let inner = lock(&self.inner);
        inner.profile.limits(&inner.config, index)
    }

    /// Stream the other resident frame configuration
    pub fn switch_frame_configuration(&self, index: usize) -> Result<()> {
        lock(&self.inner).switch(index)
    }

    /// RF centre frequency measured by the latest AFC run, in Hz
    pub fn get_current_rf_center_frequency(&self) -> Result<f64> {
        let inner = lock(&self.inner);
        if inner.link.state() != DeviceState::Active {
            return Err(RadarError::NotPossible("device is not streaming".to_string()));
        }
        let reading = inner
            .metadata
            .afc
            .ok_or_else(|| RadarError::NotPossible("no frame received yet".to_string()))?;
        MimoseProfile::rf_center_from_afc(&reading)
    }
}

impl MimoseInner {
    fn write(&mut self, batch: &RegisterBatch<u16, u16>) -> Result<()> {
        self.profile.map_mut().write_batch(&mut self.link.io(), batch)
    }

    fn set_config(&mut self, config: &MimoseConfig, active: usize) -> Result<()> {
        self.link.ensure_idle()?;
        let batch = self.profile.compile(config, active)?;
        let plan = self.profile.plan(config, active)?;
        self.write(&batch)?;

        self.adopt(config, active, plan);
        tracing::info!(
            "Mimose configuration programmed: frame {} {:?}, {} pulse(s) of {} samples",
            active,
            plan.layout.mode,
            plan.layout.pulses,
            plan.layout.num_samples
        );
        Ok(())
    }

    fn adopt(&mut self, config: &MimoseConfig, active: usize, plan: AcquisitionPlan) {
        let data = self.profile.data_plan(config, &plan);
        self.link.configure(data);
        self.config = *config;
        self.active = active;
        self.plan = Some(plan);
        self.metadata.reset();
    }

    fn start(&mut self) -> Result<()> {
        match self.link.state() {
            DeviceState::Ready => return Err(RadarError::NotConfigured),
            DeviceState::Active => return Ok(()),
            DeviceState::Configured => {}
        }
        self.metadata.reset();
        self.link.open_stream()?;
        let started = self.profile.start_batch(self.active).and_then(|batch| self.write(&batch));
        if let Err(e) = started {
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
        let chip = self.profile.stop_batch().and_then(|batch| self.write(&batch));
        if let Err(e) = &chip {
            tracing::warn!("Failed to stop the sequencer: {}", e);
        }
        self.link.close_stream()?;
        chip
    }

    fn switch(&mut self, index: usize) -> Result<()> {
        if index == self.active {
            return Ok(());
        }
        if !self.config.frame(index)?.is_present() {
            return Err(RadarError::ArgumentInvalid(format!(
                "frame configuration {} selects no pulses",
                index
            )));
        }
        let previous = self.active;
        let streaming = self.link.state() == DeviceState::Active;
        if streaming {
            self.stop()?;
        }

        let switched = self
            .profile
            .compile_switch(&self.config, index)
            .and_then(|batch| {
                let plan = self.profile.plan(&self.config, index)?;
                self.write(&batch)?;
                Ok(plan)
            });
        match switched {
            Ok(plan) => {
                let config = self.config;
                self.adopt(&config, index, plan);
                tracing::info!("Switched to frame configuration {}", index);
            }
            Err(e) => {
                tracing::warn!("Switch to frame configuration {} failed, keeping {}: {}", index, previous, e);
                self.restore(previous);
                if streaming {
                    self.start()?;
                }
                return Err(e);
            }
        }
        if streaming {
            self.start()?;
        }
        Ok(())
    }

    /// Reprogram the acquisition registers of `index` after a failed switch
    fn restore(&mut self, index: usize) {
        let restored = self.profile.compile_switch(&self.config, index).and_then(|batch| self.write(&batch));
        if let Err(e) = restored {
            tracing::warn!("Failed to restore frame configuration {}: {}", index, e);
        }
        self.active = index;
    }

    fn next_frame(&mut self, timeout: Option<Duration>) -> Result<Frame> {
        let layout = self.plan.as_ref().map(|p| p.layout).ok_or(RadarError::NotConfigured)?;
        let timeout = MimoseProfile::effective_timeout(&self.config, timeout.unwrap_or(self.default_timeout));
        self.start()?;
        let (words, timestamp_us) = self.link.next_words(timeout)?;
        let samples = MimoseProfile::decode_frame(&words, &layout)?;

        let cache = &mut self.metadata;
        cache.abb_gains = samples.abb_gains;
        cache.aoc_offsets = samples.aoc_offsets;
        if samples.afc.is_some() {
            cache.afc = samples.afc;
        }
        cache.last_timestamp_us = Some(timestamp_us);

        Ok(Frame::new(
            FrameData::Complex(samples.cube),
            FrameMetadata {
                timestamp_us,
                frame_counter: Some(samples.frame_counter),
                active: true,
                abb_gains: cache.abb_gains,
                aoc_offsets: cache.aoc_offsets,
                afc: cache.afc,
                ..Default::default()
            },
        ))
    }
}

impl RadarDevice for MimoseDevice {
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
        let active = inner.active;
        let config = inner.profile.config_from_sequence(sequence, &inner.config, active)?;
        inner.set_config(&config, active)
    }

    fn sequence(&self) -> Result<Sequence> {
        let inner = lock(&self.inner);
        MimoseProfile::to_sequence(&inner.config, inner.active)
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        let inner = lock(&self.inner);
        let plan = inner.plan.as_ref().ok_or(RadarError::NotConfigured)?;
        Ok(vec![plan.layout.shape()])
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

impl Drop for MimoseDevice {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.stop() {
            tracing::warn!("Error stopping Mimose device at teardown: {}", e);
        }
    }
}

#[cfg(all(test, feature = "mock-board"))]
mod tests {
    use super::*;
    use crate::profile::mimose::FrameConfig;
    use crate::transport::mock::{MockBoard, MockBoardControl};

    const SEQ_MAIN_CONF: u32 = 0x0000;

    fn device() -> (MimoseDevice, MockBoardControl) {
        let board = MockBoard::mimose().with_slice_interval(Duration::from_millis(2));
        let control = board.control();
        (MimoseDevice::open(Box::new(board), DeviceOptions::default()).unwrap(), control)
    }

    fn two_frame_config(device: &MimoseDevice) -> MimoseConfig {
        let mut config = device.config();
        config.frame_configs[1] = FrameConfig {
            frame_repetition_time_s: 0.256,
            pulse_repetition_time_s: 1e-3,
            selected_pulse_configs: [true, true, false, false],
            num_samples: 64,
        };
        config
    }

    #[test]
    fn test_open_resets_and_programs_defaults() {
        let (device, control) = device();
        assert_eq!(device.chip_version(), ChipVersion::A2);
        assert_eq!(device.state(), DeviceState::Configured);
        assert_eq!(device.active_frame(), 0);
        assert_eq!(device.frame_shape().unwrap(), vec![CubeShape::new(1, 1, 128)]);
        // SW_RST pulsed before the configuration
        let resets: Vec<u32> = control
            .writes()
            .into_iter()
            .filter(|(address, _)| *address == SEQ_MAIN_CONF)
            .map(|(_, value)| value)
            .collect();
        assert_eq!(&resets[..2], &[1 << 8, 0]);
    }

    #[test]
    fn test_frame_metadata() {
        let (device, _) = device();
        let first = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        let second = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();

        let cube = first.complex_cube().unwrap();
        assert_eq!(cube.shape(), CubeShape::new(1, 1, 128));
        let (a, b) = (first.metadata.frame_counter.unwrap(), second.metadata.frame_counter.unwrap());
        assert_eq!(b, a + 1);

        let meta = &second.metadata;
        assert_eq!(meta.aoc_offsets[0], [-16, 16]);
        assert_eq!(meta.aoc_offsets[3], [-19, 19]);
        let afc = meta.afc.unwrap();
        assert_eq!(afc.value, 115);
        assert_eq!(afc.counter, 9074);

        let rf = device.get_current_rf_center_frequency().unwrap();
        assert!((rf - 24.24e9).abs() < 0.01e9, "rf centre {}", rf);
        device.stop().unwrap();
        assert!(matches!(
            device.get_current_rf_center_frequency(),
            Err(RadarError::NotPossible(_))
        ));
    }

    #[test]
    fn test_switch_frame_configuration() {
        let (device, control) = device();
        let config = two_frame_config(&device);
        device.set_config(&config, 0).unwrap();
        device.start().unwrap();
        device.get_next_frame(Some(Duration::from_secs(2))).unwrap();

        device.switch_frame_configuration(1).unwrap();
        assert_eq!(device.active_frame(), 1);
        assert_eq!(device.state(), DeviceState::Active);
        let next_frame_bit = (control.register(SEQ_MAIN_CONF).unwrap() >> 1) & 1;
        assert_eq!(next_frame_bit, 1);

        let frame = device.get_next_frame(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(frame.complex_cube().unwrap().shape(), CubeShape::new(1, 2, 64));
        assert_eq!(device.frame_shape().unwrap(), vec![CubeShape::new(1, 2, 64)]);

        // same index is a no-op
        control.clear_writes();
        device.switch_frame_configuration(1).unwrap();
        assert!(control.writes().is_empty());
    }

    #[test]
    fn test_switch_to_empty_frame_rejected() {
        let (device, _) = device();
        assert!(matches!(
            device.switch_frame_configuration(1),
            Err(RadarError::ArgumentInvalid(_))
        ));
        assert!(matches!(
            device.switch_frame_configuration(2),
            Err(RadarError::ArgumentOutOfBounds(_))
        ));
        assert_eq!(device.active_frame(), 0);
    }

    #[test]
    fn test_failed_switch_keeps_previous_index() {
        let (device, control) = device();
        device.set_config(&two_frame_config(&device), 0).unwrap();
        control.set_link_down(true);
        assert!(device.switch_frame_configuration(1).is_err());
        assert_eq!(device.active_frame(), 0);
        control.set_link_down(false);
        device.switch_frame_configuration(1).unwrap();
        assert_eq!(device.active_frame(), 1);
    }

    #[test]
    fn test_set_config_busy_while_streaming() {
        let (device, _) = device();
        device.start().unwrap();
        let config = two_frame_config(&device);
        assert!(matches!(device.set_config(&config, 0), Err(RadarError::DeviceBusy)));
    }

    #[test]
    fn test_register_read_back() {
        let (device, _) = device();
        let read_back = device.register_config().unwrap();
        let frame = &read_back.frame_configs[0];
        assert_eq!(frame.selected_pulse_configs, [true, false, false, false]);
        assert_eq!(frame.num_samples, 128);
        assert!((frame.frame_repetition_time_s - 0.256).abs() < 0.01);
    }
}
