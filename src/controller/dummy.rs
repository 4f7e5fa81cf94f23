//! Board-less Avian device
//!
//! Compiles sequences exactly like [`FmcwDevice`](super::FmcwDevice) but
//! writes into register memory instead of a baseboard. Used to export
//! register lists for firmware that programs the chip itself.

use super::{lock, DeviceState, RadarDevice};
use crate::error::{RadarError, Result};
use crate::frame::Frame;
use crate::profile::avian::{AvianProfile, AvianVariant};
use crate::profile::SensorInfo;
use crate::registers::{RegisterAccess, RegisterBatch};
use crate::sequence::{CubeShape, Sequence, SimpleSequenceConfig};
use crate::transport::{BoardInfo, FirmwareInfo};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Register memory standing in for a chip
#[derive(Debug, Default)]
struct RegisterMemory {
    registers: BTreeMap<u8, u32>,
}

impl RegisterAccess<u8, u32> for RegisterMemory {
    fn read(&mut self, address: u8) -> Result<u32> {
        Ok(self.registers.get(&address).copied().unwrap_or(0))
    }

    fn write(&mut self, address: u8, value: u32) -> Result<()> {
        self.registers.insert(address, value);
        Ok(())
    }

    fn read_burst(&mut self, address: u8, count: usize) -> Result<Vec<u32>> {
        (0..count).map(|i| self.read(address.wrapping_add(i as u8))).collect()
    }

    fn write_burst(&mut self, address: u8, values: &[u32]) -> Result<()> {
        for (i, value) in values.iter().enumerate() {
            self.write(address.wrapping_add(i as u8), *value)?;
        }
        Ok(())
    }
}

struct DummyInner {
    profile: AvianProfile,
    memory: RegisterMemory,
    sequence: Option<Sequence>,
    batch: Option<RegisterBatch<u8, u32>>,
}

/// Avian compiler without hardware
pub struct DummyDevice {
    inner: Mutex<DummyInner>,
    info: SensorInfo,
}

impl DummyDevice {
    pub fn new(variant: AvianVariant) -> Result<Self> {
        let profile = AvianProfile::new(variant)?;
        Ok(Self {
            info: profile.sensor_info(),
            inner: Mutex::new(DummyInner {
                profile,
                memory: RegisterMemory::default(),
                sequence: None,
                batch: None,
            }),
        })
    }

    pub fn variant(&self) -> AvianVariant {
        lock(&self.inner).profile.variant()
    }

    pub fn set_simple_config(&self, config: &SimpleSequenceConfig) -> Result<()> {
        self.set_sequence(&config.to_sequence())
    }

    /// `(address, value)` of every register the last configuration writes, ascending
    pub fn register_list(&self) -> Result<Vec<(u8, u32)>> {
        let inner = lock(&self.inner);
        let batch = inner.batch.as_ref().ok_or(RadarError::NotConfigured)?;
        let mut list = batch.full_writes();
        list.sort_by_key(|(address, _)| *address);
        Ok(list)
    }

    /// Value held in register memory at `address`
    pub fn register(&self, address: u8) -> Option<u32> {
        lock(&self.inner).memory.registers.get(&address).copied()
    }
}

impl RadarDevice for DummyDevice {
    fn sensor_info(&self) -> SensorInfo {
        self.info.clone()
    }

    fn board_info(&self) -> BoardInfo {
        BoardInfo {
            sensor_type: self.info.description.clone(),
            board_type: "none".to_string(),
            uuid: String::new(),
            port: String::new(),
        }
    }

    fn firmware_info(&self) -> FirmwareInfo {
        FirmwareInfo::new(0, 0, 0, "none")
    }

    fn state(&self) -> DeviceState {
        if lock(&self.inner).batch.is_some() {
            DeviceState::Configured
        } else {
            DeviceState::Ready
        }
    }

    fn set_sequence(&self, sequence: &Sequence) -> Result<()> {
        let mut inner = lock(&self.inner);
        let DummyInner {
            profile,
            memory,
            sequence: running,
            batch: last,
        } = &mut *inner;
        let batch = profile.compile(sequence)?;
        profile.map_mut().write_batch(memory, &batch)?;
        *running = Some(profile.decode(&profile.map().cached_image())?);
        tracing::debug!("Dummy {} compiled {} register writes", profile.variant(), batch.len());
        *last = Some(batch);
        Ok(())
    }

    fn sequence(&self) -> Result<Sequence> {
        lock(&self.inner).sequence.clone().ok_or(RadarError::NotConfigured)
    }

    fn frame_shape(&self) -> Result<Vec<CubeShape>> {
        Ok(self.sequence()?.frame_shape())
    }

    fn start(&self) -> Result<()> {
        Err(RadarError::NotSupported("acquisition on a dummy device".to_string()))
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn get_next_frame(&self, _timeout: Option<Duration>) -> Result<Frame> {
        Err(RadarError::NotSupported("acquisition on a dummy device".to_string()))
    }

    fn interrupt(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_list_follows_config() {
        let device = DummyDevice::new(AvianVariant::Bgt60Tr13c).unwrap();
        assert_eq!(device.state(), DeviceState::Ready);
        assert!(matches!(device.register_list(), Err(RadarError::NotConfigured)));

        device.set_simple_config(&SimpleSequenceConfig::default()).unwrap();
        assert_eq!(device.state(), DeviceState::Configured);
        let list = device.register_list().unwrap();
        assert!(!list.is_empty());
        assert!(list.windows(2).all(|w| w[0].0 < w[1].0));
        for (address, value) in &list {
            assert_eq!(device.register(*address), Some(*value));
        }
        // trigger bit left clear
        let main = list.iter().find(|(address, _)| *address == 0x00).map(|(_, v)| *v).unwrap();
        assert_eq!(main & 1, 0);
    }

    #[test]
    fn test_sequence_read_back() {
        let device = DummyDevice::new(AvianVariant::Bgt60Tr13c).unwrap();
        let config = SimpleSequenceConfig::default();
        device.set_simple_config(&config).unwrap();
        let read_back = SimpleSequenceConfig::from_sequence(&device.sequence().unwrap()).unwrap();
        assert_eq!(read_back.num_chirps, config.num_chirps);
        assert_eq!(read_back.chirp.num_samples, config.chirp.num_samples);
        assert_eq!(device.frame_shape().unwrap(), config.to_sequence().frame_shape());
    }

    #[test]
    fn test_acquisition_not_supported() {
        let device = DummyDevice::new(AvianVariant::Bgt60Utr11aip).unwrap();
        assert!(matches!(device.start(), Err(RadarError::NotSupported(_))));
        assert!(matches!(device.get_next_frame(None), Err(RadarError::NotSupported(_))));
        assert!(matches!(device.temperature(), Err(RadarError::NotSupported(_))));
    }
}
