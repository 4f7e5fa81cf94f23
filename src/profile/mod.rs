//! Sensor profiles
//!
//! A profile carries everything that differs between sensor families: the
//! register map binding, numeric limits, the timing model, defaults, and the
//! compiler that lowers a [`crate::sequence::Sequence`] (or a native
//! configuration) into a register batch. Profiles never touch a transport;
//! they compute register images and decode them back, so every compiler is
//! usable off-line (the configurator CLI relies on this).
//!
//! # Families
//!
//! - [`avian::AvianProfile`] - BGT60 FMCW sensors (TR13C, ATR24C, UTR13D, UTR11AIP)
//! - [`cw::CwProfile`] - the same chips driven as continuous-wave sources
//! - [`ltr11::Ltr11Profile`] - BGT60LTR11 pulsed Doppler
//! - [`mimose::MimoseProfile`] - BGT24ATR22 pulsed radar

pub mod avian;
pub mod cw;
pub mod ltr11;
pub mod mimose;
pub mod timing;

use crate::error::{RadarError, Result};
use crate::transport::{DataFormat, DataSettings, SliceStatus};
use serde::Serialize;

/// Seconds of frames the transport queue should be able to hold
pub const QUEUE_SECONDS: f64 = 10.0;

/// Sensor family behind a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorFamily {
    Avian(avian::AvianVariant),
    Ltr11,
    Mimose,
}

impl SensorFamily {
    /// Classify the sensor type string a board reports
    pub fn from_sensor_type(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        if upper.contains("LTR11") {
            return Some(SensorFamily::Ltr11);
        }
        if upper.contains("ATR22") {
            return Some(SensorFamily::Mimose);
        }
        avian::AvianVariant::from_name(&upper).map(SensorFamily::Avian)
    }
}

/// Static description of a sensor, as reported to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorInfo {
    pub description: String,
    pub min_rf_frequency_hz: f64,
    pub max_rf_frequency_hz: f64,
    pub num_tx_antennas: u32,
    pub num_rx_antennas: u32,
    /// Highest TX power level accepted by `tx_power_level`
    pub max_tx_power: u32,
    pub device_id: u64,
    pub max_num_samples_per_chirp: u32,
    pub min_adc_sampling_rate_hz: f64,
    pub max_adc_sampling_rate_hz: f64,
    pub hp_cutoff_list: Vec<i32>,
    pub lp_cutoff_list: Vec<i32>,
    pub if_gain_list: Vec<i32>,
}

/// How a family maps slice status codes to error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// FIFO-based sensors (Avian, LTR11)
    Framed,
    /// Memory-mapped pulsed sensors (Mimose)
    Pulsed,
}

impl StatusPolicy {
    /// `Ok(())` for a clean slice, the matching kind otherwise
    pub fn check(&self, status: SliceStatus) -> Result<()> {
        if status.is_ok() {
            return Ok(());
        }
        let error = match (self, status) {
            (StatusPolicy::Framed, SliceStatus::FrameDropped)
            | (StatusPolicy::Framed, SliceStatus::PoolDepleted)
            | (StatusPolicy::Framed, SliceStatus::QueueTrimmed) => RadarError::FrameAcquisitionFailed,
            (StatusPolicy::Framed, SliceStatus::SizeExceeded) => RadarError::FrameSizeNotSupported,
            (StatusPolicy::Framed, SliceStatus::FifoOverflow) => RadarError::FifoOverflow,
            (StatusPolicy::Pulsed, SliceStatus::PoolDepleted) => RadarError::InsufficientMemory,
            (StatusPolicy::Pulsed, SliceStatus::FrameDropped) => {
                RadarError::Communication("frame dropped by the baseboard".to_string())
            }
            (StatusPolicy::Pulsed, SliceStatus::LowLevel) | (StatusPolicy::Pulsed, SliceStatus::QueueTrimmed) => {
                RadarError::FrameAcquisitionFailed
            }
            (_, other) => RadarError::Generic(format!("slice status {}", other)),
        };
        Err(error)
    }
}

/// How the baseboard harvests one frame
#[derive(Debug, Clone, PartialEq)]
pub struct DataPlan {
    /// Data channels with their readout, started in order
    pub channels: Vec<(u8, DataSettings)>,
    /// Bytes that make up one frame, over all channels
    pub frame_bytes: usize,
    /// Transport queue depth in slices
    pub queue_size: usize,
}

impl DataPlan {
    /// Single-channel plan
    pub fn single(settings: DataSettings, frame_bytes: usize, queue_size: usize) -> Self {
        Self {
            channels: vec![(0, settings)],
            frame_bytes,
            queue_size,
        }
    }

    pub fn format(&self) -> DataFormat {
        self.channels
            .first()
            .map(|(_, settings)| settings.format)
            .unwrap_or_default()
    }

    /// Largest slice any channel produces
    pub fn max_slice_bytes(&self) -> usize {
        self.channels
            .iter()
            .map(|(_, settings)| settings.slice_bytes)
            .max()
            .unwrap_or(0)
    }
}

/// Slice queue depth holding about [`QUEUE_SECONDS`] of frames
pub fn queue_size_for(frame_period_s: f64) -> usize {
    if !frame_period_s.is_finite() || frame_period_s <= 0.0 {
        return 1;
    }
    ((QUEUE_SECONDS / frame_period_s).ceil() as usize).max(1)
}

/// Entry of `list` closest to `value`; ties keep the earlier entry
pub fn snap_to_nearest(list: &[i32], value: i32) -> Option<(usize, i32)> {
    list.iter()
        .copied()
        .enumerate()
        .min_by_key(|(_, candidate)| (*candidate as i64 - value as i64).abs())
}

pub(crate) fn check_range<T: PartialOrd + Copy>(value: T, min: T, max: T, error: impl FnOnce() -> RadarError) -> Result<()> {
    if value < min || value > max {
        Err(error())
    } else {
        Ok(())
    }
}
