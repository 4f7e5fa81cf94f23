//! Frames handed to callers
//!
//! A frame is either a list of real cubes (FMCW, CW, one per shape) or one
//! complex cube (pulsed sensors), plus a [`FrameMetadata`] record. Cubes are
//! row-major over `(rx, slow time, sample)`.
//!
//! The per-device [`MetadataCache`] keeps what the assembler needs between
//! frames: last AGC/AOC/AFC readings, the previous timestamp for the
//! active/low-power decision, a running power average and a TTL-bound
//! temperature reading.

use crate::error::{RadarError, Result};
use crate::sequence::CubeShape;
use num_complex::Complex32;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Dense 3-D array over `(rx, slow time, sample)`
#[derive(Debug, Clone, PartialEq)]
pub struct Cube<T> {
    shape: CubeShape,
    data: Vec<T>,
}

pub type RealCube = Cube<f32>;
pub type ComplexCube = Cube<Complex32>;

impl<T: Copy + Default> Cube<T> {
    pub fn zeros(shape: CubeShape) -> Self {
        Self {
            shape,
            data: vec![T::default(); shape.len()],
        }
    }

    /// Wrap row-major data, rejecting a length that does not match `shape`
    pub fn from_vec(shape: CubeShape, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(RadarError::DimensionMismatch {
                expected: shape.dims(),
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    #[inline]
    fn offset(&self, rx: usize, slow: usize, sample: usize) -> usize {
        (rx * self.shape.slow_time + slow) * self.shape.samples + sample
    }

    #[inline]
    pub fn get(&self, rx: usize, slow: usize, sample: usize) -> T {
        self.data[self.offset(rx, slow, sample)]
    }

    #[inline]
    pub fn set(&mut self, rx: usize, slow: usize, sample: usize, value: T) {
        let offset = self.offset(rx, slow, sample);
        self.data[offset] = value;
    }

    /// Samples of one chirp or pulse on one receiver
    pub fn row(&self, rx: usize, slow: usize) -> &[T] {
        let start = self.offset(rx, slow, 0);
        &self.data[start..start + self.shape.samples]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Overwrite the samples in place from a cube of the same shape
    pub fn copy_from(&mut self, other: &Cube<T>) -> Result<()> {
        if other.shape != self.shape {
            return Err(RadarError::DimensionMismatch {
                expected: self.shape.dims(),
                actual: other.shape.dims(),
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }
}

/// Sample payload of a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Real(Vec<RealCube>),
    Complex(ComplexCube),
}

impl FrameData {
    pub fn shapes(&self) -> Vec<CubeShape> {
        match self {
            FrameData::Real(cubes) => cubes.iter().map(Cube::shape).collect(),
            FrameData::Complex(cube) => vec![cube.shape()],
        }
    }
}

/// AFC reading packed as `(value, 24-bit counter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AfcReading {
    pub value: u32,
    pub counter: u32,
}

/// Per-frame metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FrameMetadata {
    /// Sensor timestamp of the first slice of the frame (µs)
    pub timestamp_us: u64,
    /// On-chip frame counter, where the sensor has one
    pub frame_counter: Option<u32>,
    /// `false` while a pulsed sensor runs in low-power mode
    pub active: bool,
    /// Running average of the estimated power consumption (mW)
    pub avg_power_mw: f64,
    /// Internal detector: target present
    pub motion: Option<bool>,
    /// Internal detector: target approaching
    pub direction_approaching: Option<bool>,
    /// ABB gain index of each pulse configuration
    pub abb_gains: [u8; 4],
    /// AOC `[I, Q]` offsets of each pulse configuration
    pub aoc_offsets: [[i16; 2]; 4],
    pub afc: Option<AfcReading>,
}

/// One acquired frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: FrameData,
    pub metadata: FrameMetadata,
}

impl Frame {
    pub fn new(data: FrameData, metadata: FrameMetadata) -> Self {
        Self { data, metadata }
    }

    /// Zero-filled real frame, e.g. for a caller-owned buffer
    pub fn real(shapes: &[CubeShape]) -> Self {
        Self::new(
            FrameData::Real(shapes.iter().map(|s| RealCube::zeros(*s)).collect()),
            FrameMetadata::default(),
        )
    }

    pub fn complex(shape: CubeShape) -> Self {
        Self::new(FrameData::Complex(ComplexCube::zeros(shape)), FrameMetadata::default())
    }

    pub fn shapes(&self) -> Vec<CubeShape> {
        self.data.shapes()
    }

    /// Fail with `DimensionMismatch` unless the frame has exactly `expected` cubes
    pub fn check_shape(&self, expected: &[CubeShape]) -> Result<()> {
        let actual = self.shapes();
        if actual != expected {
            return Err(RadarError::DimensionMismatch {
                expected: expected.iter().flat_map(CubeShape::dims).collect(),
                actual: actual.iter().flat_map(CubeShape::dims).collect(),
            });
        }
        Ok(())
    }

    /// Copy `other` into this frame's buffers without reallocating them
    pub fn fill_from(&mut self, other: &Frame) -> Result<()> {
        self.check_shape(&other.shapes())?;
        match (&mut self.data, &other.data) {
            (FrameData::Real(cubes), FrameData::Real(source)) => {
                for (cube, src) in cubes.iter_mut().zip(source) {
                    cube.copy_from(src)?;
                }
            }
            (FrameData::Complex(cube), FrameData::Complex(src)) => cube.copy_from(src)?,
            _ => {
                return Err(RadarError::ArgumentInvalid(
                    "real and complex frames cannot be mixed".to_string(),
                ))
            }
        }
        self.metadata.clone_from(&other.metadata);
        Ok(())
    }

    pub fn real_cubes(&self) -> Option<&[RealCube]> {
        match &self.data {
            FrameData::Real(cubes) => Some(cubes),
            FrameData::Complex(_) => None,
        }
    }

    pub fn complex_cube(&self) -> Option<&ComplexCube> {
        match &self.data {
            FrameData::Complex(cube) => Some(cube),
            FrameData::Real(_) => None,
        }
    }
}

/// Running mean of per-frame power estimates
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerAverage {
    mean: f64,
    count: u64,
}

impl PowerAverage {
    pub fn update(&mut self, sample_mw: f64) -> f64 {
        self.count += 1;
        self.mean += (sample_mw - self.mean) / self.count as f64;
        self.mean
    }

    pub fn value(&self) -> f64 {
        self.mean
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A temperature reading that expires after a TTL
#[derive(Debug, Clone)]
pub struct TemperatureCache {
    ttl: Duration,
    last: Option<(Instant, f64)>,
}

impl TemperatureCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, last: None }
    }

    /// Cached value while fresh, otherwise `measure` and remember the result
    pub fn get_or_measure(&mut self, measure: impl FnOnce() -> Result<f64>) -> Result<f64> {
        if let Some((at, value)) = self.last {
            if at.elapsed() < self.ttl {
                return Ok(value);
            }
        }
        let value = measure()?;
        self.last = Some((Instant::now(), value));
        Ok(value)
    }

    pub fn invalidate(&mut self) {
        self.last = None;
    }
}

/// State the frame assembler carries from one frame to the next
#[derive(Debug, Clone, Default)]
pub struct MetadataCache {
    pub abb_gains: [u8; 4],
    pub aoc_offsets: [[i16; 2]; 4],
    pub afc: Option<AfcReading>,
    pub last_timestamp_us: Option<u64>,
    pub power: PowerAverage,
}

impl MetadataCache {
    /// Whether a frame at `timestamp_us` follows the previous one within
    /// `active_period_us`; the first frame counts as active
    pub fn observe_timestamp(&mut self, timestamp_us: u64, active_period_us: u64) -> bool {
        let active = match self.last_timestamp_us {
            Some(previous) => timestamp_us.saturating_sub(previous) < active_period_us,
            None => true,
        };
        self.last_timestamp_us = Some(timestamp_us);
        active
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_indexing_is_row_major() {
        let shape = CubeShape::new(2, 3, 4);
        let data: Vec<f32> = (0..24).map(|v| v as f32).collect();
        let cube = RealCube::from_vec(shape, data).unwrap();
        assert_eq!(cube.get(0, 0, 3), 3.0);
        assert_eq!(cube.get(0, 1, 0), 4.0);
        assert_eq!(cube.get(1, 0, 0), 12.0);
        assert_eq!(cube.row(1, 2), &[20.0, 21.0, 22.0, 23.0]);
        assert!(RealCube::from_vec(shape, vec![0.0; 5]).is_err());
    }

    #[test]
    fn test_frame_shape_check() {
        let shapes = [CubeShape::new(1, 64, 128)];
        let frame = Frame::real(&shapes);
        assert!(frame.check_shape(&shapes).is_ok());
        let err = frame.check_shape(&[CubeShape::new(1, 32, 128)]).unwrap_err();
        assert!(matches!(err, RadarError::DimensionMismatch { .. }));
        assert!(frame.complex_cube().is_none());

        let pulsed = Frame::complex(CubeShape::new(1, 2, 64));
        assert_eq!(pulsed.shapes(), vec![CubeShape::new(1, 2, 64)]);
    }

    #[test]
    fn test_fill_from_reuses_buffers() {
        let shape = CubeShape::new(1, 2, 2);
        let source = Frame::new(
            FrameData::Real(vec![RealCube::from_vec(shape, vec![1.0, 2.0, 3.0, 4.0]).unwrap()]),
            FrameMetadata {
                timestamp_us: 42,
                ..FrameMetadata::default()
            },
        );
        let mut target = Frame::real(&[shape]);
        let buffer = target.real_cubes().unwrap()[0].as_slice().as_ptr();
        target.fill_from(&source).unwrap();
        assert_eq!(target, source);
        assert_eq!(target.real_cubes().unwrap()[0].as_slice().as_ptr(), buffer);

        assert!(matches!(
            Frame::complex(shape).fill_from(&source),
            Err(RadarError::ArgumentInvalid(_))
        ));
        assert!(matches!(
            Frame::real(&[CubeShape::new(1, 1, 4)]).fill_from(&source),
            Err(RadarError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_power_average() {
        let mut power = PowerAverage::default();
        power.update(2.0);
        power.update(4.0);
        assert_eq!(power.update(6.0), 4.0);
        power.reset();
        assert_eq!(power.value(), 0.0);
    }

    #[test]
    fn test_active_flag_from_timestamps() {
        let mut cache = MetadataCache::default();
        assert!(cache.observe_timestamp(1_000, 500));
        assert!(cache.observe_timestamp(1_400, 500));
        assert!(!cache.observe_timestamp(2_400, 500));
    }

    #[test]
    fn test_temperature_cache_ttl() {
        let mut cache = TemperatureCache::new(Duration::from_secs(60));
        assert_eq!(cache.get_or_measure(|| Ok(21.0)).unwrap(), 21.0);
        // fresh value is reused
        assert_eq!(cache.get_or_measure(|| Ok(99.0)).unwrap(), 21.0);
        cache.invalidate();
        assert!(cache.get_or_measure(|| Err(RadarError::Timeout)).is_err());

        let mut expired = TemperatureCache::new(Duration::ZERO);
        expired.get_or_measure(|| Ok(1.0)).unwrap();
        assert_eq!(expired.get_or_measure(|| Ok(2.0)).unwrap(), 2.0);
    }
}
