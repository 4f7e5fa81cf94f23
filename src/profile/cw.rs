//! Continuous-wave operation of the BGT60 chips
//!
//! The chip runs a single chirp whose start and end frequency coincide, with
//! the ramp bypassed and `MAIN.CW_MODE` set. Baseband settings reuse the
//! [`AvianProfile`] compiler so every FMCW limit applies unchanged; the ADC
//! and test-signal blocks are layered on top of the compiled image.

use super::avian::{AvianProfile, AvianVariant, REFERENCE_CLOCK_HZ};
use super::{DataPlan, SensorInfo};
use crate::error::{RadarError, Result};
use crate::frame::RealCube;
use crate::registers::{RegisterBatch, RegisterImage};
use crate::sequence::{Chirp, CubeShape, Sequence, SequenceElement};
use crate::transport::{DataFormat, DataSettings, ReadoutEntry};
use serde::{Deserialize, Serialize};

const SAMPLE_AND_HOLD_NS: [u32; 4] = [50, 100, 200, 400];
const OVERSAMPLING: [u16; 4] = [0, 2, 4, 8];
const SUBCONVERSIONS: [u16; 4] = [0, 1, 3, 7];

const MIN_TEST_DIVIDER: u32 = 2;
const MAX_TEST_DIVIDER: u32 = 8191;
const DEFAULT_TEST_DIVIDER: u32 = 200;

/// Slices kept by the transport while capturing
const CAPTURE_QUEUE_SIZE: usize = 4;

/// ADC half-scale of a 12-bit sample
const ADC_HALF_SCALE: f32 = 4095.0 / 2.0;

/// MADC settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdcConfig {
    /// 50, 100, 200 or 400 ns
    pub sample_and_hold_time_ns: u32,
    /// 0 (off), 2, 4 or 8
    pub oversampling_factor: u16,
    /// 0, 1, 3 or 7
    pub additional_subconversions: u16,
    pub double_msb_time: bool,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            sample_and_hold_time_ns: 100,
            oversampling_factor: 0,
            additional_subconversions: 1,
            double_msb_time: false,
        }
    }
}

fn code_of<T: PartialEq + Copy + std::fmt::Display>(table: &[T], value: T, what: &str) -> Result<u32> {
    table
        .iter()
        .position(|v| *v == value)
        .map(|i| i as u32)
        .ok_or_else(|| RadarError::ArgumentInvalid(format!("{} {} not supported", what, value)))
}

impl AdcConfig {
    /// `(STC, ADC_OVERS_CFG, TRACK_CFG)` field codes
    pub fn codes(&self) -> Result<(u32, u32, u32)> {
        Ok((
            code_of(&SAMPLE_AND_HOLD_NS, self.sample_and_hold_time_ns, "sample and hold time")?,
            code_of(&OVERSAMPLING, self.oversampling_factor, "oversampling factor")?,
            code_of(&SUBCONVERSIONS, self.additional_subconversions, "subconversion count")?,
        ))
    }

    fn from_codes(stc: u32, overs: u32, track: u32, msb: u32) -> Self {
        Self {
            sample_and_hold_time_ns: SAMPLE_AND_HOLD_NS[(stc & 3) as usize],
            oversampling_factor: OVERSAMPLING[(overs & 3) as usize],
            additional_subconversions: SUBCONVERSIONS[(track & 3) as usize],
            double_msb_time: msb != 0,
        }
    }
}

/// What the on-chip test signal generator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSignalMode {
    #[default]
    Off,
    /// Test tone injected into the enabled IF channels
    BasebandTest,
    ToggleTxEnable,
    ToggleDacValue,
    ToggleRxSelfTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestSignalConfig {
    pub mode: TestSignalMode,
    pub frequency_hz: f64,
}

impl Default for TestSignalConfig {
    fn default() -> Self {
        Self {
            mode: TestSignalMode::Off,
            frequency_hz: REFERENCE_CLOCK_HZ / DEFAULT_TEST_DIVIDER as f64,
        }
    }
}

impl TestSignalConfig {
    /// Clock divider for the requested frequency, clamped to the hardware range
    pub fn divider(&self) -> u32 {
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return MAX_TEST_DIVIDER;
        }
        (REFERENCE_CLOCK_HZ / self.frequency_hz)
            .round()
            .clamp(MIN_TEST_DIVIDER as f64, MAX_TEST_DIVIDER as f64) as u32
    }

    pub fn min_frequency_hz() -> f64 {
        REFERENCE_CLOCK_HZ / MAX_TEST_DIVIDER as f64
    }

    pub fn max_frequency_hz() -> f64 {
        REFERENCE_CLOCK_HZ / MIN_TEST_DIVIDER as f64
    }
}

/// Complete CW configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CwConfig {
    /// Baseband settings; the CW frequency is `start_frequency_hz`
    pub baseband: Chirp,
    pub adc: AdcConfig,
    pub test_signal: TestSignalConfig,
}

/// BGT60 chip driven as a continuous-wave source
#[derive(Debug, Clone)]
pub struct CwProfile {
    avian: AvianProfile,
}

impl CwProfile {
    pub fn new(variant: AvianVariant) -> Result<Self> {
        Ok(Self {
            avian: AvianProfile::new(variant)?,
        })
    }

    pub fn avian(&self) -> &AvianProfile {
        &self.avian
    }

    pub fn avian_mut(&mut self) -> &mut AvianProfile {
        &mut self.avian
    }

    pub fn sensor_info(&self) -> SensorInfo {
        self.avian.sensor_info()
    }

    /// Default baseband at the centre of the RF band
    pub fn default_config(&self) -> CwConfig {
        let traits = self.avian.traits();
        let mut baseband = self.avian.default_config().chirp;
        let centre = (traits.min_rf_hz + traits.max_rf_hz) / 2.0;
        baseband.start_frequency_hz = centre;
        baseband.end_frequency_hz = centre;
        CwConfig {
            baseband,
            adc: AdcConfig::default(),
            test_signal: TestSignalConfig::default(),
        }
    }

    /// Sequence view of a baseband: one unswept chirp per frame
    pub fn to_sequence(baseband: &Chirp) -> Sequence {
        let chirp = Chirp {
            end_frequency_hz: baseband.start_frequency_hz,
            ..baseband.clone()
        };
        Sequence::new(vec![SequenceElement::frame_loop(0.0, vec![SequenceElement::Chirp(chirp)])])
    }

    /// Baseband of a single-chirp sequence; the end frequency is ignored
    pub fn baseband_from_sequence(sequence: &Sequence) -> Result<Chirp> {
        let chirps = sequence.chirps();
        let [chirp] = chirps.as_slice() else {
            return Err(RadarError::NotSupported(format!("{} chirps in a CW sequence", chirps.len())));
        };
        Ok(Chirp {
            end_frequency_hz: chirp.start_frequency_hz,
            ..(*chirp).clone()
        })
    }

    /// Compile a CW configuration into a register batch
    pub fn compile(&self, config: &CwConfig) -> Result<RegisterBatch<u8, u32>> {
        let (stc, overs, track) = config.adc.codes()?;
        let baseband = &config.baseband;
        let mut image = self.avian.compile_image(&Self::to_sequence(baseband))?;

        image.set("MAIN.CW_MODE", 1)?;
        image.set("PDFT0.BYPRMPEN", 1)?;
        image.set("CS1_U_0.PD1_EN", 1)?;
        image.set("CS1_U_0.PD2_EN", 1)?;

        image.set("ADC0.STC", stc)?;
        image.set("ADC0.ADC_OVERS_CFG", overs)?;
        image.set("ADC0.TRACK_CFG", track)?;
        image.set("ADC0.MSB_CTRL", config.adc.double_msb_time as u32)?;

        self.write_test_signal(&mut image, baseband.rx_mask, &config.test_signal)?;

        tracing::debug!(
            "Compiled CW configuration: {:.4} GHz, rx mask {:#b}, test signal {:?}",
            baseband.start_frequency_hz / 1e9,
            baseband.rx_mask,
            config.test_signal.mode
        );
        Ok(image.into_batch())
    }

    fn write_test_signal(&self, image: &mut RegisterImage<'_, u8, u32>, rx_mask: u32, test: &TestSignalConfig) -> Result<()> {
        let num_rx = self.avian.traits().num_rx;
        for rx in 1..=num_rx {
            image.set(&format!("RFT0.TEST_SIG_IF{}_EN", rx), 0)?;
            image.set(&format!("RFT0.TEST_SIG_RF{}_EN", rx), 0)?;
        }
        image.set("RFT0.RF_TEST_MODE", 0)?;

        if test.mode == TestSignalMode::Off {
            image.set("RFT0.RFTSIGCLK_DIV_EN", 0)?;
            return Ok(());
        }

        image.set("RFT0.RFTSIGCLK_DIV", test.divider())?;
        image.set("RFT0.RFTSIGCLK_DIV_EN", 1)?;
        match test.mode {
            TestSignalMode::BasebandTest => {
                for rx in 0..num_rx {
                    if (rx_mask >> rx) & 1 == 0 {
                        continue;
                    }
                    let n = rx + 1;
                    image.set(&format!("RFT0.TEST_SIG_IF{}_EN", n), 1)?;
                    // mixer output would swamp the injected tone
                    image.set(&format!("CS1_U_0.RX{}LOBUF_EN", n), 0)?;
                    image.set(&format!("CS1_U_0.RX{}MIX_EN", n), 0)?;
                }
            }
            TestSignalMode::ToggleTxEnable => image.set("RFT0.RF_TEST_MODE", 1)?,
            TestSignalMode::ToggleDacValue => image.set("RFT0.RF_TEST_MODE", 2)?,
            TestSignalMode::ToggleRxSelfTest => {
                image.set("RFT0.RF_TEST_MODE", 3)?;
                image.set("RFT0.TEST_SIG_RF1_EN", 1)?;
            }
            TestSignalMode::Off => {}
        }
        Ok(())
    }

    /// Reconstruct the CW configuration from a register image
    pub fn decode(&self, image: &RegisterImage<'_, u8, u32>) -> Result<CwConfig> {
        if image.get("MAIN.CW_MODE")? == 0 {
            return Err(RadarError::NotConfigured);
        }
        let sequence = self.avian.decode(image)?;
        let mut baseband = sequence
            .chirps()
            .first()
            .map(|chirp| (*chirp).clone())
            .ok_or(RadarError::NotConfigured)?;
        baseband.end_frequency_hz = baseband.start_frequency_hz;

        let adc = AdcConfig::from_codes(
            image.get("ADC0.STC")?,
            image.get("ADC0.ADC_OVERS_CFG")?,
            image.get("ADC0.TRACK_CFG")?,
            image.get("ADC0.MSB_CTRL")?,
        );

        let divider = image.get("RFT0.RFTSIGCLK_DIV")?.max(MIN_TEST_DIVIDER);
        let mut baseband_test = false;
        for rx in 1..=self.avian.traits().num_rx {
            baseband_test |= image.get(&format!("RFT0.TEST_SIG_IF{}_EN", rx))? != 0;
        }
        let mode = match image.get("RFT0.RF_TEST_MODE")? {
            1 => TestSignalMode::ToggleTxEnable,
            2 => TestSignalMode::ToggleDacValue,
            3 => TestSignalMode::ToggleRxSelfTest,
            _ if image.get("RFT0.RFTSIGCLK_DIV_EN")? != 0 && baseband_test => TestSignalMode::BasebandTest,
            _ => TestSignalMode::Off,
        };

        Ok(CwConfig {
            baseband,
            adc,
            test_signal: TestSignalConfig {
                mode,
                frequency_hz: REFERENCE_CLOCK_HZ / divider as f64,
            },
        })
    }

    /// Readout of one capture: every sample of every enabled receiver in one slice
    pub fn data_plan(&self, baseband: &Chirp) -> Result<DataPlan> {
        let words = baseband.num_rx() * baseband.num_samples as usize;
        if words == 0 {
            return Err(RadarError::ArgumentInvalid("empty capture".to_string()));
        }
        let settings = DataSettings::new(
            DataFormat::Packed12,
            vec![ReadoutEntry::new(super::avian::FIFO_BURST_ADDRESS, words as u32)],
            1,
        );
        let frame_bytes = settings.slice_bytes;
        Ok(DataPlan::single(settings, frame_bytes, CAPTURE_QUEUE_SIZE))
    }

    /// Shape of a captured frame: `(num_rx, 1, num_samples)`
    pub fn frame_shape(baseband: &Chirp) -> CubeShape {
        CubeShape::new(baseband.num_rx(), 1, baseband.num_samples as usize)
    }

    /// De-interleave raw words into a `[-1, 1]` cube
    pub fn decode_samples(words: &[u16], shape: CubeShape) -> Result<RealCube> {
        if words.len() != shape.len() {
            return Err(RadarError::DimensionMismatch {
                expected: vec![shape.len()],
                actual: vec![words.len()],
            });
        }
        let mut cube = RealCube::zeros(shape);
        for (index, raw) in words.iter().enumerate() {
            let sample = index / shape.rx;
            let rx = index % shape.rx;
            cube.set(rx, 0, sample, *raw as f32 / ADC_HALF_SCALE - 1.0);
        }
        Ok(cube)
    }
}
