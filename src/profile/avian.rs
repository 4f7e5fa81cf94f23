//! Avian BGT60 FMCW profile
//!
//! Lowers single-shape and TDM-MIMO sequences onto the chip's shape 1
//! registers and decodes the registers back into the sequence that is
//! actually running.
//!
//! # Quantisation
//!
//! - Sample rate: `80 MHz / ADC_DIV`, `ADC_DIV` rounded to nearest
//! - Frequencies: 20 fractional PLL bits of `640 MHz`, ramp step rounded
//! - Chirp and frame repetition: scaled timers (8-bit counter, 5-bit shift)
//! - IF gain: 18/30 dB high-pass gain plus 5-dB VGA steps
//! - Cut-offs: nearest entry of the variant's tables
//!
//! # Sequence structure
//!
//! ```text
//! Loop(frames, frame period)
//!   Loop(2^k chirps, chirp period)   (optional)
//!     Chirp                          single shape
//!     Chirp, Chirp                   TDM MIMO, TX masks 0b01 then 0b10
//! ```

use super::timing::{seconds_to_cycles, ScaledTimer};
use super::{check_range, queue_size_for, snap_to_nearest, DataPlan, SensorInfo};
use crate::codec::ExpMantissa;
use crate::error::{RadarError, Result};
use crate::frame::RealCube;
use crate::registers::{layouts, RegisterBatch, RegisterImage, RegisterMap};
use crate::sequence::{Chirp, ChirpProfile, CubeShape, Sequence, SequenceElement, SimpleSequenceConfig};
use crate::transport::{DataFormat, DataSettings, ReadoutEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Reference clock of the chip
pub const REFERENCE_CLOCK_HZ: f64 = 80.0e6;
const PLL_PRE_DIVIDER: f64 = 8.0;
const PLL_DIVSET: f64 = 20.0;
const PLL_FRACTION: f64 = (1u32 << 20) as f64;

// Chirp timing in units of 8 reference cycles
const TR_PAEN: u32 = 30;
const TR_SSTART: u32 = 5;
const TR_END: u32 = 20;
const MAX_RTU: u32 = 0x3FFF;

const WAKE_UP_TIME_S: f64 = 100e-6;
const INIT1_TIME_S: f64 = 50e-6;

pub const MIN_SAMPLE_RATE_HZ: f64 = 78.201e3;
pub const MAX_SAMPLE_RATE_HZ: f64 = 4.0e6;
pub const MAX_NUM_SAMPLES: u32 = 4095;
pub const MAX_TX_POWER: u32 = 31;
pub const MIN_IF_GAIN_DB: i32 = 18;
pub const MAX_IF_GAIN_DB: i32 = 60;
const MAX_REPS_EXPONENT: u32 = 15;
const MAX_FRAME_COUNT: u32 = 0xFFF;
const VGA_STEP_DB: i32 = 5;
const MAX_VGA_INDEX: i32 = 6;

/// Burst address the baseboard reads the sample FIFO from
pub const FIFO_BURST_ADDRESS: u32 = 0x60;

/// Slices per second above which slices are enlarged
pub const MAX_SLICE_RATE_HZ: f64 = 20.0;

/// Full scale of the 12-bit ADC
const ADC_FULL_SCALE: f32 = 4095.0;

pub const TEMPERATURE_TTL: Duration = Duration::from_millis(100);
/// SADC channel wired to the temperature sensor
pub const TEMPERATURE_CHANNEL: u32 = 0;

/// Supported Avian chips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvianVariant {
    Bgt60Tr13c,
    Bgt60Atr24c,
    Bgt60Utr13d,
    Bgt60Utr11aip,
}

/// Fixed properties of one variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariantTraits {
    pub name: &'static str,
    pub description: &'static str,
    pub min_rf_hz: f64,
    pub max_rf_hz: f64,
    pub num_tx: u32,
    pub num_rx: u32,
    /// FIFO depth in samples
    pub fifo_words: usize,
    pub hp_cutoffs: &'static [i32],
    pub aaf_cutoffs: &'static [i32],
    pub has_temperature_sensor: bool,
}

const HPF_C: &[i32] = &[20_000, 45_000, 70_000, 80_000];
const HPF_D: &[i32] = &[20_000, 40_000, 80_000, 140_000, 160_000];
const AAF_C: &[i32] = &[500_000];
const AAF_D: &[i32] = &[600_000, 1_000_000];

impl AvianVariant {
    pub const ALL: [AvianVariant; 4] = [
        AvianVariant::Bgt60Tr13c,
        AvianVariant::Bgt60Atr24c,
        AvianVariant::Bgt60Utr13d,
        AvianVariant::Bgt60Utr11aip,
    ];

    pub fn traits(&self) -> &'static VariantTraits {
        match self {
            AvianVariant::Bgt60Tr13c => &VariantTraits {
                name: "BGT60TR13C",
                description: "BGT60TR13C FMCW Radar Sensor",
                min_rf_hz: 58.0e9,
                max_rf_hz: 63.5e9,
                num_tx: 1,
                num_rx: 3,
                fifo_words: 8192,
                hp_cutoffs: HPF_C,
                aaf_cutoffs: AAF_C,
                has_temperature_sensor: true,
            },
            AvianVariant::Bgt60Atr24c => &VariantTraits {
                name: "BGT60ATR24C",
                description: "BGT60ATR24C FMCW Radar Sensor",
                min_rf_hz: 58.0e9,
                max_rf_hz: 63.5e9,
                num_tx: 2,
                num_rx: 4,
                fifo_words: 8192,
                hp_cutoffs: HPF_C,
                aaf_cutoffs: AAF_C,
                has_temperature_sensor: true,
            },
            AvianVariant::Bgt60Utr13d => &VariantTraits {
                name: "BGT60UTR13D",
                description: "BGT60UTR13DAIP FMCW Radar Sensor",
                min_rf_hz: 57.8e9,
                max_rf_hz: 63.5e9,
                num_tx: 1,
                num_rx: 3,
                fifo_words: 8192,
                hp_cutoffs: HPF_D,
                aaf_cutoffs: AAF_D,
                has_temperature_sensor: true,
            },
            AvianVariant::Bgt60Utr11aip => &VariantTraits {
                name: "BGT60UTR11AIP",
                description: "BGT60UTR11AIP FMCW Radar Sensor",
                min_rf_hz: 57.4e9,
                max_rf_hz: 63.0e9,
                num_tx: 1,
                num_rx: 1,
                fifo_words: 2048,
                hp_cutoffs: HPF_D,
                aaf_cutoffs: AAF_D,
                has_temperature_sensor: false,
            },
        }
    }

    /// Match a sensor type string, e.g. `"BGT60TR13C"`
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        if upper.contains("ATR24C") {
            Some(AvianVariant::Bgt60Atr24c)
        } else if upper.contains("UTR13D") {
            Some(AvianVariant::Bgt60Utr13d)
        } else if upper.contains("UTR11") {
            Some(AvianVariant::Bgt60Utr11aip)
        } else if upper.contains("TR13C") {
            Some(AvianVariant::Bgt60Tr13c)
        } else {
            None
        }
    }
}

impl fmt::Display for AvianVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.traits().name)
    }
}

impl FromStr for AvianVariant {
    type Err = RadarError;

    fn from_str(s: &str) -> Result<Self> {
        AvianVariant::from_name(s).ok_or_else(|| RadarError::DeviceNotSupported(s.to_string()))
    }
}

/// IF gain realised as high-pass gain plus VGA steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GainSplit {
    pub hp_30db: bool,
    pub vga_index: u32,
}

impl GainSplit {
    /// Split an IF gain; the remainder over the HP gain rounds up at 3 dB
    pub fn from_db(if_gain_db: i32) -> Result<Self> {
        check_range(if_gain_db, MIN_IF_GAIN_DB, MAX_IF_GAIN_DB, || RadarError::IfGainOutOfRange)?;
        let hp_30db = if_gain_db >= 30;
        let left = if_gain_db - if hp_30db { 30 } else { 18 };
        let mut vga = left / VGA_STEP_DB;
        if left % VGA_STEP_DB >= 3 {
            vga += 1;
        }
        Ok(Self {
            hp_30db,
            vga_index: vga.min(MAX_VGA_INDEX) as u32,
        })
    }

    pub fn db(&self) -> i32 {
        let hp = if self.hp_30db { 30 } else { 18 };
        hp + self.vga_index as i32 * VGA_STEP_DB
    }
}

/// Every IF gain the chip can realise, ascending
pub fn if_gain_list() -> Vec<i32> {
    let mut list: Vec<i32> = [18, 30]
        .iter()
        .flat_map(|hp| (0..=MAX_VGA_INDEX).map(move |vga| hp + vga * VGA_STEP_DB))
        .collect();
    list.sort_unstable();
    list.dedup();
    list
}

/// `SADC_RESULT` reading to degrees Celsius
pub fn temperature_from_raw(raw: u32) -> f64 {
    let volts = raw as f64 * 1.21 / 1023.0;
    (volts - 0.78984) / 0.00286
}

/// Informational figures of a simple FMCW sequence
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub range_resolution_m: f64,
    pub max_range_m: f64,
    pub max_speed_m_s: f64,
    pub speed_resolution_m_s: f64,
    pub center_frequency_hz: f64,
}

const SPEED_OF_LIGHT: f64 = 299_792_458.0;

impl Metrics {
    pub fn from_config(config: &SimpleSequenceConfig) -> Self {
        let chirp = &config.chirp;
        let bandwidth = chirp.bandwidth_hz().abs().max(1.0);
        let center = (chirp.start_frequency_hz + chirp.end_frequency_hz) / 2.0;
        let wavelength = SPEED_OF_LIGHT / center;
        let range_resolution_m = SPEED_OF_LIGHT / (2.0 * bandwidth);
        let chirp_period = config.chirp_repetition_time_s.max(f64::MIN_POSITIVE);
        let max_speed_m_s = wavelength / (4.0 * chirp_period);
        Self {
            range_resolution_m,
            max_range_m: range_resolution_m * chirp.num_samples as f64 / 2.0,
            max_speed_m_s,
            speed_resolution_m_s: 2.0 * max_speed_m_s / config.num_chirps.max(1) as f64,
            center_frequency_hz: center,
        }
    }
}

/// The parts of a sequence the chip FSM can express
#[derive(Debug, Clone)]
struct ShapePlan<'s> {
    frame_period_s: f64,
    num_frames: u32,
    chirp_period_s: f64,
    num_chirps: u32,
    chirps: Vec<&'s Chirp>,
}

impl ShapePlan<'_> {
    fn is_tdm(&self) -> bool {
        self.chirps.len() == 2
    }
}

fn chirps_of(body: &[SequenceElement]) -> Result<Vec<&Chirp>> {
    body.iter()
        .map(|element| match element {
            SequenceElement::Chirp(chirp) => Ok(chirp),
            SequenceElement::Delay { .. } => Err(RadarError::NotSupported("delays inside a frame".to_string())),
            SequenceElement::Loop { .. } => Err(RadarError::NotSupported("more than two nested loops".to_string())),
        })
        .collect()
}

fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

/// BGT60 FMCW sensor profile
#[derive(Debug, Clone)]
pub struct AvianProfile {
    variant: AvianVariant,
    map: RegisterMap<u8, u32>,
    max_slice_rate_hz: f64,
}

impl AvianProfile {
    pub fn new(variant: AvianVariant) -> Result<Self> {
        let map = RegisterMap::from_description(&layouts::avian_d())?;
        Ok(Self {
            variant,
            map,
            max_slice_rate_hz: MAX_SLICE_RATE_HZ,
        })
    }

    /// Cap on slices per second used when sizing slices
    pub fn set_max_slice_rate(&mut self, rate_hz: f64) {
        if rate_hz.is_finite() && rate_hz > 0.0 {
            self.max_slice_rate_hz = rate_hz;
        }
    }

    pub fn variant(&self) -> AvianVariant {
        self.variant
    }

    pub fn traits(&self) -> &'static VariantTraits {
        self.variant.traits()
    }

    pub fn map(&self) -> &RegisterMap<u8, u32> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut RegisterMap<u8, u32> {
        &mut self.map
    }

    pub fn sensor_info(&self) -> SensorInfo {
        let traits = self.traits();
        SensorInfo {
            description: traits.description.to_string(),
            min_rf_frequency_hz: traits.min_rf_hz,
            max_rf_frequency_hz: traits.max_rf_hz,
            num_tx_antennas: traits.num_tx,
            num_rx_antennas: traits.num_rx,
            max_tx_power: MAX_TX_POWER,
            device_id: 0,
            max_num_samples_per_chirp: MAX_NUM_SAMPLES,
            min_adc_sampling_rate_hz: MIN_SAMPLE_RATE_HZ,
            max_adc_sampling_rate_hz: MAX_SAMPLE_RATE_HZ,
            hp_cutoff_list: traits.hp_cutoffs.to_vec(),
            lp_cutoff_list: traits.aaf_cutoffs.to_vec(),
            if_gain_list: if_gain_list(),
        }
    }

    /// Simple configuration the device starts with
    pub fn default_config(&self) -> SimpleSequenceConfig {
        let traits = self.traits();
        let mut config = SimpleSequenceConfig::default();
        config.chirp.lp_cutoff_hz = traits.aaf_cutoffs[0];
        config.chirp.hp_cutoff_hz = traits.hp_cutoffs[traits.hp_cutoffs.len() / 2];
        config
    }

    pub fn default_sequence(&self) -> Sequence {
        self.default_config().to_sequence()
    }

    /// ADC clock divider for `sample_rate_hz`
    pub fn adc_divider(sample_rate_hz: f64) -> u32 {
        (REFERENCE_CLOCK_HZ / sample_rate_hz).round().clamp(1.0, 1023.0) as u32
    }

    /// Signed PLL word of a frequency
    pub fn freq_to_pll(frequency_hz: f64) -> i32 {
        let reference = REFERENCE_CLOCK_HZ * PLL_PRE_DIVIDER;
        let offset = (PLL_DIVSET + 2.0) * 4.0 + 8.0;
        ((frequency_hz / reference - offset) * PLL_FRACTION).round() as i32
    }

    pub fn pll_to_freq(pll: i64) -> f64 {
        let reference = REFERENCE_CLOCK_HZ * PLL_PRE_DIVIDER;
        let offset = (PLL_DIVSET + 2.0) * 4.0 + 8.0;
        (pll as f64 / PLL_FRACTION + offset) * reference
    }

    /// Cycles of the up-ramp, ramp time units (8 cycles each)
    fn ramp_time_units(adc_div: u32, num_samples: u32) -> u32 {
        let up_cycles = adc_div * num_samples + 8 * TR_SSTART + 1;
        up_cycles.div_ceil(8)
    }

    fn parse<'s>(&self, sequence: &'s Sequence) -> Result<ShapePlan<'s>> {
        let [SequenceElement::Loop {
            repetitions: num_frames,
            period_s: frame_period_s,
            body: frame_body,
        }] = sequence.elements.as_slice()
        else {
            return Err(RadarError::NotSupported(
                "sequence must be a single frame loop".to_string(),
            ));
        };

        let (num_chirps, chirp_period_s, chirps) = match frame_body.as_slice() {
            [SequenceElement::Loop {
                repetitions,
                period_s,
                body,
            }] => (*repetitions, *period_s, chirps_of(body)?),
            body => (1, 0.0, chirps_of(body)?),
        };

        if chirps.is_empty() || chirps.len() > 2 {
            return Err(RadarError::NotSupported(format!("{} chirps per shape", chirps.len())));
        }
        if *num_frames > MAX_FRAME_COUNT {
            return Err(RadarError::ArgumentOutOfBounds(format!(
                "{} frames exceed the frame counter",
                num_frames
            )));
        }
        if !num_chirps.is_power_of_two() || num_chirps.trailing_zeros() > MAX_REPS_EXPONENT {
            return Err(RadarError::NumChirpsNotAllowed);
        }
        if chirps.iter().any(|c| c.sample_rate_hz != chirps[0].sample_rate_hz) {
            return Err(RadarError::SamplerateOutOfRange);
        }
        // packed 12-bit words come in pairs; an odd frame would shift the next one by a nibble
        let frame_words: u64 = chirps
            .iter()
            .map(|c| c.num_samples as u64 * c.rx_mask.count_ones() as u64)
            .sum::<u64>()
            * num_chirps as u64;
        if frame_words % 2 != 0 {
            return Err(RadarError::NumSamplesOutOfRange);
        }
        if chirps.len() == 2 {
            let (a, b) = (chirps[0], chirps[1]);
            if !a.same_except_tx(b)
                || a.tx_mask.count_ones() != 1
                || b.tx_mask.count_ones() != 1
                || a.tx_mask == b.tx_mask
            {
                return Err(RadarError::NotSupported(
                    "two chirps must only differ in a single TX antenna".to_string(),
                ));
            }
        }

        Ok(ShapePlan {
            frame_period_s: *frame_period_s,
            num_frames: *num_frames,
            chirp_period_s,
            num_chirps,
            chirps,
        })
    }

    /// Compile a sequence into a register batch
    ///
    /// Nothing is written; the batch holds every register the sequence
    /// touches, in ascending address order.
    pub fn compile(&self, sequence: &Sequence) -> Result<RegisterBatch<u8, u32>> {
        Ok(self.compile_image(sequence)?.into_batch())
    }

    /// Register image of a compiled sequence, for callers that adjust it further
    pub(crate) fn compile_image(&self, sequence: &Sequence) -> Result<RegisterImage<'_, u8, u32>> {
        sequence.validate(self)?;
        let plan = self.parse(sequence)?;
        let first = plan.chirps[0];
        let adc_div = Self::adc_divider(first.sample_rate_hz);

        let mut image = self.map.image();

        let wake_up = ExpMantissa::encode(seconds_to_cycles(WAKE_UP_TIME_S, REFERENCE_CLOCK_HZ / 8.0), 4, 8)?;
        image.set("MAIN.TR_TWKUP", wake_up.mantissa)?;
        image.set("MAIN.TR_TWKUP_MUL", wake_up.exponent)?;
        image.set("MAIN.CW_MODE", 0)?;
        image.set("MAIN.FRAME_START", 0)?;
        image.set("ADC0.ADC_DIV", adc_div)?;

        let init1 = ExpMantissa::encode(seconds_to_cycles(INIT1_TIME_S, REFERENCE_CLOCK_HZ / 8.0), 2, 8)?;
        image.set("CCR0.TR_END", TR_END)?;
        image.set("CCR0.REPT", 0)?;
        image.set("CCR0.TR_INIT1", init1.mantissa)?;
        image.set("CCR0.TR_MUL1", init1.exponent)?;
        image.set("CCR3.TR_PAEN", TR_PAEN)?;
        image.set("CCR3.TR_SSTART", TR_SSTART)?;
        image.set("CCR2.MAX_FRAME_CNT", plan.num_frames)?;
        image.set("CCR2.FRAME_LEN", 0)?;

        // Ramps
        self.write_ramp(&mut image, first, adc_div, ["PLL1_0.FSU", "PLL1_1.RSU", "PLL1_2.RTU", "PLL1_3.APU"])?;
        if plan.is_tdm() {
            self.write_ramp(
                &mut image,
                plan.chirps[1],
                adc_div,
                ["PLL1_4.FSD", "PLL1_5.RSD", "PLL1_6.RTD", "PLL1_3.APD"],
            )?;
        } else {
            image.set("PLL1_3.APD", 0)?;
        }

        // Shape and frame end delays
        let body_s: f64 = plan.chirps.iter().map(|c| self.chirp_duration(c)).sum();
        let shape_delay = if plan.chirp_period_s > body_s {
            delay_timer(plan.chirp_period_s - body_s).ok_or(RadarError::ChirpRateOutOfRange)?
        } else {
            ScaledTimer::default()
        };
        let chirp_period = body_s + delay_seconds(shape_delay);
        let frame_s = chirp_period * plan.num_chirps as f64;
        let frame_delay = if plan.frame_period_s > frame_s {
            delay_timer(plan.frame_period_s - frame_s).ok_or(RadarError::FrameRateOutOfRange)?
        } else {
            ScaledTimer::default()
        };

        image.set("PLL1_7.REPS", plan.num_chirps.trailing_zeros())?;
        image.set("PLL1_7.SH_EN", 1)?;
        image.set("PLL1_7.TR_SED", shape_delay.counter)?;
        image.set("PLL1_7.TR_SED_MUL", shape_delay.shift)?;
        image.set("CCR1.TR_FED", frame_delay.counter)?;
        image.set("CCR1.TR_FED_MUL", frame_delay.shift)?;

        // Channel sets
        self.write_channel_set(&mut image, "CS1_U", first, true)?;
        match plan.chirps.get(1) {
            Some(second) => self.write_channel_set(&mut image, "CS1_D", second, true)?,
            None => self.write_channel_set(&mut image, "CS1_D", first, false)?,
        }
        image.set("CS1.CS_EN", 1)?;

        tracing::debug!(
            "Compiled {} sequence: {} chirps x {} shapes, {} samples, ADC_DIV {}",
            self.variant,
            plan.num_chirps,
            plan.chirps.len(),
            first.num_samples,
            adc_div
        );
        Ok(image)
    }

    /// Compile a simple configuration
    pub fn compile_simple(&self, config: &SimpleSequenceConfig) -> Result<RegisterBatch<u8, u32>> {
        self.compile(&config.to_sequence())
    }

    fn write_ramp(&self, image: &mut RegisterImage<'_, u8, u32>, chirp: &Chirp, adc_div: u32, names: [&str; 4]) -> Result<()> {
        let start = Self::freq_to_pll(chirp.start_frequency_hz);
        let end = Self::freq_to_pll(chirp.end_frequency_hz);
        let ramp_cycles = (adc_div * chirp.num_samples) as f64;
        let step = ((end - start) as f64 / ramp_cycles).round() as i32;

        image.set(names[0], start as u32 & 0xFF_FFFF)?;
        image.set(names[1], step as u32 & 0xFF_FFFF)?;
        image.set(names[2], Self::ramp_time_units(adc_div, chirp.num_samples))?;
        image.set(names[3], chirp.num_samples)?;
        Ok(())
    }

    fn write_channel_set(&self, image: &mut RegisterImage<'_, u8, u32>, prefix: &str, chirp: &Chirp, tx_on: bool) -> Result<()> {
        let traits = self.traits();
        let gain = GainSplit::from_db(chirp.if_gain_db)?;
        let (hpf, _) = snap_to_nearest(traits.hp_cutoffs, chirp.hp_cutoff_hz)
            .ok_or_else(|| RadarError::Internal("empty high-pass table".to_string()))?;
        let (aaf, _) = snap_to_nearest(traits.aaf_cutoffs, chirp.lp_cutoff_hz)
            .ok_or_else(|| RadarError::Internal("empty anti-alias table".to_string()))?;
        let tx_mask = if tx_on { chirp.tx_mask } else { 0 };

        image.set(&format!("{}_0.TX1_EN", prefix), tx_mask & 1)?;
        image.set(&format!("{}_0.TX2_EN", prefix), (tx_mask >> 1) & 1)?;
        image.set(&format!("{}_0.VCO_EN", prefix), 1)?;
        image.set(&format!("{}_0.FDIV_EN", prefix), 1)?;
        image.set(&format!("{}_0.LO_DIST1_EN", prefix), 1)?;
        image.set(&format!("{}_1.TX1_DAC", prefix), chirp.tx_power_level)?;
        image.set(&format!("{}_1.TX2_DAC", prefix), chirp.tx_power_level)?;

        for rx in 0..traits.num_rx {
            let n = rx + 1;
            let on = (chirp.rx_mask >> rx) & 1;
            image.set(&format!("{}_0.RX{}LOBUF_EN", prefix, n), on)?;
            image.set(&format!("{}_0.RX{}MIX_EN", prefix, n), on)?;
            image.set(&format!("{}_0.ABB{}_AAF_CTRL", prefix, n), aaf as u32)?;
            image.set(&format!("{}_1.HP{}_GAIN", prefix, n), gain.hp_30db as u32)?;
            image.set(&format!("{}_1.MADC_BBCH{}_EN", prefix, n), on)?;
            image.set(&format!("{}_2.HPF_SEL{}", prefix, n), hpf as u32)?;
            image.set(&format!("{}_2.VGA_GAIN{}", prefix, n), gain.vga_index)?;
        }
        Ok(())
    }

    fn read_channel_set(&self, image: &RegisterImage<'_, u8, u32>, prefix: &str, adc_div: u32, ramp: [&str; 3]) -> Result<Chirp> {
        let traits = self.traits();
        let mut rx_mask = 0u32;
        for rx in 0..traits.num_rx {
            if image.get(&format!("{}_1.MADC_BBCH{}_EN", prefix, rx + 1))? != 0 {
                rx_mask |= 1 << rx;
            }
        }
        let first_rx = if rx_mask == 0 { 1 } else { rx_mask.trailing_zeros() + 1 };
        let tx_mask = image.get(&format!("{}_0.TX1_EN", prefix))? | (image.get(&format!("{}_0.TX2_EN", prefix))? << 1);
        let tx_power_level = if tx_mask == 0b10 {
            image.get(&format!("{}_1.TX2_DAC", prefix))?
        } else {
            image.get(&format!("{}_1.TX1_DAC", prefix))?
        };

        let gain = GainSplit {
            hp_30db: image.get(&format!("{}_1.HP{}_GAIN", prefix, first_rx))? != 0,
            vga_index: image.get(&format!("{}_2.VGA_GAIN{}", prefix, first_rx))?,
        };
        let hpf = image.get(&format!("{}_2.HPF_SEL{}", prefix, first_rx))? as usize;
        let aaf = image.get(&format!("{}_0.ABB{}_AAF_CTRL", prefix, first_rx))? as usize;

        let num_samples = image.get(ramp[2])?;
        let start = sign_extend_24(image.get(ramp[0])?) as i64;
        let step = sign_extend_24(image.get(ramp[1])?) as i64;
        let end = start + step * (adc_div * num_samples) as i64;

        Ok(Chirp {
            start_frequency_hz: Self::pll_to_freq(start),
            end_frequency_hz: Self::pll_to_freq(end),
            sample_rate_hz: REFERENCE_CLOCK_HZ / adc_div as f64,
            num_samples,
            rx_mask,
            tx_mask,
            tx_power_level,
            lp_cutoff_hz: traits.aaf_cutoffs.get(aaf).copied().unwrap_or(traits.aaf_cutoffs[0]),
            hp_cutoff_hz: traits.hp_cutoffs.get(hpf).copied().unwrap_or(traits.hp_cutoffs[0]),
            if_gain_db: gain.db(),
            ..Chirp::default()
        })
    }

    /// Reconstruct the running sequence from a register image
    pub fn decode(&self, image: &RegisterImage<'_, u8, u32>) -> Result<Sequence> {
        let adc_div = image.get("ADC0.ADC_DIV")?;
        if adc_div == 0 {
            return Err(RadarError::NotConfigured);
        }
        let mut chirps = vec![self.read_channel_set(image, "CS1_U", adc_div, ["PLL1_0.FSU", "PLL1_1.RSU", "PLL1_3.APU"])?];
        if image.get("PLL1_3.APD")? != 0 {
            chirps.push(self.read_channel_set(image, "CS1_D", adc_div, ["PLL1_4.FSD", "PLL1_5.RSD", "PLL1_3.APD"])?);
        }

        let body_s: f64 = chirps.iter().map(|c| self.chirp_duration(c)).sum();
        let shape_delay = ScaledTimer::new(image.get("PLL1_7.TR_SED")?, image.get("PLL1_7.TR_SED_MUL")?);
        let frame_delay = ScaledTimer::new(image.get("CCR1.TR_FED")?, image.get("CCR1.TR_FED_MUL")?);
        let num_chirps = 1u32 << image.get("PLL1_7.REPS")?;
        let chirp_period = body_s + delay_seconds(shape_delay);
        let frame_period = chirp_period * num_chirps as f64 + delay_seconds(frame_delay);

        Ok(Sequence::new(vec![SequenceElement::Loop {
            repetitions: image.get("CCR2.MAX_FRAME_CNT")?,
            period_s: frame_period,
            body: vec![SequenceElement::repeat(
                num_chirps,
                chirp_period,
                chirps.into_iter().map(SequenceElement::Chirp).collect(),
            )],
        }]))
    }

    /// Samples per slice for a frame of `frame_samples`
    pub fn slice_samples(&self, frame_samples: usize, frame_period_s: f64) -> usize {
        let max = self.traits().fifo_words / 2;
        let mut slice = if frame_samples > max {
            frame_samples / frame_samples.div_ceil(max)
        } else {
            frame_samples
        };
        if frame_period_s > 0.0 {
            let rate = frame_samples as f64 / slice as f64 / frame_period_s;
            if rate > self.max_slice_rate_hz {
                slice = (slice * (rate / self.max_slice_rate_hz).floor() as usize).min(max);
            }
        } else {
            slice = max;
        }
        (slice & !1).max(2)
    }

    /// Readout plan for a compiled sequence
    pub fn data_plan(&self, sequence: &Sequence) -> Result<DataPlan> {
        let frame_samples = sequence.frame_samples();
        if frame_samples == 0 {
            return Err(RadarError::ArgumentInvalid("empty frame".to_string()));
        }
        let frame_period = sequence.frame_repetition_time().unwrap_or(0.0);
        let slice = self.slice_samples(frame_samples, frame_period);
        let settings = DataSettings::new(
            DataFormat::Packed12,
            vec![ReadoutEntry::new(FIFO_BURST_ADDRESS, slice as u32)],
            1,
        );
        let frame_bytes = DataFormat::Packed12.bytes_for(frame_samples);
        let slices_per_frame = frame_bytes.div_ceil(settings.slice_bytes);
        Ok(DataPlan::single(
            settings,
            frame_bytes,
            queue_size_for(frame_period) * slices_per_frame,
        ))
    }

    /// Split raw words into one normalised cube per shape
    ///
    /// Words arrive chirp by chirp, samples interleaved over the receivers.
    /// With two shapes the chirps alternate between the cubes.
    pub fn decode_samples(words: &[u16], shapes: &[CubeShape]) -> Result<Vec<RealCube>> {
        let expected: usize = shapes.iter().map(CubeShape::len).sum();
        if words.len() != expected {
            return Err(RadarError::DimensionMismatch {
                expected: vec![expected],
                actual: vec![words.len()],
            });
        }
        let Some(shape) = shapes.first().copied() else {
            return Ok(Vec::new());
        };
        let mut cubes: Vec<RealCube> = shapes.iter().map(|s| RealCube::zeros(*s)).collect();

        let mut words = words.iter();
        for chirp in 0..shape.slow_time {
            for cube in cubes.iter_mut() {
                for sample in 0..shape.samples {
                    for rx in 0..shape.rx {
                        let raw = words.next().copied().unwrap_or(0);
                        cube.set(rx, chirp, sample, raw as f32 / ADC_FULL_SCALE);
                    }
                }
            }
        }
        Ok(cubes)
    }
}

/// Delay register value for `seconds`, `None` past the 8-bit counter and 5-bit shift
fn delay_timer(seconds: f64) -> Option<ScaledTimer> {
    let cycles = seconds_to_cycles(seconds, REFERENCE_CLOCK_HZ);
    if cycles > ScaledTimer::max_cycles(8, 5) {
        return None;
    }
    Some(ScaledTimer::from_cycles(cycles, 8, 5))
}

fn delay_seconds(timer: ScaledTimer) -> f64 {
    if timer.counter == 0 {
        0.0
    } else {
        timer.cycles() as f64 / REFERENCE_CLOCK_HZ
    }
}

impl ChirpProfile for AvianProfile {
    fn check_chirp(&self, chirp: &Chirp) -> Result<()> {
        let traits = self.traits();
        for frequency in [chirp.start_frequency_hz, chirp.end_frequency_hz] {
            check_range(frequency, traits.min_rf_hz, traits.max_rf_hz, || RadarError::RfOutOfRange)?;
        }
        check_range(chirp.sample_rate_hz, MIN_SAMPLE_RATE_HZ, MAX_SAMPLE_RATE_HZ, || {
            RadarError::SamplerateOutOfRange
        })?;
        check_range(chirp.num_samples, 1, MAX_NUM_SAMPLES, || RadarError::NumSamplesOutOfRange)?;
        if Self::ramp_time_units(Self::adc_divider(chirp.sample_rate_hz), chirp.num_samples) > MAX_RTU {
            return Err(RadarError::NumSamplesOutOfRange);
        }
        if chirp.rx_mask == 0 || chirp.rx_mask >> traits.num_rx != 0 {
            return Err(RadarError::RxAntennaCombinationNotAllowed);
        }
        if chirp.tx_mask > 0b11 || chirp.tx_mask >> traits.num_tx != 0 {
            return Err(RadarError::TxAntennaModeNotAllowed);
        }
        check_range(chirp.tx_power_level, 0, MAX_TX_POWER, || RadarError::TxPowerOutOfRange)?;
        GainSplit::from_db(chirp.if_gain_db)?;
        Ok(())
    }

    fn chirp_duration(&self, chirp: &Chirp) -> f64 {
        let rtu = Self::ramp_time_units(Self::adc_divider(chirp.sample_rate_hz), chirp.num_samples);
        8.0 * (TR_PAEN + rtu + TR_END) as f64 / REFERENCE_CLOCK_HZ
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::MimoMode;

    fn sixty_ghz_sequence() -> Sequence {
        let chirp = Chirp {
            start_frequency_hz: 60.0e9,
            end_frequency_hz: 60.25e9,
            sample_rate_hz: 2.0e6,
            num_samples: 128,
            rx_mask: 0b1,
            tx_mask: 0b1,
            tx_power_level: 31,
            if_gain_db: 33,
            ..Chirp::default()
        };
        Sequence::new(vec![SequenceElement::frame_loop(
            0.25,
            vec![SequenceElement::repeat(64, 1e-3, vec![SequenceElement::Chirp(chirp)])],
        )])
    }

    fn profile(variant: AvianVariant) -> AvianProfile {
        AvianProfile::new(variant).unwrap()
    }

    fn roundtrip(profile: &AvianProfile, sequence: &Sequence) -> Sequence {
        let batch = profile.compile(sequence).unwrap();
        let mut image = profile.map().image();
        for (address, value) in batch.full_writes() {
            image.set(&format!("0x{:02X}", address), value).unwrap();
        }
        profile.decode(&image).unwrap()
    }

    #[test]
    fn test_pll_conversion() {
        assert_eq!(AvianProfile::freq_to_pll(60.0e9), -2_359_296);
        assert_eq!(AvianProfile::freq_to_pll(61.44e9), 0);
        let back = AvianProfile::pll_to_freq(AvianProfile::freq_to_pll(60.123e9) as i64);
        assert!((back - 60.123e9).abs() < 640.0);
        assert_eq!(sign_extend_24(-2_359_296i32 as u32 & 0xFF_FFFF), -2_359_296);
    }

    #[test]
    fn test_gain_split() {
        assert_eq!(GainSplit::from_db(33).unwrap().db(), 35);
        assert_eq!(GainSplit::from_db(30).unwrap(), GainSplit { hp_30db: true, vga_index: 0 });
        assert_eq!(GainSplit::from_db(29).unwrap(), GainSplit { hp_30db: false, vga_index: 2 });
        assert_eq!(GainSplit::from_db(60).unwrap().db(), 60);
        assert!(matches!(GainSplit::from_db(17), Err(RadarError::IfGainOutOfRange)));
        assert!(matches!(GainSplit::from_db(61), Err(RadarError::IfGainOutOfRange)));
        let list = if_gain_list();
        assert_eq!(list.first(), Some(&18));
        assert_eq!(list.last(), Some(&60));
    }

    #[test]
    fn test_chirp_duration_model() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        let chirp = Chirp::default();
        // ADC_DIV 40: 5120 + 41 cycles -> RTU 646
        let expected = 8.0 * (30.0 + 646.0 + 20.0) / 80e6;
        assert!((p.chirp_duration(&chirp) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_compile_and_read_back() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        let sequence = sixty_ghz_sequence();
        let batch = p.compile(&sequence).unwrap();
        assert!(!batch.is_empty());

        let decoded = roundtrip(&p, &sequence);
        assert_eq!(decoded.frame_shape(), vec![CubeShape::new(1, 64, 128)]);
        let config = SimpleSequenceConfig::from_sequence(&decoded).unwrap();
        assert_eq!(config.num_chirps, 64);
        assert_eq!(config.chirp.if_gain_db, 35);
        assert_eq!(config.chirp.tx_power_level, 31);
        assert_eq!(config.chirp.num_samples, 128);
        assert!((config.chirp.start_frequency_hz - 60.0e9).abs() < 1e3);
        assert!((config.chirp.end_frequency_hz - 60.25e9).abs() < 1e3);
        assert!((config.chirp_repetition_time_s - 1e-3).abs() < 1e-5);
        assert!((config.frame_repetition_time_s - 0.25).abs() < 2e-3);
    }

    #[test]
    fn test_tdm_mimo_expansion() {
        let p = profile(AvianVariant::Bgt60Atr24c);
        let config = SimpleSequenceConfig {
            num_chirps: 32,
            mimo_mode: MimoMode::Tdm,
            chirp: Chirp {
                tx_mask: 0b11,
                rx_mask: 0b1111,
                ..Chirp::default()
            },
            ..SimpleSequenceConfig::default()
        };
        let decoded = roundtrip(&p, &config.to_sequence());
        let chirps = decoded.chirps();
        assert_eq!(chirps.len(), 2);
        assert_eq!(chirps[0].tx_mask, 0b01);
        assert_eq!(chirps[1].tx_mask, 0b10);

        let back = SimpleSequenceConfig::from_sequence(&decoded).unwrap();
        assert_eq!(back.mimo_mode, MimoMode::Tdm);
        assert_eq!(back.chirp.tx_mask, 0b11);
        assert_eq!(decoded.frame_shape(), vec![CubeShape::new(4, 32, 128); 2]);
    }

    #[test]
    fn test_chirp_limits() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        let check = |f: fn(&mut Chirp)| {
            let mut chirp = Chirp::default();
            f(&mut chirp);
            p.check_chirp(&chirp)
        };
        assert!(check(|_| {}).is_ok());
        assert!(matches!(check(|c| c.start_frequency_hz = 57.0e9), Err(RadarError::RfOutOfRange)));
        assert!(matches!(check(|c| c.sample_rate_hz = 5.0e6), Err(RadarError::SamplerateOutOfRange)));
        assert!(matches!(check(|c| c.num_samples = 0), Err(RadarError::NumSamplesOutOfRange)));
        assert!(matches!(check(|c| c.rx_mask = 0), Err(RadarError::RxAntennaCombinationNotAllowed)));
        assert!(matches!(check(|c| c.rx_mask = 0b1000), Err(RadarError::RxAntennaCombinationNotAllowed)));
        assert!(matches!(check(|c| c.tx_mask = 0b10), Err(RadarError::TxAntennaModeNotAllowed)));
        assert!(matches!(check(|c| c.tx_power_level = 32), Err(RadarError::TxPowerOutOfRange)));
        assert!(matches!(check(|c| c.if_gain_db = 70), Err(RadarError::IfGainOutOfRange)));
    }

    #[test]
    fn test_structure_errors() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        let mut sequence = sixty_ghz_sequence();
        if let SequenceElement::Loop { body, .. } = &mut sequence.elements[0] {
            if let SequenceElement::Loop { repetitions, .. } = &mut body[0] {
                *repetitions = 48;
            }
        }
        assert!(matches!(p.compile(&sequence), Err(RadarError::NumChirpsNotAllowed)));

        let chirp = Chirp::default();
        let with_delay = Sequence::new(vec![SequenceElement::frame_loop(
            0.25,
            vec![SequenceElement::repeat(
                4,
                1e-3,
                vec![
                    SequenceElement::Chirp(chirp.clone()),
                    SequenceElement::Delay { time_s: 1e-4 },
                    SequenceElement::Chirp(chirp.clone()),
                ],
            )],
        )]);
        assert!(matches!(p.compile(&with_delay), Err(RadarError::NotSupported(_))));

        let other_rate = Chirp {
            sample_rate_hz: 1.0e6,
            ..chirp.clone()
        };
        let mixed = Sequence::new(vec![SequenceElement::frame_loop(
            0.25,
            vec![SequenceElement::repeat(
                4,
                1e-3,
                vec![SequenceElement::Chirp(chirp), SequenceElement::Chirp(other_rate)],
            )],
        )]);
        assert!(matches!(p.compile(&mixed), Err(RadarError::SamplerateOutOfRange)));
    }

    #[test]
    fn test_odd_frame_word_count_rejected() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        let mut config = SimpleSequenceConfig {
            num_chirps: 1,
            ..SimpleSequenceConfig::default()
        };
        config.chirp.num_samples = 33;
        assert!(matches!(p.compile(&config.to_sequence()), Err(RadarError::NumSamplesOutOfRange)));

        // two receivers make the word count even again
        config.chirp.rx_mask = 0b11;
        assert!(p.compile(&config.to_sequence()).is_ok());
        config.chirp.rx_mask = 0b1;
        config.num_chirps = 2;
        assert!(p.compile(&config.to_sequence()).is_ok());
    }

    #[test]
    fn test_delays_beyond_timer_range() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        // the delay registers top out near 54760 s
        let slow_frames = SimpleSequenceConfig {
            frame_repetition_time_s: 1.0e5,
            ..SimpleSequenceConfig::default()
        };
        assert!(matches!(
            p.compile(&slow_frames.to_sequence()),
            Err(RadarError::FrameRateOutOfRange)
        ));

        let slow_chirps = SimpleSequenceConfig {
            frame_repetition_time_s: 2.0e5,
            chirp_repetition_time_s: 1.0e5,
            num_chirps: 1,
            ..SimpleSequenceConfig::default()
        };
        assert!(matches!(
            p.compile(&slow_chirps.to_sequence()),
            Err(RadarError::ChirpRateOutOfRange)
        ));

        let longest = SimpleSequenceConfig {
            frame_repetition_time_s: 5.0e4,
            ..SimpleSequenceConfig::default()
        };
        assert!(p.compile(&longest.to_sequence()).is_ok());
    }

    #[test]
    fn test_slice_sizing() {
        let p = profile(AvianVariant::Bgt60Tr13c);
        // 64 x 128 samples in two FIFO halves
        assert_eq!(p.slice_samples(8192, 0.25), 4096);
        // small fast frames are merged to stay under 20 slices per second
        assert_eq!(p.slice_samples(128, 0.001), 4096);
        assert_eq!(p.slice_samples(1001, 1.0), 1000);

        let plan = p.data_plan(&sixty_ghz_sequence()).unwrap();
        assert_eq!(plan.frame_bytes, 12288);
        assert_eq!(plan.channels[0].1.slice_bytes, 6144);
        assert_eq!(plan.channels[0].1.readout, vec![ReadoutEntry::new(FIFO_BURST_ADDRESS, 4096)]);
        assert_eq!(plan.queue_size, 80);
    }

    #[test]
    fn test_decode_samples_interleaving() {
        let shapes = [CubeShape::new(2, 2, 3); 2];
        let words: Vec<u16> = (0..24).collect();
        let cubes = AvianProfile::decode_samples(&words, &shapes).unwrap();
        // chirp 0 of shape 0: samples 0..2, rx interleaved
        assert_eq!(cubes[0].get(0, 0, 0), 0.0);
        assert_eq!(cubes[0].get(1, 0, 0), 1.0 / 4095.0);
        assert_eq!(cubes[0].get(1, 0, 2), 5.0 / 4095.0);
        // chirp 0 of shape 1 follows
        assert_eq!(cubes[1].get(0, 0, 0), 6.0 / 4095.0);
        // chirp 1 of shape 0 after both shapes of chirp 0
        assert_eq!(cubes[0].get(0, 1, 0), 12.0 / 4095.0);

        assert!(matches!(
            AvianProfile::decode_samples(&words[..5], &shapes),
            Err(RadarError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_temperature_and_variants() {
        assert!((temperature_from_raw(728) - 24.9).abs() < 0.1);
        assert!(!AvianVariant::Bgt60Utr11aip.traits().has_temperature_sensor);
        assert_eq!("bgt60utr13d".parse::<AvianVariant>().unwrap(), AvianVariant::Bgt60Utr13d);
        assert!(matches!("BGT99".parse::<AvianVariant>(), Err(RadarError::DeviceNotSupported(_))));
        let info = profile(AvianVariant::Bgt60Atr24c).sensor_info();
        assert_eq!((info.num_tx_antennas, info.num_rx_antennas), (2, 4));
    }

    #[test]
    fn test_metrics() {
        let config = SimpleSequenceConfig::default();
        let metrics = Metrics::from_config(&config);
        // 1 GHz of bandwidth
        assert!((metrics.range_resolution_m - 0.1499).abs() < 1e-3);
        assert!((metrics.max_range_m - metrics.range_resolution_m * 64.0).abs() < 1e-9);
        assert!(metrics.max_speed_m_s > 1.0);
    }
}
