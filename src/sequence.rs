//! Acquisition sequence model
//!
//! A sequence is a chain of [`SequenceElement`]s: loops own a sub-chain,
//! chirps (or pulses) are leaves, delays pad a loop body. The outermost loop
//! is the frame loop; everything below it makes up one frame.
//!
//! Validation, duration and frame-shape derivation all walk the same tree.
//! Chip-specific checks and chirp durations come from a [`ChirpProfile`].

use crate::error::{RadarError, Result};
use serde::{Deserialize, Serialize};

/// Analog baseband gain selection of a pulsed sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AbbGain {
    /// Gain chosen by the on-chip AGC
    Automatic,
    Gain3,
    Gain6,
    Gain12,
    Gain24,
    Gain48,
    Gain96,
    Gain192,
    #[default]
    Gain384,
}

impl AbbGain {
    const MANUAL: [AbbGain; 8] = [
        AbbGain::Gain3,
        AbbGain::Gain6,
        AbbGain::Gain12,
        AbbGain::Gain24,
        AbbGain::Gain48,
        AbbGain::Gain96,
        AbbGain::Gain192,
        AbbGain::Gain384,
    ];

    /// Register index of a manual gain, `None` for automatic
    pub fn index(&self) -> Option<u32> {
        Self::MANUAL.iter().position(|g| g == self).map(|i| i as u32)
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::MANUAL.get(index as usize).copied()
    }
}

/// Offset compensation mode of a pulsed sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AocMode {
    /// Stored offset is applied
    Applied,
    /// Offset is measured but not applied
    Tracked,
    #[default]
    FsmHandled,
    FsmHandledAlt,
}

impl AocMode {
    pub fn code(&self) -> u32 {
        match self {
            AocMode::Applied => 0,
            AocMode::Tracked => 1,
            AocMode::FsmHandled => 2,
            AocMode::FsmHandledAlt => 3,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(AocMode::Applied),
            1 => Some(AocMode::Tracked),
            2 => Some(AocMode::FsmHandled),
            3 => Some(AocMode::FsmHandledAlt),
            _ => None,
        }
    }
}

/// One frequency sweep, or one pulse when start equals end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chirp {
    pub start_frequency_hz: f64,
    pub end_frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub num_samples: u32,
    pub rx_mask: u32,
    pub tx_mask: u32,
    pub tx_power_level: u32,
    pub lp_cutoff_hz: i32,
    pub hp_cutoff_hz: i32,
    pub if_gain_db: i32,
    #[serde(default)]
    pub abb_gain: AbbGain,
    #[serde(default)]
    pub aoc_mode: AocMode,
}

impl Default for Chirp {
    fn default() -> Self {
        Self {
            start_frequency_hz: 60.0e9,
            end_frequency_hz: 61.0e9,
            sample_rate_hz: 2.0e6,
            num_samples: 128,
            rx_mask: 0b1,
            tx_mask: 0b1,
            tx_power_level: 31,
            lp_cutoff_hz: 500_000,
            hp_cutoff_hz: 80_000,
            if_gain_db: 33,
            abb_gain: AbbGain::default(),
            aoc_mode: AocMode::default(),
        }
    }
}

impl Chirp {
    pub fn num_rx(&self) -> usize {
        self.rx_mask.count_ones() as usize
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.end_frequency_hz - self.start_frequency_hz
    }

    /// Whether two chirps only differ in their TX mask
    pub fn same_except_tx(&self, other: &Chirp) -> bool {
        let mut other = other.clone();
        other.tx_mask = self.tx_mask;
        *self == other
    }
}

/// One element of a sequence chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SequenceElement {
    Loop {
        /// 0 repeats forever, only meaningful as the outermost loop
        repetitions: u32,
        /// 0 runs the body as fast as possible
        period_s: f64,
        body: Vec<SequenceElement>,
    },
    Chirp(Chirp),
    Delay {
        time_s: f64,
    },
}

impl SequenceElement {
    pub fn frame_loop(period_s: f64, body: Vec<SequenceElement>) -> Self {
        SequenceElement::Loop {
            repetitions: 0,
            period_s,
            body,
        }
    }

    pub fn repeat(repetitions: u32, period_s: f64, body: Vec<SequenceElement>) -> Self {
        SequenceElement::Loop {
            repetitions,
            period_s,
            body,
        }
    }
}

/// Chip-specific view the sequence walker needs
pub trait ChirpProfile {
    /// Check every chirp parameter against the chip limits
    fn check_chirp(&self, chirp: &Chirp) -> Result<()>;

    /// Time from chirp start until the chip is ready for the next one
    fn chirp_duration(&self, chirp: &Chirp) -> f64;
}

/// Shape of one frame cube: `(rx, slow time, samples)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CubeShape {
    pub rx: usize,
    pub slow_time: usize,
    pub samples: usize,
}

impl CubeShape {
    pub fn new(rx: usize, slow_time: usize, samples: usize) -> Self {
        Self { rx, slow_time, samples }
    }

    pub fn len(&self) -> usize {
        self.rx * self.slow_time * self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dims(&self) -> Vec<usize> {
        vec![self.rx, self.slow_time, self.samples]
    }
}

/// An acquisition sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub elements: Vec<SequenceElement>,
}

impl From<Vec<SequenceElement>> for Sequence {
    fn from(elements: Vec<SequenceElement>) -> Self {
        Self { elements }
    }
}

impl Sequence {
    pub fn new(elements: Vec<SequenceElement>) -> Self {
        Self { elements }
    }

    /// Validate the tree against `profile`
    pub fn validate(&self, profile: &dyn ChirpProfile) -> Result<()> {
        let mut chirps = 0usize;
        validate_chain(&self.elements, profile, 0, &mut chirps)?;
        if chirps == 0 {
            return Err(RadarError::ArgumentInvalid("sequence contains no chirp".to_string()));
        }
        Ok(())
    }

    /// Total duration in seconds, infinite loops counted once
    pub fn duration(&self, profile: &dyn ChirpProfile) -> f64 {
        chain_duration(&self.elements, profile)
    }

    /// One cube per leaf chirp, in tree order
    pub fn frame_shape(&self) -> Vec<CubeShape> {
        let mut shapes = Vec::new();
        collect_shapes(&self.elements, 0, 1, &mut shapes);
        shapes
    }

    /// Every leaf chirp in tree order
    pub fn chirps(&self) -> Vec<&Chirp> {
        let mut chirps = Vec::new();
        collect_chirps(&self.elements, &mut chirps);
        chirps
    }

    /// Period of the outermost loop, if the sequence starts with one
    pub fn frame_repetition_time(&self) -> Option<f64> {
        match self.elements.first() {
            Some(SequenceElement::Loop { period_s, .. }) => Some(*period_s),
            _ => None,
        }
    }

    /// Total samples in one frame, over all cubes
    pub fn frame_samples(&self) -> usize {
        self.frame_shape().iter().map(CubeShape::len).sum()
    }
}

fn validate_chain(chain: &[SequenceElement], profile: &dyn ChirpProfile, depth: usize, chirps: &mut usize) -> Result<()> {
    if chain.is_empty() {
        return Err(RadarError::ArgumentInvalid("empty loop body".to_string()));
    }
    let last = chain.len() - 1;
    for (i, element) in chain.iter().enumerate() {
        match element {
            SequenceElement::Chirp(chirp) => {
                profile.check_chirp(chirp)?;
                *chirps += 1;
            }
            SequenceElement::Delay { time_s } => {
                if depth == 0 || i == 0 || i == last {
                    return Err(RadarError::ArgumentInvalid(
                        "delay must sit between two elements of a loop body".to_string(),
                    ));
                }
                if !time_s.is_finite() || *time_s < 0.0 {
                    return Err(RadarError::ArgumentInvalid(format!("invalid delay {}", time_s)));
                }
            }
            SequenceElement::Loop {
                repetitions,
                period_s,
                body,
            } => {
                if depth > 0 && *repetitions == 0 {
                    return Err(RadarError::ArgumentInvalid(
                        "only the outermost loop may repeat forever".to_string(),
                    ));
                }
                if !period_s.is_finite() || *period_s < 0.0 {
                    return Err(RadarError::ArgumentInvalid(format!("invalid loop period {}", period_s)));
                }
                validate_chain(body, profile, depth + 1, chirps)?;
                let body_duration = chain_duration(body, profile);
                if *period_s > 0.0 && *period_s < body_duration {
                    return Err(if depth == 0 {
                        RadarError::FrameRateOutOfRange
                    } else {
                        RadarError::ChirpRateOutOfRange
                    });
                }
            }
        }
    }
    Ok(())
}

fn chain_duration(chain: &[SequenceElement], profile: &dyn ChirpProfile) -> f64 {
    chain
        .iter()
        .map(|element| match element {
            SequenceElement::Chirp(chirp) => profile.chirp_duration(chirp),
            SequenceElement::Delay { time_s } => *time_s,
            SequenceElement::Loop {
                repetitions,
                period_s,
                body,
            } => {
                let body_duration = chain_duration(body, profile);
                (*repetitions).max(1) as f64 * period_s.max(body_duration)
            }
        })
        .sum()
}

fn collect_shapes(chain: &[SequenceElement], depth: usize, repetitions: usize, out: &mut Vec<CubeShape>) {
    for element in chain {
        match element {
            SequenceElement::Chirp(chirp) => {
                out.push(CubeShape::new(chirp.num_rx(), repetitions, chirp.num_samples as usize));
            }
            SequenceElement::Delay { .. } => {}
            SequenceElement::Loop {
                repetitions: reps,
                body,
                ..
            } => {
                let inner = if depth == 0 {
                    repetitions
                } else {
                    repetitions * (*reps).max(1) as usize
                };
                collect_shapes(body, depth + 1, inner, out);
            }
        }
    }
}

fn collect_chirps<'a>(chain: &'a [SequenceElement], out: &mut Vec<&'a Chirp>) {
    for element in chain {
        match element {
            SequenceElement::Chirp(chirp) => out.push(chirp),
            SequenceElement::Loop { body, .. } => collect_chirps(body, out),
            SequenceElement::Delay { .. } => {}
        }
    }
}

/// MIMO operation of a simple sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MimoMode {
    #[default]
    Off,
    Tdm,
}

/// Frame of `num_chirps` identical chirps, the common FMCW case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleSequenceConfig {
    pub frame_repetition_time_s: f64,
    pub chirp_repetition_time_s: f64,
    pub num_chirps: u32,
    pub mimo_mode: MimoMode,
    pub chirp: Chirp,
}

impl Default for SimpleSequenceConfig {
    fn default() -> Self {
        Self {
            frame_repetition_time_s: 0.25,
            chirp_repetition_time_s: 1e-3,
            num_chirps: 64,
            mimo_mode: MimoMode::Off,
            chirp: Chirp::default(),
        }
    }
}

impl SimpleSequenceConfig {
    /// Build the frame loop; TDM splits the chirp into one chirp per TX antenna
    pub fn to_sequence(&self) -> Sequence {
        let body = if self.mimo_mode == MimoMode::Tdm && self.chirp.tx_mask.count_ones() > 1 {
            (0..32)
                .map(|bit| 1u32 << bit)
                .filter(|bit| self.chirp.tx_mask & bit != 0)
                .map(|bit| {
                    SequenceElement::Chirp(Chirp {
                        tx_mask: bit,
                        ..self.chirp.clone()
                    })
                })
                .collect()
        } else {
            vec![SequenceElement::Chirp(self.chirp.clone())]
        };

        Sequence::new(vec![SequenceElement::frame_loop(
            self.frame_repetition_time_s,
            vec![SequenceElement::repeat(self.num_chirps, self.chirp_repetition_time_s, body)],
        )])
    }

    /// Recognise a sequence built by [`Self::to_sequence`]
    pub fn from_sequence(sequence: &Sequence) -> Result<Self> {
        let not_simple = || RadarError::NotSupported("sequence is not a simple sequence".to_string());

        let [SequenceElement::Loop {
            period_s: frame_period,
            body: frame_body,
            ..
        }] = sequence.elements.as_slice()
        else {
            return Err(not_simple());
        };
        let [SequenceElement::Loop {
            repetitions,
            period_s: chirp_period,
            body,
        }] = frame_body.as_slice()
        else {
            return Err(not_simple());
        };

        let chirps: Vec<&Chirp> = body
            .iter()
            .map(|e| match e {
                SequenceElement::Chirp(c) => Some(c),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(not_simple)?;
        let first = chirps.first().ok_or_else(not_simple)?;

        let mut chirp = (*first).clone();
        let mimo_mode = if chirps.len() > 1 {
            let mut mask = 0u32;
            for c in &chirps {
                if !first.same_except_tx(c) || c.tx_mask.count_ones() != 1 || mask & c.tx_mask != 0 {
                    return Err(not_simple());
                }
                mask |= c.tx_mask;
            }
            chirp.tx_mask = mask;
            MimoMode::Tdm
        } else {
            MimoMode::Off
        };

        Ok(Self {
            frame_repetition_time_s: *frame_period,
            chirp_repetition_time_s: *chirp_period,
            num_chirps: *repetitions,
            mimo_mode,
            chirp,
        })
    }
}
