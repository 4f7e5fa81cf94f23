//! # mmradar-rs: acquisition driver for BGT60 / BGT24 radar sensors
//!
//! Configures Infineon mm-wave radar chips through a USB baseboard and turns
//! the raw sample stream into frames. Four sensor families are covered:
//! Avian FMCW (BGT60TR13C, BGT60ATR24C, BGT60UTR13D, BGT60UTR11AIP), the same
//! chips in continuous-wave mode, the BGT60LTR11 pulsed Doppler sensor and the
//! BGT24ATR22 ("Mimose") pulsed sensor.
//!
//! ## Architecture
//!
//! - **Registers**: typed register maps with cached images and write batches
//! - **Profile**: per-family limits, sequence compiler and sample decoding
//! - **Transport**: the baseboard seam; a software board backs the tests
//! - **Reassembler**: slices from the board cut into whole frames
//! - **Controller**: the device lifecycle tying the pieces together
//!
//! ## Example
//!
//! ```ignore
//! use mmradar_rs::transport::mock::MockBoardProvider;
//! use mmradar_rs::{BoardSelector, Device, DeviceOptions, RadarDevice, SimpleSequenceConfig};
//! use std::time::Duration;
//!
//! let provider = MockBoardProvider::standard();
//! let device = Device::open(&provider, &BoardSelector::First, DeviceOptions::default())?;
//! device.set_sequence(&SimpleSequenceConfig::default().to_sequence())?;
//! device.start()?;
//! let frame = device.get_next_frame(Some(Duration::from_secs(1)))?;
//! device.destroy();
//! ```

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod header;
pub mod profile;
pub mod reassembler;
pub mod registers;
pub mod sequence;
pub mod transport;

// Re-export commonly used types
pub use config::{DeviceOptions, FmcwSingleShapeFile};
pub use controller::{Device, DeviceState, RadarDevice};
pub use error::{RadarError, Result, ResultExt};
pub use frame::{ComplexCube, Frame, FrameData, FrameMetadata, RealCube};
pub use profile::{SensorFamily, SensorInfo};
pub use sequence::{Chirp, CubeShape, Sequence, SequenceElement, SimpleSequenceConfig};
pub use transport::{BoardInfo, BoardSelector, FirmwareInfo, Transport, TransportProvider};
