//! Mock construction helpers

#[cfg(feature = "mock-board")]
use mmradar_rs::controller::{FmcwDevice, MimoseDevice};
#[cfg(feature = "mock-board")]
use mmradar_rs::profile::avian::AvianVariant;
#[cfg(feature = "mock-board")]
use mmradar_rs::transport::mock::{MockBoard, MockBoardControl};
#[cfg(feature = "mock-board")]
use mmradar_rs::DeviceOptions;
#[cfg(feature = "mock-board")]
use std::time::Duration;

/// FMCW device on a fast software board
#[cfg(feature = "mock-board")]
pub fn create_test_fmcw(slice_interval: Duration, options: DeviceOptions) -> (FmcwDevice, MockBoardControl) {
    let board = MockBoard::avian("BGT60TR13C").with_slice_interval(slice_interval);
    let control = board.control();
    let device = FmcwDevice::open(Box::new(board), AvianVariant::Bgt60Tr13c, options).expect("open FMCW mock");
    (device, control)
}

/// Mimose device on a software board
#[cfg(feature = "mock-board")]
pub fn create_test_mimose() -> (MimoseDevice, MockBoardControl) {
    let board = MockBoard::mimose().with_slice_interval(Duration::from_millis(2));
    let control = board.control();
    let device = MimoseDevice::open(Box::new(board), DeviceOptions::default()).expect("open Mimose mock");
    (device, control)
}
