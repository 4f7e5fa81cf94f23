//! Benchmarks for the sample path: unpacking, reassembly and decoding
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mmradar_rs::profile::avian::AvianProfile;
use mmradar_rs::profile::StatusPolicy;
use mmradar_rs::reassembler::{unpack_packed12, unpack_raw16, Reassembler};
use mmradar_rs::transport::{
    BoardInfo, CancelHandle, DataSettings, FirmwareInfo, Slice, SliceStatus, Transport, TransportStats,
};
use mmradar_rs::{CubeShape, Result};
use std::collections::VecDeque;
use std::time::Duration;

/// Transport replaying prepared slices, without a producer thread
struct ReplayTransport {
    slices: VecDeque<Slice>,
}

impl ReplayTransport {
    fn new(slice_bytes: usize, count: usize) -> Self {
        let slices = (0..count)
            .map(|i| Slice::new(vec![(i & 0xFF) as u8; slice_bytes], SliceStatus::Ok, i as u64 * 1000))
            .collect();
        Self { slices }
    }
}

impl Transport for ReplayTransport {
    fn board_info(&self) -> BoardInfo {
        BoardInfo {
            sensor_type: "BGT60TR13C".to_string(),
            board_type: "Replay".to_string(),
            uuid: String::new(),
            port: String::new(),
        }
    }

    fn firmware_info(&self) -> FirmwareInfo {
        FirmwareInfo::new(2, 5, 4, "replay")
    }

    fn read_register(&mut self, _address: u32) -> Result<u32> {
        Ok(0)
    }

    fn write_register(&mut self, _address: u32, _value: u32) -> Result<()> {
        Ok(())
    }

    fn read_burst(&mut self, _address: u32, count: usize) -> Result<Vec<u32>> {
        Ok(vec![0; count])
    }

    fn write_burst(&mut self, _address: u32, _values: &[u32]) -> Result<()> {
        Ok(())
    }

    fn configure_data(&mut self, _channel: u8, _settings: &DataSettings) -> Result<()> {
        Ok(())
    }

    fn start(&mut self, _channel: u8) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self, _channel: u8) -> Result<()> {
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop_streaming(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_frame(&mut self, _timeout: Duration) -> Result<Option<Slice>> {
        Ok(self.slices.pop_front())
    }

    fn set_frame_buffer_size(&mut self, _bytes: usize) -> Result<()> {
        Ok(())
    }

    fn set_frame_queue_size(&mut self, _slices: usize) -> Result<()> {
        Ok(())
    }

    fn cancel_handle(&self) -> Option<CancelHandle> {
        None
    }

    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }

    fn reset_stats(&mut self) {}
}

fn bench_unpacking(c: &mut Criterion) {
    let mut group = c.benchmark_group("unpacking");

    for samples in [1024usize, 8192, 65536].iter() {
        let packed: Vec<u8> = (0..samples * 3 / 2).map(|i| (i * 7) as u8).collect();
        let raw: Vec<u8> = (0..samples * 2).map(|i| (i * 13) as u8).collect();

        group.throughput(Throughput::Elements(*samples as u64));
        group.bench_with_input(BenchmarkId::new("packed12", samples), &packed, |b, bytes| {
            b.iter(|| unpack_packed12(black_box(bytes)))
        });
        group.bench_with_input(BenchmarkId::new("raw16", samples), &raw, |b, bytes| {
            b.iter(|| unpack_raw16(black_box(bytes)))
        });
    }

    group.finish();
}

fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");
    let frame_bytes: usize = 12288;

    // slice sizes smaller than, equal to and larger than a frame
    for slice_bytes in [4096usize, 12288, 40960].iter() {
        let frames = 16;
        let slices = (frames * frame_bytes).div_ceil(*slice_bytes);
        group.throughput(Throughput::Bytes((frames * frame_bytes) as u64));
        group.bench_with_input(BenchmarkId::new("frames", slice_bytes), slice_bytes, |b, &slice_bytes| {
            b.iter_batched(
                || ReplayTransport::new(slice_bytes, slices),
                |mut transport| {
                    let mut reassembler = Reassembler::new(frame_bytes, StatusPolicy::Framed);
                    for _ in 0..frames {
                        let frame = reassembler
                            .next_frame(&mut transport, Duration::from_millis(10))
                            .unwrap();
                        black_box(frame);
                    }
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_sample_decoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("decoding");

    let shapes = [CubeShape::new(1, 64, 128)];
    let words: Vec<u16> = (0..shapes[0].len()).map(|i| (i % 4096) as u16).collect();
    group.throughput(Throughput::Elements(words.len() as u64));
    group.bench_function("avian_64x128", |b| {
        b.iter(|| AvianProfile::decode_samples(black_box(&words), &shapes).unwrap())
    });

    let mimo = [CubeShape::new(4, 32, 128); 2];
    let words: Vec<u16> = (0..mimo[0].len() * 2).map(|i| (i % 4096) as u16).collect();
    group.bench_function("avian_tdm_4rx", |b| {
        b.iter(|| AvianProfile::decode_samples(black_box(&words), &mimo).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_unpacking, bench_reassembly, bench_sample_decoding);
criterion_main!(benches);
