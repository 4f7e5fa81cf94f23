//! Transport statistics
//!
//! Counts slices, bytes, status flags and register traffic, and keeps a
//! rolling window of slice wait times for jitter figures.

use super::SliceStatus;
use serde::Serialize;
use std::collections::VecDeque;

/// Size of the rolling window for recent wait times
const RECENT_WINDOW_SIZE: usize = 100;

/// Statistics for one transport link
#[derive(Debug, Clone, Serialize)]
pub struct TransportStats {
    /// Slices delivered to the host
    pub slices_received: u64,
    /// Total payload bytes delivered
    pub bytes_received: u64,
    /// Slices carrying a non-ok status
    pub slices_flagged: u64,
    pub fifo_overflows: u64,
    pub frames_dropped: u64,
    pub queue_trims: u64,
    /// `get_frame` calls that returned without a slice
    pub timeouts: u64,

    // Register traffic
    pub register_reads: u64,
    pub register_writes: u64,
    /// Burst transactions, each counted once regardless of length
    pub burst_transactions: u64,

    // Latency tracking
    /// Total time spent waiting in `get_frame` (microseconds)
    pub total_wait_time_us: u64,
    pub last_wait_time_us: u64,
    pub min_wait_time_us: u64,
    pub max_wait_time_us: u64,
    /// Rolling window of recent wait times for jitter calculation
    pub recent_wait_times: VecDeque<u64>,
}

impl Default for TransportStats {
    fn default() -> Self {
        Self {
            slices_received: 0,
            bytes_received: 0,
            slices_flagged: 0,
            fifo_overflows: 0,
            frames_dropped: 0,
            queue_trims: 0,
            timeouts: 0,
            register_reads: 0,
            register_writes: 0,
            burst_transactions: 0,
            total_wait_time_us: 0,
            last_wait_time_us: 0,
            min_wait_time_us: u64::MAX,
            max_wait_time_us: 0,
            recent_wait_times: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl TransportStats {
    /// Average wait per delivered slice in microseconds
    pub fn avg_wait_time_us(&self) -> f64 {
        if self.slices_received == 0 {
            0.0
        } else {
            self.total_wait_time_us as f64 / self.slices_received as f64
        }
    }

    /// Share of clean slices as percentage
    pub fn clean_rate(&self) -> f64 {
        if self.slices_received == 0 {
            100.0
        } else {
            ((self.slices_received - self.slices_flagged) as f64 / self.slices_received as f64) * 100.0
        }
    }

    /// Record a delivered slice
    pub fn record_slice(&mut self, wait_us: u64, bytes: u64, status: SliceStatus) {
        self.slices_received += 1;
        self.bytes_received += bytes;
        self.total_wait_time_us += wait_us;
        self.last_wait_time_us = wait_us;

        match status {
            SliceStatus::Ok => {}
            SliceStatus::FifoOverflow => self.fifo_overflows += 1,
            SliceStatus::FrameDropped => self.frames_dropped += 1,
            SliceStatus::QueueTrimmed => self.queue_trims += 1,
            _ => {}
        }
        if !status.is_ok() {
            self.slices_flagged += 1;
        }

        if wait_us < self.min_wait_time_us {
            self.min_wait_time_us = wait_us;
        }
        if wait_us > self.max_wait_time_us {
            self.max_wait_time_us = wait_us;
        }

        self.recent_wait_times.push_back(wait_us);
        if self.recent_wait_times.len() > RECENT_WINDOW_SIZE {
            self.recent_wait_times.pop_front();
        }
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_read(&mut self, words: usize) {
        self.register_reads += words as u64;
        if words > 1 {
            self.burst_transactions += 1;
        }
    }

    pub fn record_write(&mut self, words: usize) {
        self.register_writes += words as u64;
        if words > 1 {
            self.burst_transactions += 1;
        }
    }

    /// Jitter (max - min) over the recent window in microseconds
    pub fn jitter_us(&self) -> u64 {
        if self.recent_wait_times.is_empty() {
            return 0;
        }
        let min = self.recent_wait_times.iter().min().copied().unwrap_or(0);
        let max = self.recent_wait_times.iter().max().copied().unwrap_or(0);
        max.saturating_sub(min)
    }

    /// Standard deviation of recent wait times in microseconds
    pub fn stddev_us(&self) -> f64 {
        if self.recent_wait_times.len() < 2 {
            return 0.0;
        }
        let mean = self.recent_wait_times.iter().sum::<u64>() as f64 / self.recent_wait_times.len() as f64;
        let variance = self
            .recent_wait_times
            .iter()
            .map(|&t| (t as f64 - mean).powi(2))
            .sum::<f64>()
            / (self.recent_wait_times.len() - 1) as f64;
        variance.sqrt()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
