//! Register write batching
//!
//! Profiles compile a configuration into a [`RegisterBatch`]. Before the batch
//! reaches the transport, the [`WritePlanner`] turns it into transactions:
//! runs of full-register writes to consecutive addresses become one burst,
//! bitfield writes stay single read-modify-write operations. The order in
//! which the device observes the writes is always the batch order.
//!
//! # Example
//!
//! ```ignore
//! use mmradar_rs::registers::{RegisterBatch, WritePlanner};
//!
//! let mut batch = RegisterBatch::<u8, u32>::new();
//! batch.push_full(0x10, 1);
//! batch.push_full(0x11, 2);
//! batch.push_full(0x20, 3);
//!
//! let ops = WritePlanner::new(true).plan(batch.entries());
//! assert_eq!(ops.len(), 2); // burst 0x10..=0x11, single 0x20
//! ```

use super::RegisterWord;

/// Largest number of registers merged into one burst
pub const DEFAULT_MAX_BURST: usize = 64;

/// One pending register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEntry<A, V> {
    /// Replace the whole register
    Full { address: A, value: V },
    /// Replace one bitfield, keeping the other bits
    Field {
        address: A,
        mask: u32,
        shift: u32,
        value: u32,
    },
}

impl<A: RegisterWord, V: RegisterWord> BatchEntry<A, V> {
    pub fn address(&self) -> A {
        match self {
            BatchEntry::Full { address, .. } | BatchEntry::Field { address, .. } => *address,
        }
    }
}

/// Ordered list of register writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBatch<A, V> {
    entries: Vec<BatchEntry<A, V>>,
}

impl<A, V> Default for RegisterBatch<A, V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<A: RegisterWord, V: RegisterWord> RegisterBatch<A, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BatchEntry<A, V>) {
        self.entries.push(entry);
    }

    pub fn push_full(&mut self, address: A, value: V) {
        self.entries.push(BatchEntry::Full { address, value });
    }

    /// Append all entries of another batch
    pub fn extend(&mut self, other: RegisterBatch<A, V>) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[BatchEntry<A, V>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `(address, value)` pairs of all full-register writes
    pub fn full_writes(&self) -> Vec<(A, V)> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                BatchEntry::Full { address, value } => Some((*address, *value)),
                BatchEntry::Field { .. } => None,
            })
            .collect()
    }
}

/// A transport transaction produced by the planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp<A, V> {
    Single { address: A, value: V },
    /// Consecutive registers starting at `address`
    Burst { address: A, values: Vec<V> },
    /// Read-modify-write of one bitfield
    Modify {
        address: A,
        mask: u32,
        shift: u32,
        value: u32,
    },
}

impl<A, V> WriteOp<A, V> {
    /// Number of batch entries covered by this transaction
    pub fn entry_count(&self) -> usize {
        match self {
            WriteOp::Single { .. } | WriteOp::Modify { .. } => 1,
            WriteOp::Burst { values, .. } => values.len(),
        }
    }
}

/// Groups batch entries into transport transactions
#[derive(Debug, Clone)]
pub struct WritePlanner {
    coalesce: bool,
    max_burst: usize,
}

impl WritePlanner {
    /// Create a planner
    ///
    /// # Arguments
    /// * `coalesce` - Merge full writes to consecutive addresses into bursts
    pub fn new(coalesce: bool) -> Self {
        Self {
            coalesce,
            max_burst: DEFAULT_MAX_BURST,
        }
    }

    pub fn with_max_burst(mut self, max_burst: usize) -> Self {
        self.max_burst = max_burst.max(1);
        self
    }

    pub fn coalesce(&self) -> bool {
        self.coalesce
    }

    /// Plan transactions for a batch
    ///
    /// Only neighbours in batch order are merged, so the write order is kept.
    pub fn plan<A: RegisterWord, V: RegisterWord>(&self, entries: &[BatchEntry<A, V>]) -> Vec<WriteOp<A, V>> {
        let mut ops = Vec::new();
        let mut run: Option<(A, Vec<V>)> = None;

        for entry in entries {
            match *entry {
                BatchEntry::Full { address, value } => {
                    if self.coalesce {
                        if let Some((start, values)) = run.as_mut() {
                            let next = start.to_u32() + values.len() as u32;
                            if address.to_u32() == next && values.len() < self.max_burst {
                                values.push(value);
                                continue;
                            }
                        }
                        if let Some(finished) = run.take() {
                            ops.push(Self::close_run(finished));
                        }
                        run = Some((address, vec![value]));
                    } else {
                        ops.push(WriteOp::Single { address, value });
                    }
                }
                BatchEntry::Field {
                    address,
                    mask,
                    shift,
                    value,
                } => {
                    if let Some(finished) = run.take() {
                        ops.push(Self::close_run(finished));
                    }
                    ops.push(WriteOp::Modify {
                        address,
                        mask,
                        shift,
                        value,
                    });
                }
            }
        }

        if let Some(finished) = run.take() {
            ops.push(Self::close_run(finished));
        }
        ops
    }

    fn close_run<A, V>((address, mut values): (A, Vec<V>)) -> WriteOp<A, V> {
        if values.len() == 1 {
            let value = values.remove(0);
            WriteOp::Single { address, value }
        } else {
            WriteOp::Burst { address, values }
        }
    }

    /// Transactions saved by coalescing: `(transactions, saved)`
    pub fn calculate_savings<A: RegisterWord, V: RegisterWord>(&self, entries: &[BatchEntry<A, V>]) -> (usize, usize) {
        let transactions = self.plan(entries).len();
        (transactions, entries.len().saturating_sub(transactions))
    }
}

impl Default for WritePlanner {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn full(address: u8, value: u32) -> BatchEntry<u8, u32> {
        BatchEntry::Full { address, value }
    }

    fn field(address: u8, value: u32) -> BatchEntry<u8, u32> {
        BatchEntry::Field {
            address,
            mask: 0xF,
            shift: 0,
            value,
        }
    }

    #[test]
    fn test_plan_empty() {
        let planner = WritePlanner::default();
        let ops = planner.plan::<u8, u32>(&[]);
        assert!(ops.is_empty());
    }

    #[test]
    fn test_plan_merges_consecutive_addresses() {
        let planner = WritePlanner::new(true);
        let ops = planner.plan(&[full(0x10, 1), full(0x11, 2), full(0x12, 3)]);
        assert_eq!(
            ops,
            vec![WriteOp::Burst {
                address: 0x10,
                values: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn test_plan_does_not_merge_backwards() {
        let planner = WritePlanner::new(true);
        let ops = planner.plan(&[full(0x11, 1), full(0x10, 2)]);
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_plan_field_breaks_run() {
        let planner = WritePlanner::new(true);
        let ops = planner.plan(&[full(0x10, 1), field(0x11, 2), full(0x12, 3), full(0x13, 4)]);
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], WriteOp::Single { address: 0x10, .. }));
        assert!(matches!(ops[1], WriteOp::Modify { address: 0x11, .. }));
        assert!(matches!(ops[2], WriteOp::Burst { address: 0x12, .. }));
    }

    #[test]
    fn test_plan_without_coalescing() {
        let planner = WritePlanner::new(false);
        let ops = planner.plan(&[full(0x10, 1), full(0x11, 2)]);
        assert_eq!(ops.len(), 2);
        assert_eq!(planner.calculate_savings(&[full(0x10, 1), full(0x11, 2)]), (2, 0));
    }

    #[test]
    fn test_max_burst_splits_runs() {
        let planner = WritePlanner::new(true).with_max_burst(2);
        let entries: Vec<_> = (0..5u8).map(|a| full(a, a as u32)).collect();
        let ops = planner.plan(&entries);
        assert_eq!(ops.len(), 3);
        assert_eq!(planner.calculate_savings(&entries), (3, 2));
    }

    fn arb_entry() -> impl Strategy<Value = BatchEntry<u8, u32>> {
        prop_oneof![
            (0u8..32, any::<u32>()).prop_map(|(a, v)| full(a, v)),
            (0u8..32, 0u32..16).prop_map(|(a, v)| field(a, v)),
        ]
    }

    /// Expand planned ops back into per-entry writes
    fn flatten(ops: &[WriteOp<u8, u32>]) -> Vec<BatchEntry<u8, u32>> {
        let mut out = Vec::new();
        for op in ops {
            match op {
                WriteOp::Single { address, value } => out.push(full(*address, *value)),
                WriteOp::Burst { address, values } => {
                    for (i, v) in values.iter().enumerate() {
                        out.push(full(address + i as u8, *v));
                    }
                }
                WriteOp::Modify { address, value, .. } => out.push(field(*address, *value)),
            }
        }
        out
    }

    proptest! {
        /// Every entry is written exactly once, in batch order
        #[test]
        fn prop_plan_preserves_order(
            entries in prop::collection::vec(arb_entry(), 0..40),
            coalesce in any::<bool>(),
        ) {
            let planner = WritePlanner::new(coalesce);
            let ops = planner.plan(&entries);
            prop_assert_eq!(flatten(&ops), entries.clone());
            let covered: usize = ops.iter().map(|op| op.entry_count()).sum();
            prop_assert_eq!(covered, entries.len());
        }

        /// Bursts only ever cover consecutive full writes
        #[test]
        fn prop_bursts_are_contiguous(entries in prop::collection::vec(arb_entry(), 0..40)) {
            let planner = WritePlanner::new(true);
            for op in planner.plan(&entries) {
                if let WriteOp::Burst { values, .. } = op {
                    prop_assert!(values.len() >= 2);
                    prop_assert!(values.len() <= DEFAULT_MAX_BURST);
                }
            }
        }
    }
}
