//! Latest-value hand-off of coherence matrices from the processing thread to
//! the UI thread.
//!
//! A triple buffer: the writer owns one slot, the reader owns one slot, and a
//! third "back" slot is exchanged through a single atomic byte that also
//! carries the "has update" bit. Publishing fills the writer's slot in place
//! and swaps it with the back slot; pulling swaps the reader's slot with the
//! back slot when the bit is set. Neither side ever waits on the other, a
//! reader never sees a slot the writer is still filling, and two publishes
//! between pulls collapse into the newer one.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;

const INDEX_MASK: u8 = 0b011;
const DIRTY_BIT: u8 = 0b100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("row {row} has {len} bins, expected {expected}")]
    RaggedRow { row: usize, len: usize, expected: usize },
}

/// Coherence values, one row per combination and one column per frequency
/// bin, stored contiguously.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoherenceMatrix {
    rows: usize,
    bins: usize,
    values: Vec<f64>,
}

impl CoherenceMatrix {
    pub fn zeros(rows: usize, bins: usize) -> Self {
        Self {
            rows,
            bins,
            values: vec![0.0; rows * bins],
        }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, MatrixError> {
        let bins = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(rows.len() * bins);
        for (row, data) in rows.iter().enumerate() {
            if data.len() != bins {
                return Err(MatrixError::RaggedRow {
                    row,
                    len: data.len(),
                    expected: bins,
                });
            }
            values.extend_from_slice(data);
        }
        Ok(Self {
            rows: rows.len(),
            bins,
            values,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.bins == 0
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.bins;
        Some(&self.values[start..start + self.bins])
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on a zero chunk size
        self.values.chunks_exact(self.bins.max(1)).take(self.rows)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Changes the shape, keeping the allocation when it is large enough.
    /// Contents are zeroed.
    pub fn reshape(&mut self, rows: usize, bins: usize) {
        self.rows = rows;
        self.bins = bins;
        self.values.clear();
        self.values.resize(rows * bins, 0.0);
    }

    /// Copies `other` into `self`, reusing the existing allocation.
    pub fn copy_from(&mut self, other: &CoherenceMatrix) {
        self.rows = other.rows;
        self.bins = other.bins;
        self.values.clone_from(&other.values);
    }

    pub fn scale(&mut self, factor: f64) {
        for value in self.values.iter_mut() {
            *value *= factor;
        }
    }
}

struct SharedSlots {
    slots: [UnsafeCell<CoherenceMatrix>; 3],
    back: AtomicU8,
}

// Each slot index is owned by exactly one of writer, reader or `back` at any
// time, and ownership only moves through the AcqRel swap on `back`.
unsafe impl Sync for SharedSlots {}

/// Creates a connected writer/reader pair. Every slot is pre-seeded with a
/// zero matrix of the given shape, so pulling before the first publish is
/// well defined.
pub fn snapshot_channel(rows: usize, bins: usize) -> (SnapshotWriter, SnapshotReader) {
    let shared = Arc::new(SharedSlots {
        slots: [
            UnsafeCell::new(CoherenceMatrix::zeros(rows, bins)),
            UnsafeCell::new(CoherenceMatrix::zeros(rows, bins)),
            UnsafeCell::new(CoherenceMatrix::zeros(rows, bins)),
        ],
        back: AtomicU8::new(1),
    });
    let writer = SnapshotWriter {
        shared: Arc::clone(&shared),
        input: 0,
        published: 0,
    };
    let reader = SnapshotReader { shared, output: 2 };
    (writer, reader)
}

/// Producer half. Not `Clone`: there is exactly one writer.
pub struct SnapshotWriter {
    shared: Arc<SharedSlots>,
    input: u8,
    published: u64,
}

impl SnapshotWriter {
    /// Replaces the pending snapshot with a copy of `matrix`.
    pub fn publish(&mut self, matrix: &CoherenceMatrix) {
        self.publish_with(|slot| slot.copy_from(matrix));
    }

    /// Fills the writer's private slot in place, then publishes it. The slot
    /// holds whatever was published two swaps ago, so `fill` must overwrite
    /// every value it cares about (or `reshape` first).
    pub fn publish_with<F>(&mut self, fill: F)
    where
        F: FnOnce(&mut CoherenceMatrix),
    {
        // SAFETY: the input slot is owned by this writer until the swap below.
        let slot = unsafe { &mut *self.shared.slots[self.input as usize].get() };
        fill(slot);
        let former = self
            .shared
            .back
            .swap(self.input | DIRTY_BIT, Ordering::AcqRel);
        self.input = former & INDEX_MASK;
        self.published += 1;
    }

    /// Number of publishes so far, including ones the reader never saw.
    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Consumer half. Not `Clone`: there is exactly one reader.
pub struct SnapshotReader {
    shared: Arc<SharedSlots>,
    output: u8,
}

impl SnapshotReader {
    pub fn has_update(&self) -> bool {
        self.shared.back.load(Ordering::Acquire) & DIRTY_BIT != 0
    }

    /// Takes the newest published matrix if there is one and returns the
    /// reader's current matrix. Without a pending update this returns the
    /// same matrix as the previous pull.
    pub fn pull(&mut self) -> &CoherenceMatrix {
        if self.has_update() {
            let former = self.shared.back.swap(self.output, Ordering::AcqRel);
            self.output = former & INDEX_MASK;
        }
        self.latest()
    }

    /// The matrix returned by the last pull, without checking for updates.
    pub fn latest(&self) -> &CoherenceMatrix {
        // SAFETY: the output slot is owned by this reader until its next swap,
        // which requires `&mut self` and so cannot outlive this borrow.
        unsafe { &*self.shared.slots[self.output as usize].get() }
    }
}
