//! Sparse row container.

use std::mem::size_of;

use crate::{
    error::{Error, Result, Stage},
    machine::{Context, Reservation},
};

pub type Index = usize;
pub type Scalar = i64;

/// One stored element: `(column, value)`.
pub type Entry = (Index, Scalar);

/// Ordered `(column, value)` pairs in insertion order. No sorting, no dedup.
#[derive(Debug, Default)]
pub struct Row {
    entries: Vec<Entry>,
    // Up-front capacity accounted against the row's partition; growth past it
    // comes from the host heap.
    _reserved: Option<Reservation>,
}

impl Row {
    /// An empty row with room for `capacity` entries, reserved on the
    /// partition `ctx` is resident on.
    pub fn with_capacity(ctx: &Context, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Ok(Self::default());
        }
        let partition = ctx.here();
        let bytes = capacity.saturating_mul(size_of::<Entry>());
        let reservation = ctx
            .machine()
            .reserve(Stage::RowConstruction, partition, bytes)?;

        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailure {
                stage: Stage::RowConstruction,
                partition,
                requested: bytes,
                available: None,
            })?;

        Ok(Self {
            entries,
            _reserved: Some(reservation),
        })
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn extend_from_slice(&mut self, entries: &[Entry]) {
        self.entries.extend_from_slice(entries);
    }
}
