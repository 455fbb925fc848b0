//! Partition-local slot arena.
//!
//! An arena reserves raw capacity for a fixed number of elements on one
//! partition up front. Elements are then brought to life one slot at a time
//! with [`Arena::init`]; the arena never grows, moves, or hands a slot to
//! another partition.

use std::{mem::size_of, sync::OnceLock};

use crate::{
    error::{Error, Result, Stage},
    machine::{Machine, Reservation},
};

pub struct Arena<T> {
    partition: usize,
    slots: Box<[OnceLock<T>]>,
    _reservation: Reservation,
}

impl<T> Arena<T> {
    /// Reserve `capacity` uninitialized slots on `partition`.
    pub fn with_capacity(machine: &Machine, partition: usize, capacity: usize) -> Result<Self> {
        let bytes = capacity.saturating_mul(size_of::<OnceLock<T>>());
        let reservation = machine.reserve(Stage::Storage, partition, bytes)?;

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| Error::AllocationFailure {
                stage: Stage::Storage,
                partition,
                requested: bytes,
                available: None,
            })?;
        slots.extend((0..capacity).map(|_| OnceLock::new()));

        Ok(Self {
            partition,
            slots: slots.into_boxed_slice(),
            _reservation: reservation,
        })
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Construct the element in `slot`. Each slot can be initialized once.
    pub fn init(&self, slot: usize, value: T) -> Result<()> {
        self.cell(slot)?
            .set(value)
            .map_err(|_| Error::AlreadyConstructed {
                partition: self.partition,
                slot,
            })
    }

    /// The element in `slot`, or `None` if it has not been constructed.
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot).and_then(OnceLock::get)
    }

    pub fn is_initialized(&self, slot: usize) -> bool {
        self.get(slot).is_some()
    }

    pub fn initialized(&self) -> usize {
        self.slots.iter().filter(|s| s.get().is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, cell)| cell.get().map(|v| (slot, v)))
    }

    fn cell(&self, slot: usize) -> Result<&OnceLock<T>> {
        self.slots.get(slot).ok_or(Error::InvalidIndex {
            index: slot,
            len: self.slots.len(),
        })
    }
}
