//! Values replicated identically on every partition.
//!
//! Replication is an explicit two-step factory: [`Replicated::reserve`] takes
//! one copy's worth of memory on every partition, then
//! [`ReplicaSlots::broadcast`] initializes copy 0 and clones it into copies
//! `1..P`. A reader on any partition then reads its own copy with
//! [`Replicated::local`] and never relocates.
//!
//! Copies can only diverge through `&mut Replicated<T>`, and
//! [`Replicated::replace`] rewrites all of them under that exclusive borrow,
//! so no reader ever observes a partially updated set.

use std::mem::size_of;

use crate::{
    error::{Error, Result, Stage},
    machine::{Context, Machine, Reservation},
};

/// Reserved but not yet initialized replica storage.
pub struct ReplicaSlots<T> {
    copies: Vec<T>,
    reservations: Vec<Reservation>,
}

pub struct Replicated<T> {
    copies: Box<[T]>,
    // Released together with the copies.
    _reservations: Vec<Reservation>,
}

impl<T> Replicated<T> {
    /// Reserve room for one `T` on every partition of `machine`.
    ///
    /// On failure nothing stays reserved.
    pub fn reserve(machine: &Machine) -> Result<ReplicaSlots<T>> {
        let partitions = machine.partitions();
        let bytes = size_of::<T>();

        let mut copies = Vec::new();
        copies
            .try_reserve_exact(partitions)
            .map_err(|_| Error::AllocationFailure {
                stage: Stage::Replication,
                partition: 0,
                requested: bytes.saturating_mul(partitions),
                available: None,
            })?;

        let reservations = (0..partitions)
            .map(|p| machine.reserve(Stage::Replication, p, bytes))
            .collect::<Result<Vec<_>>>()?;

        Ok(ReplicaSlots {
            copies,
            reservations,
        })
    }

    /// The copy on the partition `ctx` is resident on.
    ///
    /// Fails if `ctx` sits on a partition this value has no copy on, which
    /// only happens for a context from a larger machine.
    #[inline]
    pub fn local(&self, ctx: &Context) -> Result<&T> {
        let here = ctx.here();
        self.copies.get(here).ok_or(Error::InvalidPartition {
            partition: here,
            partitions: self.copies.len(),
        })
    }

    /// The copy on partition 0, where the value was initialized.
    pub fn origin(&self) -> &T {
        &self.copies[0]
    }

    /// The copy on `partition`, if it exists.
    pub fn nth(&self, partition: usize) -> Option<&T> {
        self.copies.get(partition)
    }

    pub fn copies(&self) -> impl Iterator<Item = &T> {
        self.copies.iter()
    }

    pub fn len(&self) -> usize {
        self.copies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }
}

impl<T: Clone> Replicated<T> {
    /// Overwrite every copy with `value`.
    pub fn replace(&mut self, value: T) {
        for copy in self.copies.iter_mut() {
            *copy = value.clone();
        }
    }
}

impl<T: PartialEq> Replicated<T> {
    /// True when every copy equals copy 0.
    pub fn is_coherent(&self) -> bool {
        match self.copies.split_first() {
            Some((first, rest)) => rest.iter().all(|c| c == first),
            None => true,
        }
    }
}

impl<T: Clone> ReplicaSlots<T> {
    /// Initialize copy 0 with `value` and duplicate it onto every other partition.
    pub fn broadcast(mut self, value: T) -> Replicated<T> {
        let partitions = self.reservations.len();
        self.copies.push(value);
        for _ in 1..partitions {
            let copy = self.copies[0].clone();
            self.copies.push(copy);
        }
        tracing::debug!(partitions, bytes = size_of::<T>(), "control block replicated");
        Replicated {
            copies: self.copies.into_boxed_slice(),
            _reservations: self.reservations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[derive(Clone, Debug, PartialEq)]
    struct Meta {
        rows: usize,
        per_partition: usize,
    }

    #[test]
    fn every_partition_reads_the_same_value() {
        let m = Machine::with_partitions(8).unwrap();
        let r = Replicated::reserve(&m).unwrap().broadcast(Meta {
            rows: 16,
            per_partition: 2,
        });
        assert_eq!(r.len(), 8);
        assert!(r.is_coherent());
        for p in 0..8 {
            let ctx = m.context(p).unwrap();
            let local = r.local(&ctx).unwrap();
            assert_eq!(local.rows, 16);
            assert_eq!(local.per_partition, 2);
            assert_eq!(local, r.nth(0).unwrap());
        }
        assert!(r.nth(8).is_none());
    }

    #[test]
    fn local_reads_never_migrate() {
        let m = Machine::with_partitions(4).unwrap();
        let r = Replicated::reserve(&m).unwrap().broadcast(7u64);
        for p in 0..4 {
            let ctx = m.context(p).unwrap();
            assert_eq!(*r.local(&ctx).unwrap(), 7);
        }
        assert_eq!(m.migrations().total(), 0);
    }

    #[test]
    fn local_from_a_larger_machine_is_refused() {
        let m = Machine::with_partitions(2).unwrap();
        let r = Replicated::reserve(&m).unwrap().broadcast(7u64);
        let bigger = Machine::with_partitions(4).unwrap();
        assert_eq!(*r.local(&bigger.context(1).unwrap()).unwrap(), 7);
        assert_eq!(
            r.local(&bigger.context(3).unwrap()).unwrap_err(),
            Error::InvalidPartition {
                partition: 3,
                partitions: 2
            }
        );
    }

    #[test]
    fn replace_updates_all_copies() {
        let m = Machine::with_partitions(3).unwrap();
        let mut r = Replicated::reserve(&m).unwrap().broadcast(1u32);
        r.replace(9);
        assert!(r.is_coherent());
        assert!(r.copies().all(|&c| c == 9));
        assert_eq!(*r.origin(), 9);
    }

    #[test]
    fn reservation_is_per_partition_and_released_on_drop() {
        let m = Machine::with_partitions(4).unwrap();
        let r = Replicated::reserve(&m).unwrap().broadcast([0u64; 4]);
        for p in 0..4 {
            assert_eq!(m.used(p), 32);
        }
        drop(r);
        assert_eq!(m.total_used(), 0);
    }

    #[test]
    fn failed_reserve_leaves_nothing_behind() {
        let m = Machine::new(&Config::new(4).with_partition_bytes(16)).unwrap();
        // Fill partition 2 so the third reservation fails.
        let hog = m.reserve(Stage::Storage, 2, 16).unwrap();

        let err = Replicated::<[u64; 2]>::reserve(&m).err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Replication));
        assert!(matches!(err, Error::AllocationFailure { partition: 2, .. }));

        drop(hog);
        assert_eq!(m.total_used(), 0);
    }
}
