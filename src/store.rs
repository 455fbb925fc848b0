//! Logically global element array split across partition-local arenas.
//!
//! ```text
//!   address(i) = (home(i), slot(i))
//!
//!   arenas[0]   arenas[1]   ...   arenas[P-1]
//!   ┌───────┐   ┌───────┐         ┌───────┐
//!   │ i=0   │   │ i=1   │         │ i=P-1 │   slot 0
//!   │ i=P   │   │ i=P+1 │         │ i=2P-1│   slot 1
//!   │ ...   │   │ ...   │         │ ...   │
//!   └───────┘   └───────┘         └───────┘
//! ```
//!
//! Computing an address is pure arithmetic and never relocates the caller;
//! anything that touches an element relocates the calling [`Context`] to the
//! element's home partition first.

use std::sync::{Mutex, PoisonError};

use crate::{
    arena::Arena,
    error::{Error, Result},
    machine::Context,
    topology::Topology,
};

/// Location of an element: partition and slot within that partition's arena.
///
/// Only meant to be fed to a placement hint; it grants no access by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    partition: usize,
    slot: usize,
}

impl Addr {
    #[inline]
    pub fn partition(&self) -> usize {
        self.partition
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }
}

pub struct PartitionedStore<T> {
    topology: Topology,
    len: usize,
    per_partition: usize,
    arenas: Box<[Arena<Mutex<T>>]>,
}

impl<T> PartitionedStore<T> {
    /// Reserve one arena of `ceil(len / P)` slots on every partition.
    ///
    /// Runs entirely on the caller's partition; no element is constructed yet.
    /// If any partition refuses, every arena reserved so far is released.
    pub fn allocate(ctx: &Context, len: usize) -> Result<Self> {
        let machine = ctx.machine();
        let topology = machine.topology();
        let per_partition = topology.per_partition(len);

        let arenas = (0..topology.partitions())
            .map(|p| Arena::with_capacity(machine, p, per_partition))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        tracing::debug!(
            len,
            per_partition,
            from = ctx.here(),
            "partitioned storage allocated"
        );
        Ok(Self {
            topology,
            len,
            per_partition,
            arenas,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn per_partition(&self) -> usize {
        self.per_partition
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Where element `i` lives. Pure; never relocates.
    #[inline]
    pub fn address(&self, i: usize) -> Result<Addr> {
        if i >= self.len {
            return Err(Error::InvalidIndex {
                index: i,
                len: self.len,
            });
        }
        Ok(Addr {
            partition: self.topology.home(i),
            slot: self.topology.slot(i),
        })
    }

    /// Address of the first slot of `partition`'s arena.
    pub fn base(&self, partition: usize) -> Result<Addr> {
        if partition >= self.arenas.len() {
            return Err(Error::InvalidPartition {
                partition,
                partitions: self.arenas.len(),
            });
        }
        Ok(Addr { partition, slot: 0 })
    }

    /// Elements constructed so far across all partitions.
    pub fn constructed(&self) -> usize {
        self.arenas.iter().map(Arena::initialized).sum()
    }

    pub fn is_constructed(&self, i: usize) -> bool {
        self.address(i)
            .is_ok_and(|addr| self.arenas[addr.partition].is_initialized(addr.slot))
    }

    /// Run `f` on element `i`, relocating `ctx` to its home partition first.
    pub fn with<R>(&self, ctx: &mut Context, i: usize, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let addr = self.address(i)?;
        relocate(ctx, addr.partition)?;
        let cell = self.arenas[addr.partition]
            .get(addr.slot)
            .ok_or(Error::Unconstructed { index: i })?;
        let mut element = cell.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&mut element))
    }
}

impl<T> PartitionedStore<T> {
    /// Construct every element owned by `partition` with `make`, relocating
    /// `ctx` there first.
    ///
    /// Returns the number of elements constructed. Stops at the first error;
    /// elements already constructed stay in place.
    pub fn construct_partition_with(
        &self,
        ctx: &mut Context,
        partition: usize,
        mut make: impl FnMut(&Context) -> Result<T>,
    ) -> Result<usize> {
        let base = self.base(partition)?;
        relocate(ctx, base.partition)?;
        let owned = self.topology.owned_by(partition, self.len);
        let arena = &self.arenas[partition];
        for slot in 0..owned {
            arena.init(slot, Mutex::new(make(ctx)?))?;
        }
        tracing::trace!(partition, owned, "partition constructed");
        Ok(owned)
    }
}

impl<T: Default> PartitionedStore<T> {
    /// Default-construct element `i` in place on its home partition.
    pub fn construct_at(&self, ctx: &mut Context, i: usize) -> Result<()> {
        let addr = self.address(i)?;
        relocate(ctx, addr.partition)?;
        self.arenas[addr.partition].init(addr.slot, Mutex::new(T::default()))
    }

    /// Default-construct every element owned by `partition`.
    pub fn construct_partition(&self, ctx: &mut Context, partition: usize) -> Result<usize> {
        self.construct_partition_with(ctx, partition, |_| Ok(T::default()))
    }
}

// A context from a smaller machine cannot reach every arena.
fn relocate(ctx: &mut Context, partition: usize) -> Result<()> {
    ctx.machine().check_partition(partition)?;
    ctx.migrate_to(partition);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;
    use crate::{
        config::Config,
        error::Stage,
        machine::Machine,
    };

    fn store(partitions: usize, len: usize) -> (Machine, PartitionedStore<Vec<u32>>) {
        let m = Machine::with_partitions(partitions).unwrap();
        let ctx = m.context(0).unwrap();
        let s = PartitionedStore::allocate(&ctx, len).unwrap();
        (m, s)
    }

    #[test]
    fn allocate_does_not_construct() {
        let (m, s) = store(8, 16);
        assert_eq!(s.len(), 16);
        assert_eq!(s.per_partition(), 2);
        assert_eq!(s.constructed(), 0);
        assert_eq!(m.migrations().total(), 0);
    }

    #[test]
    fn address_is_pure() {
        let (m, s) = store(8, 16);
        let a = s.address(13).unwrap();
        let b = s.address(13).unwrap();
        assert_eq!(a, b);
        assert_eq!((a.partition(), a.slot()), (5, 1));
        assert_eq!(m.migrations().total(), 0);
    }

    #[test]
    fn address_rejects_out_of_range() {
        let (_m, s) = store(8, 16);
        assert_eq!(
            s.address(16).unwrap_err(),
            Error::InvalidIndex { index: 16, len: 16 }
        );
        assert!(s.base(8).is_err());
        assert_eq!(s.base(3).unwrap().partition(), 3);
    }

    #[test]
    fn construct_at_relocates_to_home() {
        let (m, s) = store(4, 8);
        let mut ctx = m.context(0).unwrap();
        s.construct_at(&mut ctx, 6).unwrap();
        assert_eq!(ctx.here(), 2);
        assert!(s.is_constructed(6));
        assert!(!s.is_constructed(5));
        assert_eq!(m.migrations().snapshot().get(0, 2), 1);

        assert!(matches!(
            s.construct_at(&mut ctx, 6),
            Err(Error::AlreadyConstructed {
                partition: 2,
                slot: 1
            })
        ));
    }

    #[test]
    fn construct_partition_skips_padding() {
        // 10 rows over 4 partitions: partitions 0 and 1 own 3, the rest own 2.
        let (m, s) = store(4, 10);
        let mut ctx = m.context(0).unwrap();
        let owned: Vec<usize> = (0..4)
            .map(|p| s.construct_partition(&mut ctx, p).unwrap())
            .collect();
        assert_eq!(owned, vec![3, 3, 2, 2]);
        assert_eq!(s.constructed(), 10);
        assert!((0..10).all(|i| s.is_constructed(i)));
    }

    #[test]
    fn with_requires_construction() {
        let (m, s) = store(2, 4);
        let mut ctx = m.context(0).unwrap();
        assert_eq!(
            s.with(&mut ctx, 3, |row| row.len()).unwrap_err(),
            Error::Unconstructed { index: 3 }
        );
        s.construct_at(&mut ctx, 3).unwrap();
        s.with(&mut ctx, 3, |row| row.push(7)).unwrap();
        assert_eq!(s.with(&mut ctx, 3, |row| row.clone()).unwrap(), vec![7]);
    }

    #[test]
    fn local_access_does_not_migrate() {
        let (m, s) = store(4, 8);
        let mut ctx = m.context(1).unwrap();
        s.construct_at(&mut ctx, 5).unwrap();
        s.with(&mut ctx, 5, |row| row.push(1)).unwrap();
        assert_eq!(m.migrations().total(), 0);
    }

    #[test]
    fn context_that_cannot_reach_home_is_refused() {
        let (_m, s) = store(4, 8);
        let small = Machine::with_partitions(2).unwrap();
        let mut ctx = small.context(0).unwrap();
        let refused = Error::InvalidPartition {
            partition: 3,
            partitions: 2,
        };
        assert_eq!(s.construct_at(&mut ctx, 7).unwrap_err(), refused);
        assert_eq!(s.construct_partition(&mut ctx, 3).unwrap_err(), refused);
        assert_eq!(s.with(&mut ctx, 7, |row| row.len()).unwrap_err(), refused);
        assert_eq!(ctx.here(), 0);
        assert_eq!(small.migrations().total(), 0);
    }

    #[test]
    fn failed_allocation_releases_everything() {
        let slot = size_of::<std::sync::OnceLock<Mutex<Vec<u32>>>>();
        let m = Machine::new(&Config::new(4).with_partition_bytes(2 * slot)).unwrap();
        let hog = m.reserve(Stage::Storage, 3, slot).unwrap();

        let ctx = m.context(0).unwrap();
        let err = PartitionedStore::<Vec<u32>>::allocate(&ctx, 8).err().unwrap();
        assert!(matches!(
            err,
            Error::AllocationFailure {
                stage: Stage::Storage,
                partition: 3,
                ..
            }
        ));
        assert_eq!(m.total_used(), slot);
        drop(hog);
        assert_eq!(m.total_used(), 0);
    }
}
