//! Simulated migratory-thread machine.
//!
//! A [`Machine`] owns P memory partitions. Work runs inside a [`Context`],
//! which is always resident on exactly one partition. Touching memory that
//! lives on another partition relocates the context there first; every
//! relocation is counted in a P×P [`MigrationMap`]. Relocation is a cost, never
//! a correctness concern: a context can reach any partition at any time.
//!
//! Memory is accounted per partition. Each partition may carry a byte
//! capacity; a [`Reservation`] holds bytes on one partition and gives them back
//! when dropped.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use crate::{
    config::{Config, HintPolicy},
    error::{Error, Result, Stage},
    topology::Topology,
};

/// Cheap to clone; all clones refer to the same partitions and counters.
#[derive(Clone)]
pub struct Machine {
    inner: Arc<Inner>,
}

struct Inner {
    topology: Topology,
    hints: HintPolicy,
    partitions: Box<[PartitionMemory]>,
    migrations: MigrationMap,
}

struct PartitionMemory {
    capacity: Option<usize>,
    used: AtomicUsize,
}

impl Machine {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let topology = Topology::new(config.partitions)?;
        let partitions = (0..topology.partitions())
            .map(|_| PartitionMemory {
                capacity: config.partition_bytes,
                used: AtomicUsize::new(0),
            })
            .collect();
        tracing::debug!(
            partitions = topology.partitions(),
            partition_bytes = ?config.partition_bytes,
            hints = ?config.hints,
            "machine up"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                topology,
                hints: config.hints,
                partitions,
                migrations: MigrationMap::new(topology.partitions()),
            }),
        })
    }

    /// Machine built from the process environment, with the partition count
    /// fixed for the life of the process.
    pub fn from_env() -> Result<Self> {
        Self::new(&Config::ambient()?)
    }

    /// Machine with `partitions` partitions and no capacity limit.
    pub fn with_partitions(partitions: usize) -> Result<Self> {
        Self::new(&Config::new(partitions))
    }

    pub fn topology(&self) -> Topology {
        self.inner.topology
    }

    pub fn partitions(&self) -> usize {
        self.inner.topology.partitions()
    }

    pub fn hints(&self) -> HintPolicy {
        self.inner.hints
    }

    pub fn migrations(&self) -> &MigrationMap {
        &self.inner.migrations
    }

    /// A fresh execution context resident on `partition`.
    pub fn context(&self, partition: usize) -> Result<Context> {
        self.check_partition(partition)?;
        Ok(Context {
            machine: self.clone(),
            here: partition,
        })
    }

    pub(crate) fn check_partition(&self, partition: usize) -> Result<()> {
        let partitions = self.partitions();
        if partition < partitions {
            Ok(())
        } else {
            Err(Error::InvalidPartition {
                partition,
                partitions,
            })
        }
    }

    /// Account `bytes` against `partition`'s capacity.
    pub fn reserve(&self, stage: Stage, partition: usize, bytes: usize) -> Result<Reservation> {
        self.check_partition(partition)?;
        let memory = &self.inner.partitions[partition];
        match memory.capacity {
            None => {
                memory.used.fetch_add(bytes, Ordering::Relaxed);
            }
            Some(capacity) => {
                let mut used = memory.used.load(Ordering::Relaxed);
                loop {
                    let available = capacity.saturating_sub(used);
                    if bytes > available {
                        tracing::debug!(%stage, partition, bytes, available, "reservation refused");
                        return Err(Error::AllocationFailure {
                            stage,
                            partition,
                            requested: bytes,
                            available: Some(available),
                        });
                    }
                    match memory.used.compare_exchange_weak(
                        used,
                        used + bytes,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(current) => used = current,
                    }
                }
            }
        }
        Ok(Reservation {
            machine: self.clone(),
            partition,
            bytes,
        })
    }

    /// Bytes currently reserved on `partition`; zero for a partition the
    /// machine does not have.
    pub fn used(&self, partition: usize) -> usize {
        self.inner
            .partitions
            .get(partition)
            .map_or(0, |memory| memory.used.load(Ordering::Relaxed))
    }

    /// Bytes currently reserved across all partitions.
    pub fn total_used(&self) -> usize {
        (0..self.partitions()).map(|p| self.used(p)).sum()
    }

    fn release(&self, partition: usize, bytes: usize) {
        self.inner.partitions[partition]
            .used
            .fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("partitions", &self.partitions())
            .field("hints", &self.hints())
            .field("used", &self.total_used())
            .finish()
    }
}

/// Bytes held on one partition until dropped.
#[derive(Debug)]
pub struct Reservation {
    machine: Machine,
    partition: usize,
    bytes: usize,
}

impl Reservation {
    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.machine.release(self.partition, self.bytes);
    }
}

/// A running thread of execution and the partition it currently occupies.
///
/// A context is owned by exactly one task; it is `Send` so it can travel with
/// a spawned task, but never shared.
#[derive(Debug)]
pub struct Context {
    machine: Machine,
    here: usize,
}

impl Context {
    pub fn here(&self) -> usize {
        self.here
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Relocate to `partition`. Free if already there.
    ///
    /// # Panics
    ///
    /// If `partition` is not a partition of this context's machine.
    pub fn migrate_to(&mut self, partition: usize) {
        if partition == self.here {
            return;
        }
        debug_assert!(partition < self.machine.partitions());
        self.machine.migrations().record(self.here, partition);
        tracing::trace!(from = self.here, to = partition, "migrate");
        self.here = partition;
    }

    /// Context for a child task starting on `partition`.
    pub(crate) fn fork(&self, partition: usize) -> Context {
        Context {
            machine: self.machine.clone(),
            here: partition,
        }
    }
}

/// P×P counters: entry `(from, to)` is the number of relocations from
/// partition `from` to partition `to`.
pub struct MigrationMap {
    partitions: usize,
    counts: Box<[AtomicU64]>,
}

impl MigrationMap {
    fn new(partitions: usize) -> Self {
        Self {
            partitions,
            counts: (0..partitions * partitions)
                .map(|_| AtomicU64::new(0))
                .collect(),
        }
    }

    fn record(&self, from: usize, to: usize) {
        self.counts[from * self.partitions + to].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MigrationSnapshot {
        MigrationSnapshot {
            partitions: self.partitions,
            counts: self
                .counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

/// Point-in-time copy of a [`MigrationMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSnapshot {
    partitions: usize,
    counts: Vec<u64>,
}

impl MigrationSnapshot {
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn get(&self, from: usize, to: usize) -> u64 {
        self.counts[from * self.partitions + to]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Relocations recorded after `earlier` was taken.
    pub fn since(&self, earlier: &MigrationSnapshot) -> MigrationSnapshot {
        debug_assert_eq!(self.partitions, earlier.partitions);
        MigrationSnapshot {
            partitions: self.partitions,
            counts: self
                .counts
                .iter()
                .zip(&earlier.counts)
                .map(|(now, then)| now.saturating_sub(*then))
                .collect(),
        }
    }
}

/// One CSV row per source partition.
impl fmt::Display for MigrationSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.counts.chunks(self.partitions.max(1)) {
            let mut first = true;
            for count in row {
                if !first {
                    f.write_str(",")?;
                }
                write!(f, "{count}")?;
                first = false;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_where_asked() {
        let m = Machine::with_partitions(4).unwrap();
        let ctx = m.context(3).unwrap();
        assert_eq!(ctx.here(), 3);
        assert!(matches!(
            m.context(4),
            Err(Error::InvalidPartition {
                partition: 4,
                partitions: 4
            })
        ));
    }

    #[test]
    fn from_env_uses_the_process_topology() {
        let a = Machine::from_env().unwrap();
        let b = Machine::from_env().unwrap();
        assert_eq!(a.partitions(), Topology::ambient().unwrap().partitions());
        assert_eq!(a.topology(), b.topology());
    }

    #[test]
    fn used_is_zero_off_the_machine() {
        let m = Machine::with_partitions(2).unwrap();
        let _held = m.reserve(Stage::Storage, 1, 10).unwrap();
        assert_eq!(m.used(1), 10);
        assert_eq!(m.used(2), 0);
        assert_eq!(m.used(usize::MAX), 0);
    }

    #[test]
    fn migrations_are_counted_per_edge() {
        let m = Machine::with_partitions(4).unwrap();
        let mut ctx = m.context(0).unwrap();
        ctx.migrate_to(2);
        ctx.migrate_to(2);
        ctx.migrate_to(0);
        ctx.migrate_to(3);

        let snap = m.migrations().snapshot();
        assert_eq!(snap.get(0, 2), 1);
        assert_eq!(snap.get(2, 0), 1);
        assert_eq!(snap.get(0, 3), 1);
        assert_eq!(snap.total(), 3);
        assert_eq!(ctx.here(), 3);
    }

    #[test]
    fn snapshot_since() {
        let m = Machine::with_partitions(2).unwrap();
        let mut ctx = m.context(0).unwrap();
        ctx.migrate_to(1);
        let before = m.migrations().snapshot();
        ctx.migrate_to(0);
        let delta = m.migrations().snapshot().since(&before);
        assert_eq!(delta.get(0, 1), 0);
        assert_eq!(delta.get(1, 0), 1);
    }

    #[test]
    fn snapshot_renders_as_csv() {
        let m = Machine::with_partitions(2).unwrap();
        let mut ctx = m.context(0).unwrap();
        ctx.migrate_to(1);
        assert_eq!(m.migrations().snapshot().to_string(), "0,1\n0,0\n");
    }

    #[test]
    fn reservations_respect_capacity() {
        let m = Machine::new(&Config::new(2).with_partition_bytes(100)).unwrap();
        let a = m.reserve(Stage::Storage, 0, 60).unwrap();
        assert_eq!(m.used(0), 60);

        let err = m.reserve(Stage::Storage, 0, 50).unwrap_err();
        assert_eq!(
            err,
            Error::AllocationFailure {
                stage: Stage::Storage,
                partition: 0,
                requested: 50,
                available: Some(40),
            }
        );

        // Other partitions are unaffected.
        let _b = m.reserve(Stage::Storage, 1, 100).unwrap();

        drop(a);
        assert_eq!(m.used(0), 0);
        let _c = m.reserve(Stage::Storage, 0, 100).unwrap();
    }

    #[test]
    fn unlimited_partitions_only_count() {
        let m = Machine::with_partitions(1).unwrap();
        let r = m.reserve(Stage::Replication, 0, 1 << 40).unwrap();
        assert_eq!(r.bytes(), 1 << 40);
        assert_eq!(m.total_used(), 1 << 40);
        drop(r);
        assert_eq!(m.total_used(), 0);
    }
}
