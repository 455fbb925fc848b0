//! Cyclic placement of logical indices over memory partitions.
//!
//! Logical index `i` lives on partition `i % P` at local slot `i / P`, so
//! consecutive rows land on consecutive partitions:
//!
//! ```text
//!  P = 4, N = 10
//!
//!  partition:   0    1    2    3
//!  slot 0:      0    1    2    3
//!  slot 1:      4    5    6    7
//!  slot 2:      8    9    -    -
//! ```

use std::{num::NonZeroUsize, sync::OnceLock};

use crate::{
    config::{Config, ENV_PARTITIONS},
    error::{Error, Result},
};

static AMBIENT: OnceLock<Topology> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topology {
    partitions: NonZeroUsize,
}

impl Topology {
    pub fn new(partitions: usize) -> Result<Self> {
        NonZeroUsize::new(partitions)
            .map(|partitions| Self { partitions })
            .ok_or_else(|| {
                Error::config(
                    ENV_PARTITIONS,
                    partitions.to_string(),
                    "at least one partition is required",
                )
            })
    }

    /// Topology of the running process, read from the environment on first
    /// call and fixed afterwards.
    pub fn ambient() -> Result<Self> {
        if let Some(topology) = AMBIENT.get() {
            return Ok(*topology);
        }
        let topology = Self::new(Config::from_env()?.partitions)?;
        Ok(*AMBIENT.get_or_init(|| topology))
    }

    #[inline(always)]
    pub fn partitions(&self) -> usize {
        self.partitions.get()
    }

    /// Partition that owns logical index `i`.
    #[inline(always)]
    pub fn home(&self, i: usize) -> usize {
        i % self.partitions
    }

    /// Position of logical index `i` inside its partition's local array.
    #[inline(always)]
    pub fn slot(&self, i: usize) -> usize {
        i / self.partitions
    }

    /// Inverse of (`home`, `slot`).
    #[inline(always)]
    pub fn index(&self, partition: usize, slot: usize) -> usize {
        slot * self.partitions.get() + partition
    }

    /// Slots each partition needs to hold `n` indices.
    #[inline(always)]
    pub fn per_partition(&self, n: usize) -> usize {
        n.div_ceil(self.partitions.get())
    }

    /// Number of indices in `[0, n)` owned by `partition`.
    pub fn owned_by(&self, partition: usize, n: usize) -> usize {
        let p = self.partitions.get();
        n / p + usize::from(partition < n % p)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn zero_partitions_rejected() {
        assert!(matches!(Topology::new(0), Err(Error::Config { .. })));
    }

    #[test]
    fn walkthrough_placement() {
        let t = Topology::new(8).unwrap();
        assert_eq!(t.per_partition(16), 2);
        assert_eq!((t.home(2), t.slot(2)), (2, 0));
        assert_eq!((t.home(13), t.slot(13)), (5, 1));
    }

    #[test]
    fn placement_is_a_bijection() {
        for p in 1..=9 {
            let t = Topology::new(p).unwrap();
            for n in 0..50 {
                let per = t.per_partition(n);
                let mut seen = HashSet::new();
                for i in 0..n {
                    let (home, slot) = (t.home(i), t.slot(i));
                    assert!(home < p);
                    assert!(slot < per, "p={p} n={n} i={i}");
                    assert!(seen.insert((home, slot)));
                    assert_eq!(t.index(home, slot), i);
                }
            }
        }
    }

    #[test]
    fn groups_are_balanced() {
        for p in 1..=9 {
            let t = Topology::new(p).unwrap();
            for n in 0..50 {
                let mut sizes = vec![0; p];
                for i in 0..n {
                    sizes[t.home(i)] += 1;
                }
                for (partition, &size) in sizes.iter().enumerate() {
                    assert!(size == n / p || size == n.div_ceil(p));
                    assert_eq!(size, t.owned_by(partition, n));
                }
            }
        }
    }

    #[test]
    fn single_partition_is_identity() {
        let t = Topology::new(1).unwrap();
        for i in 0..10 {
            assert_eq!(t.home(i), 0);
            assert_eq!(t.slot(i), i);
        }
    }

    #[test]
    fn ambient_is_stable() {
        let a = Topology::ambient().unwrap();
        let b = Topology::ambient().unwrap();
        assert_eq!(a, b);
    }
}
