//! Crate-wide error type.

use std::fmt;

use thiserror::Error;

/// Construction step an allocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Per-partition copies of the control block.
    Replication,
    /// Per-partition row arenas.
    Storage,
    /// Default construction of rows inside an arena.
    RowConstruction,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Replication => "replication",
            Stage::Storage => "partitioned storage",
            Stage::RowConstruction => "row construction",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The platform could not satisfy a replicated or partitioned allocation.
    ///
    /// `available` is `None` when the host allocator itself refused.
    #[error(
        "allocation failed during {stage} on partition {partition}: requested {requested} bytes, {}",
        describe_available(.available)
    )]
    AllocationFailure {
        stage: Stage,
        partition: usize,
        requested: usize,
        available: Option<usize>,
    },

    /// Logical row index outside `[0, len)`.
    #[error("row index {index} out of range for {len} rows")]
    InvalidIndex { index: usize, len: usize },

    /// Partition id outside `[0, partitions)`.
    #[error("partition {partition} out of range for {partitions} partitions")]
    InvalidPartition { partition: usize, partitions: usize },

    /// Row accessed before its slot was default-constructed.
    #[error("row {index} has not been constructed")]
    Unconstructed { index: usize },

    /// Context from a machine whose partition count differs from the one the
    /// collection was built on.
    #[error("context from a {found}-partition machine used on a {expected}-partition collection")]
    ForeignContext { expected: usize, found: usize },

    /// Slot constructed twice.
    #[error("slot {slot} on partition {partition} is already constructed")]
    AlreadyConstructed { partition: usize, slot: usize },

    /// Invalid configuration value.
    #[error("invalid configuration {key}={value:?}: {reason}")]
    Config {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

fn describe_available(available: &Option<usize>) -> String {
    match available {
        Some(n) => format!("{n} available"),
        None => "host allocator refused".to_string(),
    }
}

impl Error {
    pub(crate) fn config(key: &'static str, value: impl Into<String>, reason: &'static str) -> Self {
        Self::Config {
            key,
            value: value.into(),
            reason,
        }
    }

    /// Construction step that failed, if this is an allocation failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::AllocationFailure { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
