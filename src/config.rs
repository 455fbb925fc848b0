//! Process-wide machine configuration.
//!
//! Values come from defaults, then `REPLMAT_*` environment variables, then
//! whatever the caller overrides (the demo binary layers its CLI on top).

use std::{env, str::FromStr};

use crate::{
    error::{Error, Result},
    topology::Topology,
};

pub const ENV_PARTITIONS: &str = "REPLMAT_PARTITIONS";
pub const ENV_PARTITION_BYTES: &str = "REPLMAT_PARTITION_BYTES";
pub const ENV_HINTS: &str = "REPLMAT_HINTS";

/// Partitions on one node of the reference hardware.
pub const DEFAULT_PARTITIONS: usize = 8;

/// Whether the scheduler acts on placement hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintPolicy {
    /// Relocate to the hinted partition before spawning.
    #[default]
    Honor,
    /// Spawn on the parent's partition; tasks relocate lazily on first access.
    Ignore,
}

impl FromStr for HintPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "honor" | "on" | "1" | "true" => Ok(HintPolicy::Honor),
            "ignore" | "off" | "0" | "false" => Ok(HintPolicy::Ignore),
            _ => Err(Error::config(ENV_HINTS, s, "expected honor or ignore")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of memory partitions, fixed for the process lifetime.
    pub partitions: usize,
    /// Byte capacity of each partition. `None` means only the host allocator limits it.
    pub partition_bytes: Option<usize>,
    pub hints: HintPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            partition_bytes: None,
            hints: HintPolicy::Honor,
        }
    }
}

impl Config {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions,
            ..Self::default()
        }
    }

    /// Defaults overridden by any `REPLMAT_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`Config::from_env`], but the partition count is the process-wide
    /// one from [`Topology::ambient`], read once on first use.
    pub fn ambient() -> Result<Self> {
        let mut config = Self::from_env()?;
        config.partitions = Topology::ambient()?.partitions();
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_PARTITIONS) {
            config.partitions = parse_count(ENV_PARTITIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PARTITION_BYTES) {
            config.partition_bytes = Some(parse_count(ENV_PARTITION_BYTES, &raw)?);
        }
        if let Some(raw) = lookup(ENV_HINTS) {
            config.hints = raw.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_partition_bytes(mut self, bytes: usize) -> Self {
        self.partition_bytes = Some(bytes);
        self
    }

    pub fn with_hints(mut self, hints: HintPolicy) -> Self {
        self.hints = hints;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(Error::config(
                ENV_PARTITIONS,
                "0",
                "at least one partition is required",
            ));
        }
        Ok(())
    }
}

fn parse_count(key: &'static str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|_| Error::config(key, raw, "expected a non-negative integer"))
}
