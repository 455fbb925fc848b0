//! Region-of-interest markers.
//!
//! A [`Region`] brackets the work being measured. It enters an `info` span for
//! its lifetime, so every event logged inside carries the region name, and
//! reports the elapsed time on exit. A region opened with [`region_on`] also
//! reports the relocations the machine recorded while it was open.

use std::{
    fmt,
    time::{Duration, Instant},
};

use tracing::span::EnteredSpan;

use crate::machine::{Machine, MigrationSnapshot};

#[must_use = "a region ends when the guard is dropped"]
pub struct Region {
    name: &'static str,
    started: Instant,
    baseline: Option<(Machine, MigrationSnapshot)>,
    span: Option<EnteredSpan>,
}

/// Open a timed region.
pub fn region(name: &'static str) -> Region {
    Region::open(name, None)
}

/// Open a timed region that also tracks relocations on `machine`.
pub fn region_on(machine: &Machine, name: &'static str) -> Region {
    let baseline = machine.migrations().snapshot();
    Region::open(name, Some((machine.clone(), baseline)))
}

impl Region {
    fn open(name: &'static str, baseline: Option<(Machine, MigrationSnapshot)>) -> Self {
        let span = tracing::info_span!("region", region = name).entered();
        tracing::info!("region begin");
        Self {
            name,
            started: Instant::now(),
            baseline,
            span: Some(span),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Close the region and return what happened inside it.
    pub fn end(mut self) -> RegionReport {
        self.finish()
    }

    fn finish(&mut self) -> RegionReport {
        let report = RegionReport {
            name: self.name,
            elapsed: self.started.elapsed(),
            migrations: self
                .baseline
                .as_ref()
                .map(|(machine, before)| machine.migrations().snapshot().since(before)),
        };
        tracing::info!(
            elapsed_us = report.elapsed.as_micros() as u64,
            migrations = report.migrations.as_ref().map(MigrationSnapshot::total),
            "region end"
        );
        self.span.take();
        report
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if self.span.is_some() {
            self.finish();
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegionReport {
    pub name: &'static str,
    pub elapsed: Duration,
    /// Relocations recorded inside the region, when tracked.
    pub migrations: Option<MigrationSnapshot>,
}

impl fmt::Display for RegionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}", self.name, self.elapsed)?;
        if let Some(migrations) = &self.migrations {
            write!(f, ", {} migrations", migrations.total())?;
        }
        Ok(())
    }
}
