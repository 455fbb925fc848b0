//! Row-partitioned sparse matrix built with partition-local construction.
//!
//! # Layout
//!
//! ```text
//!   every partition p                  partition home(i)
//!  ┌──────────────────────┐           ┌───────────────────┐
//!  │ ControlBlock (copy p)│──rows────►│ arena: Row slots  │
//!  │  nrows               │           │  slot(i) ─► Row i │
//!  │  rows_per_partition  │           └───────────────────┘
//!  │  partitions          │
//!  └──────────────────────┘
//! ```
//!
//! The control block is replicated, so a task on any partition finds the row
//! storage without a relocation. Row `i` lives on `home(i)`; touching it
//! relocates the task there.
//!
//! # Construction
//!
//! [`Matrix::create`] goes through these steps, each one once:
//!
//! 1. reserve one control-block copy per partition;
//! 2. reserve one row arena per partition (from the caller's partition);
//! 3. broadcast the control block into every copy;
//! 4. spawn one task per partition, hinted to that partition, which
//!    default-constructs the partition's rows locally; join.
//!
//! Any failure releases everything reserved so far. Afterwards rows are
//! populated with [`Matrix::populate`], which hints each build task to the
//! row's home partition so the appends run without relocations.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    error::{Error, Result},
    machine::Context,
    replicated::Replicated,
    row::{Entry, Row},
    scheduler::Scheduler,
    store::{Addr, PartitionedStore},
};

/// Per-partition metadata. Every copy holds the same values and points to the
/// same row storage.
#[derive(Clone)]
pub struct ControlBlock {
    nrows: usize,
    rows_per_partition: usize,
    partitions: usize,
    rows: Arc<PartitionedStore<Row>>,
}

impl ControlBlock {
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn rows_per_partition(&self) -> usize {
        self.rows_per_partition
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    pub fn rows(&self) -> &PartitionedStore<Row> {
        &self.rows
    }
}

impl PartialEq for ControlBlock {
    fn eq(&self, other: &Self) -> bool {
        self.nrows == other.nrows
            && self.rows_per_partition == other.rows_per_partition
            && self.partitions == other.partitions
            && Arc::ptr_eq(&self.rows, &other.rows)
    }
}

impl Eq for ControlBlock {}

impl fmt::Debug for ControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlBlock")
            .field("nrows", &self.nrows)
            .field("rows_per_partition", &self.rows_per_partition)
            .field("partitions", &self.partitions)
            .field("rows", &Arc::as_ptr(&self.rows))
            .finish()
    }
}

pub struct Matrix {
    control: Replicated<ControlBlock>,
    scheduler: Scheduler,
}

impl Matrix {
    /// Allocate and fully initialize an `nrows`-row matrix with empty rows.
    pub fn create(ctx: &mut Context, nrows: usize) -> Result<Self> {
        Self::create_with_row_capacity(ctx, nrows, 0)
    }

    /// Like [`Matrix::create`], but every row starts with room for
    /// `row_capacity` entries reserved on its home partition.
    pub fn create_with_row_capacity(
        ctx: &mut Context,
        nrows: usize,
        row_capacity: usize,
    ) -> Result<Self> {
        let machine = ctx.machine().clone();
        let topology = machine.topology();
        let _span = tracing::debug_span!("matrix_create", nrows).entered();

        let slots = Replicated::<ControlBlock>::reserve(&machine)?;
        tracing::debug!("control block reserved");

        let rows = Arc::new(PartitionedStore::<Row>::allocate(ctx, nrows)?);

        let control = slots.broadcast(ControlBlock {
            nrows,
            rows_per_partition: topology.per_partition(nrows),
            partitions: topology.partitions(),
            rows: Arc::clone(&rows),
        });

        let scheduler = Scheduler::for_machine(&machine);
        scheduler.fork_join(ctx, |group| {
            for p in 0..topology.partitions() {
                group.hint(rows.base(p)?);
                let rows = &rows;
                group.spawn(move |ctx| {
                    rows.construct_partition_with(ctx, p, |ctx| Row::with_capacity(ctx, row_capacity))
                        .map(|_| ())
                });
            }
            Ok(())
        })?;
        tracing::debug!(constructed = rows.constructed(), "rows constructed");

        Ok(Self { control, scheduler })
    }

    /// Release the matrix: row storage and every control-block copy together.
    pub fn destroy(self) {
        tracing::debug!(nrows = self.nrows(), "matrix destroyed");
    }

    pub fn nrows(&self) -> usize {
        self.control.origin().nrows
    }

    pub fn rows_per_partition(&self) -> usize {
        self.control.origin().rows_per_partition
    }

    pub fn partitions(&self) -> usize {
        self.control.origin().partitions
    }

    /// The control block copy on `ctx`'s partition.
    ///
    /// `ctx` must come from a machine with as many partitions as the one the
    /// matrix was created on.
    pub fn control(&self, ctx: &Context) -> Result<&ControlBlock> {
        let control = self.control.local(ctx)?;
        let found = ctx.machine().partitions();
        if found != control.partitions {
            return Err(Error::ForeignContext {
                expected: control.partitions,
                found,
            });
        }
        Ok(control)
    }

    /// All control block copies.
    pub fn replicas(&self) -> &Replicated<ControlBlock> {
        &self.control
    }

    /// Where row `i` lives. Reads only the local control block copy and never
    /// relocates `ctx`.
    pub fn address(&self, ctx: &Context, i: usize) -> Result<Addr> {
        self.control(ctx)?.rows.address(i)
    }

    /// Append `entries` to row `i` in order.
    ///
    /// Correct from any partition. Run it on `home(i)` (see [`Matrix::populate`])
    /// to avoid the relocation.
    pub fn build(&self, ctx: &mut Context, i: usize, entries: &[Entry]) -> Result<()> {
        let rows = &self.control(ctx)?.rows;
        rows.with(ctx, i, |row| row.extend_from_slice(entries))?;
        tracing::trace!(row = i, appended = entries.len(), at = ctx.here(), "row built");
        Ok(())
    }

    /// Build row `i` in a task started on its home partition and wait for it.
    pub fn populate(&self, ctx: &mut Context, i: usize, entries: &[Entry]) -> Result<()> {
        let addr = self.address(ctx, i)?;
        self.scheduler.fork_join(ctx, |group| {
            group.hint(addr);
            group.spawn(move |ctx| self.build(ctx, i, entries));
            Ok(())
        })
    }

    /// Build several rows with one hinted task per partition and a single join.
    ///
    /// Jobs are grouped by the home partition of their row; each partition's
    /// task applies its jobs in the order given, so repeated rows append
    /// deterministically. Every index is checked before any task starts.
    pub fn populate_many(&self, ctx: &mut Context, jobs: &[(usize, Vec<Entry>)]) -> Result<()> {
        let mut by_home: Vec<Vec<&(usize, Vec<Entry>)>> = vec![Vec::new(); self.partitions()];
        for job in jobs {
            let addr = self.address(ctx, job.0)?;
            by_home[addr.partition()].push(job);
        }
        self.scheduler.fork_join(ctx, |group| {
            for (p, batch) in by_home.iter().enumerate() {
                if batch.is_empty() {
                    continue;
                }
                group.hint_partition(p);
                group.spawn(move |ctx| {
                    for (i, entries) in batch.iter().copied() {
                        self.build(ctx, *i, entries)?;
                    }
                    Ok(())
                });
            }
            Ok(())
        })
    }

    /// Copy of row `i`'s entries. Relocates `ctx` to the row's home.
    pub fn row(&self, ctx: &mut Context, i: usize) -> Result<Vec<Entry>> {
        let rows = &self.control(ctx)?.rows;
        rows.with(ctx, i, |row| row.entries().to_vec())
    }

    pub fn row_len(&self, ctx: &mut Context, i: usize) -> Result<usize> {
        let rows = &self.control(ctx)?.rows;
        rows.with(ctx, i, |row| row.len())
    }

    /// Stored entries across all rows, counted by one local task per partition.
    pub fn nnz(&self, ctx: &mut Context) -> Result<usize> {
        let control = self.control(ctx)?;
        let rows = &control.rows;
        let topology = rows.topology();
        let nrows = control.nrows;
        let total = AtomicUsize::new(0);

        self.scheduler.fork_join(ctx, |group| {
            for p in 0..topology.partitions() {
                group.hint(rows.base(p)?);
                let total = &total;
                group.spawn(move |ctx| {
                    let mut sum = 0;
                    for slot in 0..topology.owned_by(p, nrows) {
                        sum += rows.with(ctx, topology.index(p, slot), |row| row.len())?;
                    }
                    total.fetch_add(sum, Ordering::Relaxed);
                    Ok(())
                });
            }
            Ok(())
        })?;
        Ok(total.into_inner())
    }
}

impl fmt::Debug for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("nrows", &self.nrows())
            .field("rows_per_partition", &self.rows_per_partition())
            .field("partitions", &self.partitions())
            .finish()
    }
}
