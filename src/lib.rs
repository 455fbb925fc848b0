//! Partition-local construction of row-distributed sparse matrices on a
//! simulated migratory-thread machine.
//!
//! The machine ([`machine`]) has P memory partitions. Work runs in a
//! [`Context`] that relocates to whichever partition owns the memory it
//! touches, and every relocation is counted. A [`Matrix`] keeps a replicated
//! control block ([`replicated`]) and distributes its rows round-robin over
//! partition-local arenas ([`store`]). Construction and population fork one
//! task per partition ([`scheduler`]), hinted to start where the data
//! lives, so the work itself runs without relocations.
//!
//! ```no_run
//! use replmat::{Machine, Matrix};
//!
//! # fn main() -> replmat::Result<()> {
//! let machine = Machine::from_env()?;
//! let mut ctx = machine.context(0)?;
//! let a = Matrix::create(&mut ctx, 16)?;
//! a.populate(&mut ctx, 2, &[(0, 1), (3, 1)])?;
//! println!("{}", machine.migrations().snapshot());
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod config;
pub mod error;
pub mod hooks;
pub mod machine;
pub mod matrix;
pub mod replicated;
pub mod row;
pub mod scheduler;
pub mod store;
pub mod topology;

pub use config::{Config, HintPolicy};
pub use error::{Error, Result, Stage};
pub use machine::{Context, Machine, MigrationSnapshot};
pub use matrix::{ControlBlock, Matrix};
pub use row::{Entry, Index, Row, Scalar};
pub use scheduler::{Scheduler, TaskGroup};
pub use store::{Addr, PartitionedStore};
pub use topology::Topology;
