//! Fork-join over relocating tasks, with placement hints.
//!
//! A task group spawns each task on a scoped thread with its own [`Context`].
//! Without a hint the child starts on the partition its parent occupies. After
//! [`TaskGroup::hint`] the parent first relocates to the hinted partition,
//! spawns there, and relocates back, so the child starts next to the data it
//! is about to touch and runs without further relocations:
//!
//! ```text
//!   parent @0 ──hint(p2)──► @2 ──spawn──► child @2 ... work ... ──join──► @0
//!                            │
//!                            └──────────── back to @0
//! ```
//!
//! Hints only change where relocations happen, never what a task computes.

use std::{
    panic,
    thread::{self, Scope, ScopedJoinHandle},
};

use crate::{
    config::HintPolicy,
    error::Result,
    machine::{Context, Machine},
    store::Addr,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    policy: HintPolicy,
}

impl Scheduler {
    pub fn new(policy: HintPolicy) -> Self {
        Self { policy }
    }

    /// Scheduler using the machine's configured hint policy.
    pub fn for_machine(machine: &Machine) -> Self {
        Self::new(machine.hints())
    }

    pub fn policy(&self) -> HintPolicy {
        self.policy
    }

    /// Run `f` with a fresh task group rooted at `ctx`.
    ///
    /// Every task spawned in the group has finished when this returns. The
    /// first error, from `f` or from any task, is returned; a panicking task
    /// panics the caller.
    pub fn fork_join<'env, F, R>(&self, ctx: &mut Context, f: F) -> Result<R>
    where
        F: for<'scope> FnOnce(&mut TaskGroup<'scope, 'env>) -> Result<R>,
    {
        let parent = ctx.fork(ctx.here());
        let policy = self.policy;
        let (out, parent) = thread::scope(|scope| {
            let mut group = TaskGroup {
                scope,
                parent,
                policy,
                hint: None,
                pending: Vec::new(),
            };
            let out = f(&mut group);
            let joined = group.join();
            (out.and_then(|r| joined.map(|()| r)), group.parent)
        });
        *ctx = parent;
        out
    }
}

pub struct TaskGroup<'scope, 'env: 'scope> {
    scope: &'scope Scope<'scope, 'env>,
    parent: Context,
    policy: HintPolicy,
    hint: Option<usize>,
    pending: Vec<ScopedJoinHandle<'scope, Result<()>>>,
}

impl<'scope, 'env> TaskGroup<'scope, 'env> {
    /// The spawning context. Anything it touches between spawns relocates it
    /// like any other context.
    pub fn context(&mut self) -> &mut Context {
        &mut self.parent
    }

    /// Start the next spawned task on the partition that owns `addr`.
    pub fn hint(&mut self, addr: Addr) {
        self.hint_partition(addr.partition());
    }

    /// Start the next spawned task on `partition`.
    pub fn hint_partition(&mut self, partition: usize) {
        if partition < self.parent.machine().partitions() {
            self.hint = Some(partition);
        } else {
            tracing::warn!(partition, "placement hint outside the machine ignored");
        }
    }

    /// Spawn `task`; it runs concurrently with everything else in the group.
    ///
    /// Each task is a scoped thread held until the next join, so callers batch
    /// work per partition rather than per element.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: FnOnce(&mut Context) -> Result<()> + Send + 'scope,
    {
        let origin = self.parent.here();
        let start = match (self.hint.take(), self.policy) {
            (Some(target), HintPolicy::Honor) => {
                self.parent.migrate_to(target);
                target
            }
            _ => origin,
        };

        let mut child = self.parent.fork(start);
        let handle = self.scope.spawn(move || {
            let result = task(&mut child);
            // The join point lives with the parent.
            child.migrate_to(origin);
            result
        });
        self.parent.migrate_to(origin);
        self.pending.push(handle);
    }

    /// Tasks spawned since the last join.
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every task spawned since the last join.
    pub fn join(&mut self) -> Result<()> {
        let mut first = Ok(());
        for handle in self.pending.drain(..) {
            match handle.join() {
                Ok(result) => {
                    if first.is_ok() {
                        first = result;
                    }
                }
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        first
    }
}
