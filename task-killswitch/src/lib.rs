// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.


//! Abort a group of tokio tasks at once.
//!
//! A [`TaskKillswitch`] owns the abort handles of every task spawned through
//! it. Activating the killswitch aborts all of them and prevents any further
//! spawns. Each owner (for example a network connection and the background
//! tasks serving it) keeps its own killswitch, so tearing down one owner
//! never touches the tasks of another.

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task;
use tokio::task::AbortHandle;

use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Drop guard for task removal. If a task panics or finishes, this makes sure
/// it is removed from [`ActiveTasks`] properly.
struct RemoveOnDrop {
    id: task::Id,
    storage: Arc<ActiveTasks>,
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        self.storage.remove_task(self.id);
    }
}

/// A task killswitch that allows aborting all the tasks spawned with it at
/// once. Spawning a future requires a single sharded lock from an internal
/// [`DashMap`].
pub struct TaskKillswitch {
    // Invariant: If `activated` is true, we don't add new tasks anymore.
    activated: AtomicBool,
    storage: Arc<ActiveTasks>,
}

impl TaskKillswitch {
    /// Creates an inactive killswitch without any registered tasks.
    pub fn new() -> Self {
        Self {
            activated: AtomicBool::new(false),
            storage: Arc::default(),
        }
    }

    /// Whether [`TaskKillswitch::activate`] has been called.
    #[inline]
    pub fn is_activated(&self) -> bool {
        // All synchronization is done using locks,
        // so we can use relaxed for our atomics.
        self.activated.load(Ordering::Relaxed)
    }

    /// Number of registered tasks that have neither finished nor been
    /// aborted yet.
    pub fn active_tasks(&self) -> usize {
        self.storage
            .tasks
            .iter()
            .filter(|entry| matches!(entry.value(), TaskEntry::Handle(_)))
            .count()
    }

    /// Spawns `fut` on `runtime` and registers it with this killswitch.
    ///
    /// Returns `None` without spawning anything if the killswitch was already
    /// activated. The returned [`AbortHandle`] can be used to abort this one
    /// task early.
    pub fn spawn_task(
        &self, runtime: &Handle, fut: impl Future<Output = ()> + Send + 'static,
    ) -> Option<AbortHandle> {
        if self.is_activated() {
            return None;
        }

        let storage = Arc::clone(&self.storage);
        let join_handle = runtime.spawn(async move {
            let id = task::id();
            let _guard = RemoveOnDrop { id, storage };
            fut.await;
        });
        let handle = join_handle.abort_handle();

        let res = self
            .storage
            .add_task_if(join_handle.abort_handle(), || !self.is_activated());
        if let Err(handle) = res {
            // Killswitch was activated by the time we got a lock on the map
            // shard
            handle.abort();
            return None;
        }

        Some(handle)
    }

    /// Triggers the killswitch, aborting all registered tasks.
    ///
    /// Activating an already activated killswitch is a no-op. Tasks are not
    /// killed synchronously: tokio aborts a task the next time it yields.
    pub fn activate(&self) {
        // We check `activated` after locking the map shard and before
        // inserting an element. This ensures in-progress spawns either
        // complete before `kill_all()` obtains the lock for that shard, or
        // they abort afterwards.
        if self.activated.swap(true, Ordering::Relaxed) {
            return;
        }

        self.storage.kill_all();
    }
}

impl Default for TaskKillswitch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskKillswitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskKillswitch")
            .field("activated", &self.is_activated())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

enum TaskEntry {
    /// Task was added and not yet removed.
    Handle(AbortHandle),
    /// Task was removed before it was added. This can happen if a spawned
    /// future completes before the spawning thread can add it to the map.
    Tombstone,
}

#[derive(Default)]
struct ActiveTasks {
    tasks: DashMap<task::Id, TaskEntry>,
}

impl ActiveTasks {
    fn kill_all(&self) {
        self.tasks.retain(|_, entry| {
            if let TaskEntry::Handle(task) = entry {
                task.abort();
            }
            false // remove all elements
        });
    }

    fn add_task_if(
        &self, handle: AbortHandle, cond: impl FnOnce() -> bool,
    ) -> Result<(), AbortHandle> {
        use dashmap::Entry::*;
        let id = handle.id();

        match self.tasks.entry(id) {
            Vacant(e) => {
                if !cond() {
                    return Err(handle);
                }
                e.insert(TaskEntry::Handle(handle));
            },
            Occupied(e) if matches!(e.get(), TaskEntry::Tombstone) => {
                // Task was removed before it was added. Clear the map entry and
                // drop the handle.
                e.remove();
            },
            Occupied(_) => panic!("tokio task ID already in use: {id}"),
        }

        Ok(())
    }

    fn remove_task(&self, id: task::Id) {
        use dashmap::Entry::*;
        match self.tasks.entry(id) {
            Vacant(e) => {
                // Task was not added yet, set a tombstone instead.
                e.insert(TaskEntry::Tombstone);
            },
            Occupied(e) if matches!(e.get(), TaskEntry::Tombstone) => {},
            Occupied(e) => {
                e.remove();
            },
        }
    }
}
