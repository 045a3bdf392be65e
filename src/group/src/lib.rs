// Copyright 2026 RisingWave Barrier Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Group View: the external collaborator that provides group identity, the
//! ordered member roster, the local rank, and the current failed-rank set.
//!
//! The real membership and failure-detection layer lives outside this
//! workspace (see spec.md §1 — "deliberately out of scope"). This crate only
//! defines the trait the barrier core depends on, plus an in-memory
//! implementation used by tests and by any embedder that wants a minimal
//! working group without a real cluster.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

pub type Rank = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u64);

/// Primary/service/local flags gating `barrier`'s preconditions (spec.md
/// §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFlags {
    /// Top-level, locally-served group. Barriers are only supported here.
    pub primary: bool,
    /// `false` marks a client group — `barrier` fails with `NO_PERM`.
    pub service_group: bool,
    /// `false` marks a remote group — `barrier` fails with `OUT_OF_GROUP`.
    pub local: bool,
}

impl GroupFlags {
    pub const PRIMARY_SERVICE_LOCAL: GroupFlags = GroupFlags {
        primary: true,
        service_group: true,
        local: true,
    };
}

/// A snapshot of the ordered member roster, taken under the group's
/// reader/writer lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    ranks: Vec<Rank>,
}

impl Roster {
    pub fn new(ranks: Vec<Rank>) -> Self {
        Self { ranks }
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    pub fn ranks(&self) -> &[Rank] {
        &self.ranks
    }

    /// Index of `rank` in the roster, if present.
    pub fn index_of(&self, rank: Rank) -> Option<usize> {
        self.ranks.iter().position(|&r| r == rank)
    }

    pub fn at(&self, idx: usize) -> Option<Rank> {
        self.ranks.get(idx).copied()
    }
}

/// External collaborator: group identity, roster, and failure view.
///
/// Implementations must guard roster and failed-rank state with their own
/// reader/writer lock (spec.md §5); callers that need a consistent
/// (roster, failed-set) pair should take a single [`GroupView::failed_ranks`]
/// and [`GroupView::roster`] call back to back and tolerate the small race,
/// exactly as the original source does.
pub trait GroupView: Send + Sync {
    fn id(&self) -> GroupId;

    fn flags(&self) -> GroupFlags;

    /// The local process's rank within this group.
    fn self_rank(&self) -> Rank;

    fn roster(&self) -> Roster;

    /// Current failed-rank set. The membership layer is assumed to provide
    /// a consistent view (spec.md's Non-goals: split-brain resolution is
    /// not this core's job).
    fn failed_ranks(&self) -> Arc<HashSet<Rank>>;

    fn is_failed(&self, rank: Rank) -> bool {
        self.failed_ranks().contains(&rank)
    }
}

struct InMemoryGroupState {
    roster: Roster,
    failed: Arc<HashSet<Rank>>,
}

/// In-memory [`GroupView`] for tests and for embedders without a real
/// cluster. Mirrors the shape of `crt_grp_priv`: an ordered rank list, a
/// failed-rank set, and a single rwlock guarding both.
pub struct InMemoryGroup {
    id: GroupId,
    flags: GroupFlags,
    self_rank: Rank,
    state: RwLock<InMemoryGroupState>,
    on_eviction: RwLock<Vec<Box<dyn Fn() + Send + Sync>>>,
}

impl InMemoryGroup {
    pub fn new(id: GroupId, flags: GroupFlags, self_rank: Rank, ranks: Vec<Rank>) -> Arc<Self> {
        Arc::new(Self {
            id,
            flags,
            self_rank,
            state: RwLock::new(InMemoryGroupState {
                roster: Roster::new(ranks),
                failed: Arc::new(HashSet::new()),
            }),
            on_eviction: RwLock::new(Vec::new()),
        })
    }

    /// Registers a listener invoked synchronously after [`Self::evict`]
    /// updates the failed-rank set. The barrier core wires
    /// `handle_eviction` through this hook.
    pub fn on_eviction(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.on_eviction.write().push(Box::new(listener));
    }

    /// Marks `rank` as failed and notifies eviction listeners.
    pub fn evict(&self, rank: Rank) {
        {
            let mut state = self.state.write();
            if state.failed.contains(&rank) {
                return;
            }
            let mut failed = (*state.failed).clone();
            failed.insert(rank);
            state.failed = Arc::new(failed);
        }
        tracing::info!(rank, group = self.id.0, "rank evicted");
        for listener in self.on_eviction.read().iter() {
            listener();
        }
    }
}

impl GroupView for InMemoryGroup {
    fn id(&self) -> GroupId {
        self.id
    }

    fn flags(&self) -> GroupFlags {
        self.flags
    }

    fn self_rank(&self) -> Rank {
        self.self_rank
    }

    fn roster(&self) -> Roster {
        self.state.read().roster.clone()
    }

    fn failed_ranks(&self) -> Arc<HashSet<Rank>> {
        self.state.read().failed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_index_lookup() {
        let roster = Roster::new(vec![3, 1, 2]);
        assert_eq!(roster.index_of(1), Some(1));
        assert_eq!(roster.index_of(9), None);
        assert_eq!(roster.at(2), Some(2));
    }

    #[test]
    fn eviction_updates_failed_set_and_notifies() {
        let group = InMemoryGroup::new(
            GroupId(0),
            GroupFlags::PRIMARY_SERVICE_LOCAL,
            0,
            vec![0, 1, 2],
        );
        let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = notified.clone();
        group.on_eviction(move || flag.store(true, std::sync::atomic::Ordering::SeqCst));

        assert!(!group.is_failed(1));
        group.evict(1);
        assert!(group.is_failed(1));
        assert!(notified.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn duplicate_eviction_is_a_no_op() {
        let group = InMemoryGroup::new(
            GroupId(0),
            GroupFlags::PRIMARY_SERVICE_LOCAL,
            0,
            vec![0, 1],
        );
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        group.on_eviction(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        group.evict(1);
        group.evict(1);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
