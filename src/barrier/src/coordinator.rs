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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use risingwave_barrier_common::{BarrierConfig, BarrierError, BarrierResult, SendBarrierError};
use risingwave_barrier_group::{GroupView, Rank};
use risingwave_barrier_transport::{
    aggregate_rc, CollectiveRequest, CollectiveTransport, EnterRequestHandle, Opcode, Rc, ReplyFn,
};

/// Wire-level `rc` reported to a caller's `complete_cb` when the broadcast
/// for their barrier could not even be submitted (§7's `send_barrier_msg`
/// failure path) — distinct from `SimTransport`'s `-1` for an exhausted,
/// still-retriable delivery, since this one is terminal.
const CRITICAL_SEND_FAILURE_RC: Rc = -100;

use crate::metrics::{self, BarrierMetrics};
use crate::state::{BarrierState, CompletionFn};

/// The protocol engine: master election, sequence-number assignment,
/// enter/exit state transitions, and master-failover replay for a single
/// group.
///
/// One `bi_lock`-equivalent mutex (`state`) guards every slot and counter.
/// It is never held across a callback or an RPC reply; every public method
/// below releases it before invoking user code or scheduling a send.
pub struct BarrierCoordinator<G: GroupView, T: CollectiveTransport> {
    group: Arc<G>,
    transport: Arc<T>,
    self_rank: Rank,
    /// Cached at construction time, deliberately never refreshed on
    /// membership change — mirrors the source's `exclude_self` list, which
    /// may end up including ranks evicted after construction (see the
    /// open question on stale exclude lists).
    exclude_self: Vec<Rank>,
    state: Mutex<BarrierState>,
    destroyed: AtomicBool,
    config: BarrierConfig,
    metrics: Arc<dyn BarrierMetrics>,
}

impl<G, T> BarrierCoordinator<G, T>
where
    G: GroupView + 'static,
    T: CollectiveTransport + 'static,
{
    /// Equivalent to `barrier_info_init`: picks the lowest-numbered member
    /// as the initial master and caches the exclude-self list.
    pub fn new(group: Arc<G>, transport: Arc<T>, config: BarrierConfig) -> Arc<Self> {
        Self::new_with_metrics(group, transport, config, metrics::noop())
    }

    /// Same as [`Self::new`], reporting in-flight counts and completion
    /// latency through `metrics` instead of discarding them. Grounded in
    /// `GlobalBarrierManager::new`, which always takes an `Arc<MetaMetrics>`
    /// rather than making it optional at the type level; this crate keeps
    /// `new` itself metrics-free so tests and embedders that don't care
    /// aren't forced to construct one.
    pub fn new_with_metrics(
        group: Arc<G>,
        transport: Arc<T>,
        config: BarrierConfig,
        metrics: Arc<dyn BarrierMetrics>,
    ) -> Arc<Self> {
        let roster = group.roster();
        let self_rank = group.self_rank();
        let master_idx = 0;
        let master_rank = roster.at(0).unwrap_or(self_rank);
        let exclude_self: Vec<Rank> = roster
            .ranks()
            .iter()
            .copied()
            .filter(|&r| r != self_rank)
            .collect();

        Arc::new(Self {
            group,
            transport,
            self_rank,
            exclude_self,
            state: Mutex::new(BarrierState::new(master_rank, master_idx)),
            destroyed: AtomicBool::new(false),
            config,
            metrics,
        })
    }

    /// Equivalent to `barrier_info_destroy`. After this call, `barrier()`
    /// fails with `Uninit`.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn self_rank(&self) -> Rank {
        self.self_rank
    }

    pub fn is_master(&self) -> bool {
        self.state.lock().master_rank == self.self_rank
    }

    pub fn num_exited(&self) -> u64 {
        self.state.lock().num_exited
    }

    pub fn num_created(&self) -> u64 {
        self.state.lock().num_created
    }

    /// The three entry-point preconditions plus the fast/slow path split
    /// from the public API description.
    pub fn barrier(self: &Arc<Self>, complete_cb: Option<CompletionFn>) -> BarrierResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(BarrierError::Uninit);
        }

        let flags = self.group.flags();
        if !flags.service_group {
            return Err(BarrierError::NoPerm);
        }
        if !flags.primary || !flags.local {
            return Err(BarrierError::OutOfGroup);
        }

        let complete_cb = complete_cb.ok_or(BarrierError::Inval)?;

        let roster = self.group.roster();
        if roster.len() <= 1 {
            complete_cb(0);
            return Ok(());
        }

        let (pre_arrived, enter_num, is_master, in_flight);
        {
            let mut state = self.state.lock();
            if state.active_count() >= self.config.max_inflight as i64 {
                return Err(BarrierError::Busy);
            }
            let candidate = state.num_created + 1;
            let slot = state.slot_mut(candidate);
            if slot.active {
                return Err(BarrierError::Busy);
            }
            slot.active = true;
            slot.complete = Some(complete_cb);
            slot.started_at = Some(std::time::Instant::now());
            pre_arrived = slot.enter_rpc.take();
            enter_num = candidate;
            state.num_created = enter_num;
            is_master = state.master_rank == self.self_rank;
            in_flight = state.active_count();
        }
        self.metrics.set_in_flight(in_flight);

        if let Some(handle) = pre_arrived {
            handle.reply(0);
        }

        if is_master {
            self.send_enter(enter_num);
        }

        Ok(())
    }

    /// Non-master ENTER handler (§4.4). Returns nothing: either the handle
    /// is replied to immediately, or stashed on the slot for the eventual
    /// local `barrier()` call to consume.
    pub fn handle_enter_rpc(&self, b_num: u64, handle: Box<dyn EnterRequestHandle>) {
        let mut state = self.state.lock();
        if state.num_exited >= b_num {
            drop(state);
            handle.reply(0);
            return;
        }
        let slot = state.slot_mut(b_num);
        if slot.active {
            drop(state);
            handle.reply(0);
        } else {
            slot.enter_rpc = Some(handle);
        }
    }

    /// Non-master EXIT handler (§4.5). Returns the reply code for the
    /// caller to send back over the wire, having already invoked
    /// `complete_cb` outside the lock.
    pub fn handle_exit_rpc(&self, b_num: u64) -> Rc {
        let mut state = self.state.lock();
        if state.num_exited >= b_num {
            return 0;
        }
        debug_assert_eq!(b_num, state.num_exited + 1, "exits must stay strictly ordered");
        state.num_exited = b_num;
        let slot = state.slot_mut(b_num);
        slot.active = false;
        let cb = slot.complete.take();
        drop(state);

        if let Some(cb) = cb {
            cb(0);
        }
        0
    }

    /// `update_master`: scans the roster forward from `master_idx + 1` for
    /// the first live rank. Invoked while already holding `state`, so the
    /// read of group membership below follows the mandated
    /// `bi_lock → group lock` ordering.
    fn update_master_locked(&self, state: &mut BarrierState) -> bool {
        let failed = self.group.failed_ranks();
        if !failed.contains(&state.master_rank) {
            return false;
        }
        let roster = self.group.roster();
        for idx in (state.master_idx + 1)..roster.len() {
            let candidate = roster.at(idx).expect("idx < roster.len()");
            if !failed.contains(&candidate) {
                state.master_rank = candidate;
                state.master_idx = idx;
                return true;
            }
        }
        panic!("update_master: no live rank found after the current master index");
    }

    pub fn update_master(&self) -> bool {
        let mut state = self.state.lock();
        self.update_master_locked(&mut state)
    }

    /// `handle_eviction`: re-elects the master and, if the local rank just
    /// became master, replays missed ENTER/EXIT broadcasts.
    pub fn handle_eviction(self: &Arc<Self>) {
        let replay = {
            let mut state = self.state.lock();
            if !self.update_master_locked(&mut state) {
                return;
            }
            if state.master_rank != self.self_rank {
                return;
            }
            (state.num_exited, state.num_created)
        };
        let (saved_exited, saved_created) = replay;

        tracing::info!(
            self_rank = self.self_rank,
            saved_exited,
            saved_created,
            "promoted to master, replaying barrier broadcasts"
        );

        // Replay EXIT(saved_exited) (a no-op duplicate for ranks that saw
        // it already), then replay every ENTER the old master may not
        // have finished broadcasting, then — per the source's own
        // behavior, not silently "fixed" here — send an extra EXIT for
        // one past the last created barrier even when nothing is pending.
        self.send_exit(saved_exited);
        for k in (saved_exited + 1)..=saved_created {
            self.send_enter(k);
        }
        self.send_exit(saved_created + 1);
    }

    fn send_enter(self: &Arc<Self>, b_num: u64) {
        let this = self.clone();
        self.broadcast(Opcode::Enter, b_num, move |rc| this.enter_cb(b_num, rc));
    }

    fn send_exit(self: &Arc<Self>, b_num: u64) {
        let this = self.clone();
        self.broadcast(Opcode::Exit, b_num, move |rc| this.exit_cb(b_num, rc));
    }

    /// Master-side ENTER completion (§4.2).
    fn enter_cb(self: &Arc<Self>, b_num: u64, rc: Rc) {
        if rc != 0 {
            tracing::warn!(b_num, rc, "ENTER broadcast failed, resending");
            self.send_enter(b_num);
            return;
        }

        let send_exit_now = {
            let mut state = self.state.lock();
            let num_exited = state.num_exited;
            let slot = state.slot_mut(b_num);
            slot.pending_exit = true;
            if num_exited == b_num - 1 {
                slot.pending_exit = false;
                true
            } else {
                false
            }
        };

        if send_exit_now {
            self.send_exit(b_num);
        }
    }

    /// Master-side EXIT completion (§4.3), including the cascade into the
    /// next slot.
    fn exit_cb(self: &Arc<Self>, b_num: u64, rc: Rc) {
        if rc != 0 {
            tracing::warn!(b_num, rc, "EXIT broadcast failed, resending");
            self.send_exit(b_num);
            return;
        }

        let (cb, started_at, in_flight) = {
            let mut state = self.state.lock();
            if state.num_exited >= b_num {
                // Duplicate, e.g. replay's leading EXIT(saved_exited): the
                // same idempotence handle_exit_rpc gives remote ranks.
                return;
            }
            debug_assert_eq!(
                b_num,
                state.num_exited + 1,
                "exits must complete strictly in order"
            );
            state.num_exited = b_num;
            let slot = state.slot_mut(b_num);
            slot.active = false;
            let (complete, started_at) = (slot.complete.take(), slot.started_at.take());
            (complete, started_at, state.active_count())
        };

        self.metrics.set_in_flight(in_flight);
        if let Some(started_at) = started_at {
            self.metrics.record_barrier_latency(started_at.elapsed());
        }
        if let Some(cb) = cb {
            cb(0);
        }

        let next = b_num + 1;
        let cascade = {
            let mut state = self.state.lock();
            let slot = state.slot_mut(next);
            if slot.active && slot.pending_exit {
                slot.pending_exit = false;
                true
            } else {
                false
            }
        };
        if cascade {
            self.send_exit(next);
        }
    }

    /// Catastrophic, unrecoverable failure to submit the broadcast for
    /// `b_num` (§7: "treated as unrecoverable for that barrier only"):
    /// deactivates the slot and invokes the caller's `complete_cb` with the
    /// captured failure, instead of resending. Idempotent — a second call
    /// for the same `b_num` finds the slot already inactive and its
    /// `complete_cb` already taken, and does nothing.
    fn abort_barrier(&self, b_num: u64, err: SendBarrierError) {
        tracing::error!(b_num, %err, "critical failure sending barrier broadcast");
        let (cb, started_at, in_flight) = {
            let mut state = self.state.lock();
            let slot = state.slot_mut(b_num);
            slot.active = false;
            slot.pending_exit = false;
            let (complete, started_at) = (slot.complete.take(), slot.started_at.take());
            (complete, started_at, state.active_count())
        };
        self.metrics.set_in_flight(in_flight);
        if let Some(started_at) = started_at {
            self.metrics.record_barrier_latency(started_at.elapsed());
        }
        if let Some(cb) = cb {
            cb(CRITICAL_SEND_FAILURE_RC);
        }
    }

    /// Broadcasts `opcode` for `b_num` to every rank in the cached
    /// exclude-self list, aggregates replies per §4.6 (first non-zero
    /// child wins), and invokes `on_done` exactly once with the result.
    fn broadcast(
        self: &Arc<Self>,
        opcode: Opcode,
        b_num: u64,
        on_done: impl FnOnce(Rc) + Send + 'static,
    ) {
        // `exclude_self` itself is never refreshed (see the struct doc
        // comment), but building the concrete target set for this send
        // also consults the group's current failed-rank view — mirroring
        // `corpc_create(ctx, group, exclude_list, ...)`, which takes the
        // live group alongside the stale list. A rank the group has
        // already marked failed is not expected to answer.
        let failed = self.group.failed_ranks();
        let targets: Vec<Rank> = self
            .exclude_self
            .iter()
            .copied()
            .filter(|r| !failed.contains(r))
            .collect();
        if targets.is_empty() {
            on_done(0);
            return;
        }

        let total = targets.len();
        let acc = Arc::new(Mutex::new((0usize, 0i32)));
        let on_done: Arc<Mutex<Option<Box<dyn FnOnce(Rc) + Send>>>> =
            Arc::new(Mutex::new(Some(Box::new(on_done))));
        let group_id = self.group.id().0;

        for target in targets {
            let transport = self.transport.clone();
            let acc = acc.clone();
            let on_done = on_done.clone();
            let on_done_err = on_done.clone();
            let this = self.clone();
            let req = CollectiveRequest {
                group: group_id,
                b_num,
                opcode,
                tree_fanout: self.config.tree_fanout,
            };
            tokio::spawn(async move {
                let reply: ReplyFn = Box::new(move |rc| {
                    let mut guard = acc.lock();
                    guard.0 += 1;
                    guard.1 = aggregate_rc(guard.1, rc);
                    if guard.0 == total {
                        if let Some(done) = on_done.lock().take() {
                            done(guard.1);
                        }
                    }
                });
                if let Err(err) = transport.send(target, req, reply).await {
                    // Suppress the normal aggregation path (it will now
                    // never complete, since `reply` above was never
                    // invoked for this target) and abort the barrier
                    // instead of resending: this is the one `send`
                    // failure mode §7 treats as terminal.
                    on_done_err.lock().take();
                    this.abort_barrier(b_num, err);
                }
            });
        }
    }
}
