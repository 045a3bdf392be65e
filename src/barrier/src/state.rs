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

use std::time::Instant;

use risingwave_barrier_transport::EnterRequestHandle;

/// Fixed size of the in-flight barrier ring. Small on purpose: barriers are
/// rare, ordered events, not a high-throughput path.
pub const MAX_INFLIGHT: usize = 4;

pub type CompletionFn = Box<dyn FnOnce(i32) + Send>;

/// One element of the bounded ring of in-flight barrier states, indexed by
/// `b_num % MAX_INFLIGHT`.
#[derive(Default)]
pub struct Slot {
    pub active: bool,
    /// Set on a non-master rank once its ENTER has been acknowledged but the
    /// previous barrier hasn't exited yet (exits must stay strictly
    /// ordered).
    pub pending_exit: bool,
    /// A received ENTER RPC that arrived before the local caller. Held
    /// until the local `barrier()` call shows up and replies to it.
    pub enter_rpc: Option<Box<dyn EnterRequestHandle>>,
    pub complete: Option<CompletionFn>,
    /// Set when the slot is activated by a local `barrier()` call; read back
    /// out (and cleared) on completion to report `BarrierMetrics::record_barrier_latency`.
    pub started_at: Option<Instant>,
}

/// Per-group barrier state, guarded by a single mutex (`bi_lock`) covering
/// every field here including the slot ring.
pub struct BarrierState {
    pub master_rank: u32,
    pub master_idx: usize,
    pub num_created: u64,
    pub num_exited: u64,
    pub slots: [Slot; MAX_INFLIGHT],
}

impl BarrierState {
    pub fn new(master_rank: u32, master_idx: usize) -> Self {
        Self {
            master_rank,
            master_idx,
            num_created: 0,
            num_exited: 0,
            slots: Default::default(),
        }
    }

    pub fn slot_mut(&mut self, b_num: u64) -> &mut Slot {
        &mut self.slots[(b_num as usize) % MAX_INFLIGHT]
    }

    /// Count of slots currently active, for `BarrierMetrics::set_in_flight`.
    pub fn active_count(&self) -> i64 {
        self.slots.iter().filter(|s| s.active).count() as i64
    }
}
