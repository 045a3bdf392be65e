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

//! Distributed collective barrier core.
//!
//! Drives a two-phase ENTER/EXIT broadcast from a dynamically elected
//! master rank across a group, tolerating master failure mid-barrier and
//! delivering each local caller's completion exactly once. Group
//! membership and the unreliable RPC transport are external collaborators
//! (see `risingwave_barrier_group` and `risingwave_barrier_transport`);
//! this crate is the protocol engine alone.

mod coordinator;
mod metrics;
mod state;

pub use coordinator::BarrierCoordinator;
pub use metrics::{BarrierMetrics, NoopMetrics};
pub use state::{CompletionFn, Slot, MAX_INFLIGHT};

pub use risingwave_barrier_common::{BarrierConfig, BarrierError, BarrierResult, SendBarrierError};
pub use risingwave_barrier_group::{GroupFlags, GroupId, GroupView, InMemoryGroup, Rank, Roster};
pub use risingwave_barrier_transport::{
    CollectiveRequest, CollectiveTransport, EnterRequestHandle, Opcode, Rc, ReplyFn, SimTransport,
};
