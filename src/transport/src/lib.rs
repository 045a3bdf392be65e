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

//! Collective transport: the RPC boundary the barrier core sends ENTER/EXIT
//! broadcasts across and receives them on.
//!
//! Grounded on two things: the wire shape (opcodes, aggregation rule) comes
//! from `crt_hdlr_barrier_enter`/`crt_hdlr_barrier_exit`/
//! `crt_hdlr_barrier_aggregate` in the original CaRT barrier implementation;
//! the async request/reply idiom (spawned retry loop, boxed completion
//! callback run outside any lock) comes from
//! `LocalBarrierWorker`'s RPC dispatch and `ControlStreamManager`'s
//! `ExponentialBackoff`-driven retry.
//!
//! Nothing in this crate holds the barrier core's lock: by the time a
//! [`CollectiveTransport`] method is called, or a completion callback is
//! invoked, the core has already released it (spec.md §5).

mod aggregate;
mod sim;

pub use aggregate::aggregate_rc;
pub use sim::{FaultConfig, SimTransport};

use std::fmt;

pub use risingwave_barrier_common::SendBarrierError;

pub type Rank = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Enter,
    Exit,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Enter => write!(f, "BARRIER_ENTER"),
            Opcode::Exit => write!(f, "BARRIER_EXIT"),
        }
    }
}

/// A collective ENTER/EXIT broadcast, addressed by group and sequence
/// number. Mirrors the fields CaRT marshals onto `crt_barrier_in`.
#[derive(Debug, Clone, Copy)]
pub struct CollectiveRequest {
    pub group: u64,
    pub b_num: u64,
    pub opcode: Opcode,
    /// Fan-out `k` of the corpc tree this broadcast should use, taken from
    /// `BarrierConfig::tree_fanout`. Mirrors `corpc_create`'s own `topology`
    /// argument; a real transport would pass this straight into tree
    /// construction instead of hardcoding the fan-out.
    pub tree_fanout: u32,
}

/// Wire-level result code: `0` on success, a negative [`BarrierError`] code
/// on failure. Kept as a bare `i32` at this boundary because that is what
/// actually crosses the wire and what `aggregate_rc` combines — decoding it
/// back to a `BarrierError` is the caller's job.
pub type Rc = i32;

/// Invoked exactly once, off the core's lock, when a broadcast RPC to a
/// single child (or the whole subtree rooted at it) completes or
/// exhausts its retries.
pub type ReplyFn = Box<dyn FnOnce(Rc) + Send>;

/// A held reference to an inbound ENTER RPC whose reply must be deferred
/// until the local rank calls `barrier()` on the same `b_num`. Stands in
/// for CaRT's manual `req_addref`/`req_decref` bookkeeping on
/// `bi_enter_rpc`: the handle owns the one reply and the barrier core
/// drops it (moving it, rather than re-acquiring a reference) once it can
/// answer.
pub trait EnterRequestHandle: Send {
    fn reply(self: Box<Self>, rc: Rc);
}

/// The common-case [`EnterRequestHandle`]: wraps the transport-level
/// [`ReplyFn`] for the inbound request so an embedder's RPC layer can hand
/// it straight to `handle_enter_rpc` without writing its own handle type.
pub struct ReplyHandle(Option<ReplyFn>);

impl ReplyHandle {
    pub fn new(reply: ReplyFn) -> Self {
        Self(Some(reply))
    }
}

impl EnterRequestHandle for ReplyHandle {
    fn reply(mut self: Box<Self>, rc: Rc) {
        if let Some(reply) = self.0.take() {
            reply(rc);
        }
    }
}

/// The broadcast fan-out boundary. A k-nomial tree send to all live
/// children completes through exactly one `ReplyFn` invocation per target,
/// carrying the aggregated result of that child's subtree.
#[async_trait::async_trait]
pub trait CollectiveTransport: Send + Sync {
    /// Sends `req` to `target` and, after retries are exhausted or a reply
    /// arrives, invokes `on_reply` with the aggregated subtree result.
    /// Never invoked while the caller holds any lock.
    ///
    /// Returns `Err` only for a catastrophic, synchronous failure to submit
    /// the request at all (`send_barrier_msg`'s `crt_corpc_req_create`/
    /// `crt_req_send` failing in the original source) — `on_reply` is never
    /// called in that case. An ordinary network-level failure (timeout, bad
    /// reply) still goes through `on_reply`, not this `Result`, since §7
    /// treats it as retriable rather than terminal.
    async fn send(
        &self,
        target: Rank,
        req: CollectiveRequest,
        on_reply: ReplyFn,
    ) -> Result<(), SendBarrierError>;
}
