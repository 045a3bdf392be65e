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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use risingwave_barrier_common::SendBarrierError;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;

use crate::{CollectiveRequest, CollectiveTransport, Rank, ReplyFn};

/// A registered rank's RPC handler. Takes the request and the reply
/// callback for *this* attempt; the handler decides whether to call it
/// immediately (EXIT, or ENTER arriving after the local caller) or stash it
/// for later (ENTER arriving before the local caller).
type Handler = Arc<dyn Fn(CollectiveRequest, ReplyFn) + Send + Sync>;

/// Number of delivery attempts a [`SimTransport`] send should drop before
/// the message reaches the registered handler at all, simulating the
/// lossy-network retry path exercised by spec.md's "master fails
/// mid-ENTER" scenario. This only affects whether the handler gets to see
/// the message — once delivered, replying (immediately or deferred) is
/// entirely the handler's business.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    pub drop_attempts: usize,
}

struct State {
    handlers: HashMap<Rank, Handler>,
    faults: HashMap<Rank, usize>,
    critical: HashSet<Rank>,
}

/// An in-memory, single-process [`CollectiveTransport`] for tests: routes
/// `send` to a registered handler closure per target rank, retrying
/// delivery with the same backoff shape `ControlStreamManager` uses
/// against real compute nodes. Deterministic fault injection
/// (`inject_fault`) stands in for a flaky network without needing real
/// sockets or randomness.
pub struct SimTransport {
    state: Mutex<State>,
    max_attempts: usize,
}

impl SimTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                handlers: HashMap::new(),
                faults: HashMap::new(),
                critical: HashSet::new(),
            }),
            max_attempts: 6,
        })
    }

    /// Registers the RPC handler for `rank`. A real deployment would
    /// dispatch `send` over the network to the peer process's own
    /// `handle_enter_rpc`/`handle_exit_rpc`; here we just call straight
    /// into it.
    pub fn register(&self, rank: Rank, handler: impl Fn(CollectiveRequest, ReplyFn) + Send + Sync + 'static) {
        self.state.lock().handlers.insert(rank, Arc::new(handler));
    }

    pub fn unregister(&self, rank: Rank) {
        self.state.lock().handlers.remove(&rank);
    }

    /// The next `cfg.drop_attempts` sends to `target` are dropped before
    /// delivery before falling through to the registered handler (or to
    /// "no handler" if none is registered, e.g. an evicted rank).
    pub fn inject_fault(&self, target: Rank, cfg: FaultConfig) {
        self.state.lock().faults.insert(target, cfg.drop_attempts);
    }

    /// The next `send` to `target` fails synchronously, before any delivery
    /// attempt, as if `send_barrier_msg` had failed to even construct the
    /// RPC (resource exhaustion on a real transport). One-shot: consumed by
    /// the next `send` call to `target`, whether or not it fires.
    pub fn inject_critical_failure(&self, target: Rank) {
        self.state.lock().critical.insert(target);
    }
}

#[async_trait::async_trait]
impl CollectiveTransport for SimTransport {
    async fn send(
        &self,
        target: Rank,
        req: CollectiveRequest,
        on_reply: ReplyFn,
    ) -> Result<(), SendBarrierError> {
        if self.state.lock().critical.remove(&target) {
            return Err(SendBarrierError(anyhow::anyhow!(
                "simulated failure submitting collective RPC to rank {target}"
            )));
        }

        let strategy = ExponentialBackoff::from_millis(2)
            .max_delay(Duration::from_millis(20))
            .take(self.max_attempts);

        let attempts = AtomicUsize::new(0);
        let delivered: Result<Handler, ()> = Retry::spawn(strategy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                let mut state = self.state.lock();
                if let Some(remaining) = state.faults.get_mut(&target) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(());
                    }
                }
                state.handlers.get(&target).cloned().ok_or(())
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match delivered {
            Ok(handler) => {
                tracing::debug!(target, attempts, "collective request delivered");
                handler(req, on_reply);
            }
            Err(()) => {
                tracing::warn!(target, attempts, "collective send exhausted delivery retries");
                on_reply(-1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Opcode, Rc};

    #[tokio::test]
    async fn delivers_to_registered_handler() {
        let transport = SimTransport::new();
        transport.register(1, |_req, reply| reply(0));

        let (tx, rx) = tokio::sync::oneshot::channel();
        transport
            .send(
                1,
                CollectiveRequest {
                    group: 0,
                    b_num: 0,
                    opcode: Opcode::Enter,
                    tree_fanout: 4,
                },
                Box::new(move |rc: Rc| {
                    let _ = tx.send(rc);
                }),
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn retries_past_injected_drops() {
        let transport = SimTransport::new();
        transport.register(2, |_req, reply| reply(0));
        transport.inject_fault(2, FaultConfig { drop_attempts: 3 });

        let (tx, rx) = tokio::sync::oneshot::channel();
        transport
            .send(
                2,
                CollectiveRequest {
                    group: 0,
                    b_num: 1,
                    opcode: Opcode::Exit,
                    tree_fanout: 4,
                },
                Box::new(move |rc: Rc| {
                    let _ = tx.send(rc);
                }),
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unreachable_target_fails_after_retries() {
        let transport = SimTransport::new();

        let (tx, rx) = tokio::sync::oneshot::channel();
        transport
            .send(
                9,
                CollectiveRequest {
                    group: 0,
                    b_num: 0,
                    opcode: Opcode::Enter,
                    tree_fanout: 4,
                },
                Box::new(move |rc: Rc| {
                    let _ = tx.send(rc);
                }),
            )
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), -1);
    }

    #[tokio::test]
    async fn deferred_reply_arrives_after_handler_holds_it() {
        let transport = SimTransport::new();
        let held: Arc<Mutex<Option<ReplyFn>>> = Arc::new(Mutex::new(None));
        let held_for_handler = held.clone();
        transport.register(3, move |_req, reply| {
            *held_for_handler.lock() = Some(reply);
        });

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        transport
            .send(
                3,
                CollectiveRequest {
                    group: 0,
                    b_num: 1,
                    opcode: Opcode::Enter,
                    tree_fanout: 4,
                },
                Box::new(move |rc: Rc| {
                    let _ = tx.send(rc);
                }),
            )
            .await
            .unwrap();

        // send() has returned, but nothing has replied yet.
        assert!(rx.try_recv().is_err());

        let reply = held.lock().take().unwrap();
        reply(0);
        assert_eq!(rx.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn critical_failure_is_synchronous_and_never_replies() {
        let transport = SimTransport::new();
        transport.register(4, |_req, reply| reply(0));
        transport.inject_critical_failure(4);

        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let result = transport
            .send(
                4,
                CollectiveRequest {
                    group: 0,
                    b_num: 1,
                    opcode: Opcode::Enter,
                    tree_fanout: 4,
                },
                Box::new(move |rc: Rc| {
                    let _ = tx.send(rc);
                }),
            )
            .await;
        assert!(result.is_err());
        assert!(rx.try_recv().is_err());

        // One-shot: the next send to the same target goes through normally.
        transport
            .send(
                4,
                CollectiveRequest {
                    group: 0,
                    b_num: 2,
                    opcode: Opcode::Enter,
                    tree_fanout: 4,
                },
                Box::new(|_rc: Rc| {}),
            )
            .await
            .unwrap();
    }
}
