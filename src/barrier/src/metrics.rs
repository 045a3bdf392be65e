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

use std::sync::Arc;
use std::time::Duration;

/// Counter/latency hook for a [`crate::BarrierCoordinator`], analogous to
/// `MetaMetrics`'s barrier gauges (`in_flight_barrier_nums`,
/// `barrier_latency`) in `GlobalBarrierManager`. A no-op default keeps tests
/// and embedders that don't care about metrics free of any Prometheus
/// dependency.
pub trait BarrierMetrics: Send + Sync {
    /// Number of slots currently active (broadcast in flight or awaiting
    /// exit), recomputed after every slot activation/release.
    fn set_in_flight(&self, count: i64) {
        let _ = count;
    }

    /// Wall-clock time from a barrier's local activation to its completion,
    /// whether it completed normally or was aborted.
    fn record_barrier_latency(&self, duration: Duration) {
        let _ = duration;
    }
}

/// The default hook: every call is a no-op.
pub struct NoopMetrics;

impl BarrierMetrics for NoopMetrics {}

pub(crate) fn noop() -> Arc<dyn BarrierMetrics> {
    Arc::new(NoopMetrics)
}
