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

use serde::{Deserialize, Serialize};

/// Configuration threaded through the Coordinator at construction time,
/// mirroring the way `GlobalBarrierManager::new` takes tunables like
/// `in_flight_barrier_nums` from the environment instead of hardcoding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// Fan-out `k` of the k-nomial tree topology used for the collective
    /// ENTER/EXIT broadcasts. Threaded onto `CollectiveRequest` so the
    /// transport layer builds its corpc tree with this topology.
    pub tree_fanout: u32,
    /// Number of barriers the local rank may have outstanding at once.
    /// Default matches the `MAX_INFLIGHT` compile-time ring size in
    /// `risingwave_barrier`; a value here that exceeds it is still capped by
    /// that fixed-size array, since the ring itself isn't dynamically sized.
    pub max_inflight: u32,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            tree_fanout: 4,
            max_inflight: 4,
        }
    }
}

impl BarrierConfig {
    /// Parses a `BarrierConfig` from its JSON form, the same way an embedder
    /// would load it out of a larger JSON config document rather than
    /// constructing it by hand.
    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Serializes back to JSON, e.g. for logging the effective configuration
    /// at startup.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
