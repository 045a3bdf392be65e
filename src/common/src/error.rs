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

use thiserror::Error;

/// Error taxonomy surfaced to callers of the public barrier API.
///
/// Every variant maps to one of the wire-level `rc` codes the protocol uses
/// for aggregation (`0` on success, non-zero otherwise); see
/// [`BarrierError::code`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierError {
    /// Runtime or default RPC context not ready.
    #[error("barrier runtime is not initialized")]
    Uninit,
    /// Missing required argument, e.g. no completion callback.
    #[error("invalid argument")]
    Inval,
    /// `barrier` invoked on a client (non-service) group.
    #[error("barrier is not supported on a client group")]
    NoPerm,
    /// `barrier` invoked on a secondary or remote group.
    #[error("barrier is not supported on this group")]
    OutOfGroup,
    /// More than `MAX_INFLIGHT` barriers are outstanding locally.
    #[error("too many in-flight barriers")]
    Busy,
    /// An RPC handler received a request with no resolvable group.
    #[error("no such group")]
    Nonexist,
}

impl BarrierError {
    /// The wire-level return code carried in RPC replies and aggregated by
    /// the collective transport (§4.6: first non-zero child wins).
    pub fn code(self) -> i32 {
        match self {
            BarrierError::Uninit => -1,
            BarrierError::Inval => -2,
            BarrierError::NoPerm => -3,
            BarrierError::OutOfGroup => -4,
            BarrierError::Busy => -5,
            BarrierError::Nonexist => -6,
        }
    }
}

pub type BarrierResult<T> = std::result::Result<T, BarrierError>;

/// Catastrophic, non-taxonomy failure while constructing or submitting a
/// broadcast RPC (`send_barrier_msg` in the original source). Terminal for
/// the one barrier it was raised for; never retried.
#[derive(Error, Debug)]
#[error("failed to send barrier broadcast: {0}")]
pub struct SendBarrierError(#[from] pub anyhow::Error);
