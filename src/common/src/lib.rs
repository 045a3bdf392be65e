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

//! Ambient stack shared by the barrier crates: error taxonomy, runtime
//! config, and logging setup. Kept deliberately small — this is not a
//! general-purpose utility crate, only what the barrier core and its tests
//! need.

mod config;
mod error;
mod logging;

pub use config::BarrierConfig;
pub use error::{BarrierError, BarrierResult, SendBarrierError};
pub use logging::init_tracing;
