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

use crate::Rc;

/// Combines a parent's running result with one child subtree's reply,
/// following `crt_hdlr_barrier_aggregate`'s rule: the first non-zero
/// (failing) result anywhere in the subtree wins, and `0` only survives if
/// every child also reported `0`.
pub fn aggregate_rc(acc: Rc, child: Rc) -> Rc {
    if acc != 0 {
        acc
    } else {
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_only_if_all_children_succeed() {
        assert_eq!(aggregate_rc(0, 0), 0);
        assert_eq!(aggregate_rc(0, -1), -1);
        assert_eq!(aggregate_rc(-1, 0), -1);
    }

    #[test]
    fn first_failure_is_sticky() {
        let mut acc = 0;
        for rc in [0, 0, -3, -7, 0] {
            acc = aggregate_rc(acc, rc);
        }
        assert_eq!(acc, -3);
    }
}
