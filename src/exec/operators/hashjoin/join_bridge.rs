// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Build/probe coordination for one hash-join node.
//!
//! Responsibilities:
//! - Publishes the finished build table (or a build failure) once to all
//!   probe drivers and hands out the dependency they park on meanwhile.
//! - Elects the last probe driver for right/full/right-semi unmatched-build
//!   emission.
//!
//! Key exported interfaces:
//! - Types: `JoinBuildResult`, `HashJoinBridge`, `ProbeBarrier`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::join_table::JoinTable;
use crate::exec::pipeline::dependency::{DependencyHandle, DependencyManager};

/// Outcome of the build side, shared read-only by every probe driver.
#[derive(Clone, Debug)]
pub struct JoinBuildResult {
    pub table: Option<Arc<dyn JoinTable>>,
    /// Set for null-aware anti joins whose build keys contain a null and that
    /// carry no residual filter: the join is universally empty.
    pub anti_join_has_null_keys: bool,
}

#[derive(Default)]
struct BridgeState {
    result: Option<JoinBuildResult>,
    error: Option<String>,
}

/// Shared handle connecting the build pipeline to its probe drivers,
/// addressed by plan-node id.
pub struct HashJoinBridge {
    dep: DependencyHandle,
    state: Mutex<BridgeState>,
}

impl HashJoinBridge {
    pub fn new(node_id: i32, dep_manager: &DependencyManager) -> Self {
        Self {
            dep: dep_manager.get_or_create(format!("join_build:{}", node_id)),
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn dep(&self) -> DependencyHandle {
        self.dep.clone()
    }

    pub fn dep_name(&self) -> &str {
        self.dep.name()
    }

    /// Publishes the build result. A bridge accepts exactly one publication.
    pub fn set_build(&self, result: JoinBuildResult) -> Result<(), String> {
        {
            let mut guard = self.state.lock().expect("join bridge lock");
            if guard.result.is_some() || guard.error.is_some() {
                return Err("join build already set".to_string());
            }
            guard.result = Some(result);
        }
        self.dep.set_ready();
        Ok(())
    }

    /// Propagates a build failure or cancellation; wakes all waiters.
    pub fn set_error(&self, message: impl Into<String>) {
        {
            let mut guard = self.state.lock().expect("join bridge lock");
            if guard.result.is_some() || guard.error.is_some() {
                return;
            }
            guard.error = Some(message.into());
        }
        self.dep.set_ready();
    }

    /// Returns the build result if published, `Ok(None)` while the build is
    /// still running (callers park on `dep()`), or the propagated failure.
    pub fn table_or_wait(&self) -> Result<Option<JoinBuildResult>, String> {
        let guard = self.state.lock().expect("join bridge lock");
        if let Some(err) = guard.error.as_ref() {
            return Err(err.clone());
        }
        Ok(guard.result.clone())
    }
}

/// Peer barrier for the probe drivers of one join node. The last driver to
/// report end-of-input is elected to drain unmatched build rows.
pub struct ProbeBarrier {
    num_drivers: usize,
    finished: AtomicUsize,
}

impl ProbeBarrier {
    pub fn new(num_drivers: usize) -> Self {
        Self {
            num_drivers: num_drivers.max(1),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn num_drivers(&self) -> usize {
        self.num_drivers
    }

    /// Records one driver reaching end-of-input; returns true for exactly the
    /// last arrival. The AcqRel ordering makes every probed-flag write of the
    /// peers visible to the elected driver.
    pub fn all_peers_finished(&self) -> bool {
        let arrived = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        arrived == self.num_drivers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_publishes_once() {
        let manager = DependencyManager::new();
        let bridge = HashJoinBridge::new(3, &manager);
        assert!(bridge.table_or_wait().expect("no error").is_none());
        assert!(!bridge.dep().is_ready());

        bridge
            .set_build(JoinBuildResult {
                table: None,
                anti_join_has_null_keys: true,
            })
            .expect("first set");
        assert!(bridge.dep().is_ready());
        let result = bridge.table_or_wait().expect("no error").expect("ready");
        assert!(result.anti_join_has_null_keys);

        let err = bridge
            .set_build(JoinBuildResult {
                table: None,
                anti_join_has_null_keys: false,
            })
            .expect_err("second set");
        assert!(err.contains("already set"), "err={}", err);
    }

    #[test]
    fn bridge_propagates_build_failure() {
        let manager = DependencyManager::new();
        let bridge = HashJoinBridge::new(4, &manager);
        bridge.set_error("build cancelled");
        assert!(bridge.dep().is_ready());
        let err = bridge.table_or_wait().expect_err("expected error");
        assert!(err.contains("cancelled"), "err={}", err);
    }

    #[test]
    fn barrier_elects_exactly_one_last_probe() {
        let barrier = ProbeBarrier::new(3);
        assert!(!barrier.all_peers_finished());
        assert!(!barrier.all_peers_finished());
        assert!(barrier.all_peers_finished());
    }

    #[test]
    fn single_driver_barrier_elects_immediately() {
        let barrier = ProbeBarrier::new(1);
        assert!(barrier.all_peers_finished());
    }
}
