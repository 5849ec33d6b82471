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
//! Core operator trait and blocking semantics.
//!
//! Responsibilities:
//! - Defines the execution contract between a pipeline driver and one
//!   operator instance: input/output exchange, end-of-input signaling, and
//!   blocked-reason reporting.
//!
//! Key exported interfaces:
//! - Types: `BlockedReason`, `Operator`.

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::DependencyHandle;

/// The execution engine uses cooperative scheduling.
///
/// A driver repeatedly calls `is_blocked` before moving data through an
/// operator. When the operator cannot make progress it returns the dependency
/// it is waiting on; the driver parks until the dependency flips to ready.
/// `is_blocked` is the only suspension point in the operator contract.
#[derive(Clone, Debug)]
pub enum BlockedReason {
    NotBlocked,
    /// Waiting for the join build side to publish its hash table.
    WaitForJoinBuild(DependencyHandle),
}

impl BlockedReason {
    pub fn is_blocked(&self) -> bool {
        !matches!(self, BlockedReason::NotBlocked)
    }
}

/// Operator contract consumed by the driver scheduler.
///
/// Call protocol per driver iteration:
/// - `is_blocked` first; no other method may be called while blocked.
/// - `add_input` only when `needs_input()` is true, with a non-empty chunk.
/// - `get_output` may return `None` to request more input or, after
///   `no_more_input`, to signal completion together with `is_finished`.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn is_blocked(&mut self) -> Result<BlockedReason, String> {
        Ok(BlockedReason::NotBlocked)
    }

    fn needs_input(&self) -> bool;

    fn add_input(&mut self, chunk: Chunk) -> Result<(), String>;

    fn get_output(&mut self) -> Result<Option<Chunk>, String>;

    fn no_more_input(&mut self) -> Result<(), String>;

    fn is_finished(&self) -> bool;

    fn close(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn cancel(&mut self) {
        // Default: nothing to cancel.
    }
}
