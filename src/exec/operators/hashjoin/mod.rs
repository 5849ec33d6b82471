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
//! Hash-join probe pipeline operators.

pub mod dynamic_filter;
pub mod hash_join_probe;
pub mod join_bridge;
pub mod join_table;
pub mod key_encoder;
pub mod lookup;
pub mod null_aware_anti;
pub mod output_assembler;
pub mod residual_filter;

pub use dynamic_filter::{DynamicFilterConsumer, JoinDynamicFilter};
pub use hash_join_probe::HashJoinProbe;
pub use join_bridge::{HashJoinBridge, JoinBuildResult, ProbeBarrier};
pub use join_table::{BuildRowId, BuildRowIter, HashMode, JoinTable};
pub use lookup::{HashLookup, JoinResultCursor};
