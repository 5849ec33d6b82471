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
//! Hash-join plan node description.
//!
//! Responsibilities:
//! - Defines join types and the node-level configuration consumed by the
//!   probe operator: schemas, key channels, optional residual predicate.
//!
//! Key exported interfaces:
//! - Types: `JoinType`, `HashJoinNode`.
//! - Functions: `make_table_schema`, `join_type_str`.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};

use crate::exec::expr::FilterExpr;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftSemi,
    RightSemi,
    NullAwareLeftAnti,
}

impl JoinType {
    /// Modes that keep probe rows without a build match in the result set:
    /// misses are materialized as `(probe_row, null)` pairs.
    pub fn emits_probe_misses(self) -> bool {
        matches!(
            self,
            JoinType::LeftOuter | JoinType::FullOuter | JoinType::NullAwareLeftAnti
        )
    }

    /// Modes whose unmatched-build emission runs after the last probe driver
    /// finishes.
    pub fn is_right_family(self) -> bool {
        matches!(
            self,
            JoinType::RightOuter | JoinType::FullOuter | JoinType::RightSemi
        )
    }

    /// Modes that produce nothing when the build side is empty, allowing the
    /// pipeline to finish early.
    pub fn short_circuits_on_empty_build(self) -> bool {
        matches!(
            self,
            JoinType::Inner | JoinType::LeftSemi | JoinType::RightOuter | JoinType::RightSemi
        )
    }

    /// Modes eligible for dynamic-filter pushdown to upstream scans.
    pub fn supports_dynamic_filters(self) -> bool {
        matches!(
            self,
            JoinType::Inner | JoinType::LeftSemi | JoinType::RightSemi
        )
    }
}

/// Stable string label for one join type, used by diagnostics and errors.
pub fn join_type_str(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => "INNER",
        JoinType::LeftOuter => "LEFT_OUTER",
        JoinType::RightOuter => "RIGHT_OUTER",
        JoinType::FullOuter => "FULL_OUTER",
        JoinType::LeftSemi => "LEFT_SEMI",
        JoinType::RightSemi => "RIGHT_SEMI",
        JoinType::NullAwareLeftAnti => "NULL_AWARE_LEFT_ANTI",
    }
}

/// Configuration for one hash-join node, consumed by the probe operator.
#[derive(Clone, Debug)]
pub struct HashJoinNode {
    pub node_id: i32,
    pub join_type: JoinType,
    /// Probe-side input schema.
    pub probe_schema: SchemaRef,
    /// Build-side input schema, in plan order.
    pub build_schema: SchemaRef,
    /// Output schema; every column must resolve by name to the probe side or
    /// to the build table.
    pub output_schema: SchemaRef,
    /// Key channels into `probe_schema`, parallel to `build_key_channels`.
    pub probe_key_channels: Vec<usize>,
    /// Key channels into `build_schema`.
    pub build_key_channels: Vec<usize>,
    /// Optional residual predicate evaluated per emitted pair.
    pub filter: Option<Arc<dyn FilterExpr>>,
}

/// Schema of the build hash-table row: key columns first, then the remaining
/// build columns in plan order.
pub fn make_table_schema(
    build_schema: &SchemaRef,
    build_key_channels: &[usize],
) -> Result<SchemaRef, String> {
    let mut fields = Vec::with_capacity(build_schema.fields().len());
    let mut key_set = HashSet::with_capacity(build_key_channels.len());
    for &channel in build_key_channels {
        let field = build_schema
            .fields()
            .get(channel)
            .ok_or_else(|| format!("build key channel {} out of bounds", channel))?;
        fields.push(field.clone());
        key_set.insert(channel);
    }
    for (i, field) in build_schema.fields().iter().enumerate() {
        if !key_set.contains(&i) {
            fields.push(field.clone());
        }
    }
    Ok(Arc::new(Schema::new(fields)))
}
