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
//! Expression evaluation seam.
//!
//! Responsibilities:
//! - Defines the contract the execution operators use to evaluate residual
//!   predicates; the expression engine itself lives behind this trait.
//!
//! Key exported interfaces:
//! - Traits: `FilterExpr`.

use std::fmt;

use arrow::array::ArrayRef;

use crate::exec::chunk::Chunk;

/// A compiled boolean predicate evaluated over a filter-input chunk.
///
/// The operator assembles the filter input with one column per entry of
/// `fields()`, in order. `evaluate` returns a boolean column of the input's
/// length; null results are interpreted by the caller (joins treat them as
/// `false`).
pub trait FilterExpr: fmt::Debug + Send + Sync {
    /// Distinct field names referenced by the predicate, in filter-input
    /// column order.
    fn fields(&self) -> &[String];

    /// True if a null in any referenced input produces a null result.
    fn propagates_nulls(&self) -> bool;

    fn evaluate(&self, input: &Chunk) -> Result<ArrayRef, String>;
}
