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
//! Facade over the build-side hash table.
//!
//! Responsibilities:
//! - Defines the contract the probe operator holds against the shared,
//!   read-only build table: chain-head lookup, duplicate-chain walking, bulk
//!   column extraction, value-id translation, and the probed-flag protocol.
//! - Provides the row-iteration helpers built on top of the probed flag.
//!
//! Key exported interfaces:
//! - Types: `BuildRowId`, `HashMode`, `BuildRowIter`.
//! - Traits: `JoinTable`.

use arrow::array::ArrayRef;
use arrow::datatypes::SchemaRef;

use super::dynamic_filter::JoinDynamicFilter;
use super::lookup::HashLookup;
use crate::exec::selectivity::SelectivityVector;

/// Opaque handle to one row of the build-side row container.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct BuildRowId(pub u64);

/// Key encoding chosen at build time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashMode {
    /// Keys are matched through 64-bit hashes.
    Hash,
    /// Low-cardinality keys are matched through build-time value ids; enables
    /// value-set dynamic filters.
    ValueId,
}

/// Resumable position for the build-row listing helpers. One iterator per
/// driver; never shared.
#[derive(Debug, Default)]
pub struct BuildRowIter {
    pos: u64,
}

impl BuildRowIter {
    pub fn reset(&mut self) {
        self.pos = 0;
    }
}

/// Read-only view of the build hash table shared by all probe drivers.
///
/// The only write permitted after build completes is the probed flag, an
/// atomic bit per build row (`set_probed`).
pub trait JoinTable: Send + Sync + std::fmt::Debug {
    /// Table-order schema: build keys first, then dependent columns.
    fn schema(&self) -> SchemaRef;

    fn num_rows(&self) -> usize;

    /// Number of distinct keys; zero means the build side is empty.
    fn num_distinct(&self) -> usize;

    fn has_duplicate_keys(&self) -> bool;

    fn hash_mode(&self) -> HashMode;

    /// Seed the build side hashed its keys with; probe hashing must match.
    fn hash_seed(&self) -> u64;

    fn key_count(&self) -> usize;

    /// For every row in `lookup.rows`, stores the head of the matching build
    /// chain (or `None`) into `lookup.hits[row]`. Rows not listed are left
    /// untouched.
    fn probe(&self, lookup: &mut HashLookup) -> Result<(), String>;

    /// Next build row with the same key, in build order.
    fn next_duplicate(&self, row: BuildRowId) -> Option<BuildRowId>;

    /// Gathers `channel` of the table schema for `rows`; `None` entries yield
    /// null values.
    fn extract_column(
        &self,
        rows: &[Option<BuildRowId>],
        channel: usize,
    ) -> Result<ArrayRef, String>;

    /// Translates probe key values to build-time value ids into `ids`,
    /// deselecting rows whose value was absent from the build dictionary. For
    /// `key_index == 0` ids are assigned; for later keys they are combined
    /// with the previous ids. Only rows in `active` are touched.
    fn lookup_value_ids(
        &self,
        key_index: usize,
        keys: &ArrayRef,
        active: &mut SelectivityVector,
        ids: &mut [u64],
    ) -> Result<(), String>;

    /// Pushdown filter synthesized from the build-time values of one key, if
    /// the key type supports it.
    fn key_filter(&self, key_index: usize) -> Option<JoinDynamicFilter>;

    /// True if any key column of `row` is null.
    fn row_has_null_key(&self, row: BuildRowId) -> Result<bool, String>;

    fn is_probed(&self, row: BuildRowId) -> bool;

    /// Marks build rows as matched under the full join predicate. `None`
    /// entries are ignored.
    fn set_probed(&self, rows: &[Option<BuildRowId>]);

    /// Appends up to `cap` build rows to `out`, resuming at `iter`.
    fn list_rows(&self, iter: &mut BuildRowIter, cap: usize, out: &mut Vec<BuildRowId>) -> usize {
        self.list_rows_filtered(iter, cap, out, &|_| true)
    }

    /// Rows never marked probed; drives right/full unmatched-build emission.
    fn list_not_probed_rows(
        &self,
        iter: &mut BuildRowIter,
        cap: usize,
        out: &mut Vec<BuildRowId>,
    ) -> usize {
        self.list_rows_filtered(iter, cap, out, &|row| !self.is_probed(row))
    }

    /// Rows marked probed; drives right-semi emission.
    fn list_probed_rows(
        &self,
        iter: &mut BuildRowIter,
        cap: usize,
        out: &mut Vec<BuildRowId>,
    ) -> usize {
        self.list_rows_filtered(iter, cap, out, &|row| self.is_probed(row))
    }

    fn list_rows_filtered(
        &self,
        iter: &mut BuildRowIter,
        cap: usize,
        out: &mut Vec<BuildRowId>,
        keep: &dyn Fn(BuildRowId) -> bool,
    ) -> usize {
        let num_rows = self.num_rows() as u64;
        let mut added = 0usize;
        while iter.pos < num_rows && added < cap {
            let row = BuildRowId(iter.pos);
            iter.pos += 1;
            if keep(row) {
                out.push(row);
                added += 1;
            }
        }
        added
    }
}
