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
//! Null-aware anti join with a residual filter.
//!
//! A probe row survives only if no build row can match it under the combined
//! equality and residual predicate, where a null join key on either side
//! counts as "possibly matching". That takes a second pass over the build
//! side: probe rows whose equality pairs all failed are re-tested against the
//! null-key build rows, and probe rows with null keys are re-tested against
//! every build row. A null (or true) filter result on any such pair
//! eliminates the probe row; survivors are emitted once with a null build
//! pair.
//!
//! Key exported interfaces:
//! - Types: `NullAwareAntiFilter`.

use arrow::array::{Array, ArrayRef, UInt32Array};
use arrow::compute::take;
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use super::join_table::{BuildRowId, BuildRowIter, JoinTable};
use super::residual_filter::{FilterInput, NoMatchDetector};
use crate::exec::chunk::Chunk;
use crate::exec::selectivity::SelectivityVector;

/// Page size for build row container scans.
pub(crate) const BUILD_SCAN_BATCH: usize = 1024;

/// Two-pass residual filter for the null-aware anti join.
#[derive(Debug)]
pub(crate) struct NullAwareAntiFilter {
    input: FilterInput,
    detector: NoMatchDetector,
    test_null_key_rows: SelectivityVector,
    test_all_rows: SelectivityVector,
    eliminated: Vec<bool>,
    scan_rows: Vec<BuildRowId>,
}

impl NullAwareAntiFilter {
    pub(crate) fn new(input: FilterInput) -> Self {
        Self {
            input,
            detector: NoMatchDetector::default(),
            test_null_key_rows: SelectivityVector::default(),
            test_all_rows: SelectivityVector::default(),
            eliminated: Vec::new(),
            scan_rows: Vec::new(),
        }
    }

    /// Evaluates the filter over the current pair list (which includes miss
    /// pairs) and rewrites `mapping`/`rows` to the surviving probe rows, each
    /// paired with a null build row. Returns the survivor count.
    pub(crate) fn eval(
        &mut self,
        probe: &Chunk,
        table: &dyn JoinTable,
        non_null_rows: &SelectivityVector,
        at_end: bool,
        mapping: &mut Vec<u32>,
        rows: &mut Vec<Option<BuildRowId>>,
    ) -> Result<usize, String> {
        let num_pairs = mapping.len();
        if num_pairs == 0 {
            return Ok(0);
        }
        let input_size = probe.len();
        let chunk = self.input.fill(probe, table, mapping, rows)?;
        let result = self.input.eval_bool(&chunk)?;
        let null_probe_pairs = if self.input.expr().propagates_nulls() {
            self.input.probe_input_null_rows(&chunk)?
        } else {
            vec![false; num_pairs]
        };

        self.eliminated.clear();
        self.eliminated.resize(input_size, false);
        self.test_null_key_rows.resize_fill(input_size, false);
        self.test_all_rows.resize_fill(input_size, false);

        for i in 0..num_pairs {
            let j = mapping[i] as usize;
            if null_probe_pairs[i] {
                // Null probe input under a null-propagating filter: the pair
                // result can never be false, so the probe row cannot anti-match.
                self.eliminated[j] = true;
            } else if non_null_rows.is_valid(j) {
                if result.is_valid(i) && result.value(i) {
                    self.eliminated[j] = true;
                } else {
                    self.test_null_key_rows.set_valid(j, true);
                }
            } else {
                self.test_all_rows.set_valid(j, true);
            }
        }
        for j in 0..input_size {
            if self.eliminated[j] {
                self.test_null_key_rows.set_valid(j, false);
                self.test_all_rows.set_valid(j, false);
            }
        }

        self.test_on_build_rows(probe, table, true)?;
        self.test_on_build_rows(probe, table, false)?;

        let mut num_passed = 0usize;
        for i in 0..num_pairs {
            let j = mapping[i] as usize;
            if let Some(miss) = self.detector.advance(j, self.eliminated[j]) {
                mapping[num_passed] = miss as u32;
                rows[num_passed] = None;
                num_passed += 1;
            }
        }
        if at_end {
            if let Some(miss) = self.detector.finish() {
                mapping[num_passed] = miss as u32;
                rows[num_passed] = None;
                num_passed += 1;
            }
        }
        mapping.truncate(num_passed);
        rows.truncate(num_passed);
        Ok(num_passed)
    }

    /// Tests marked probe rows against build rows in pages of
    /// `BUILD_SCAN_BATCH`. With `null_key_only`, only build rows whose key
    /// contains a null are considered. A probe row with any passing pair is
    /// eliminated and removed from its test set.
    fn test_on_build_rows(
        &mut self,
        probe: &Chunk,
        table: &dyn JoinTable,
        null_key_only: bool,
    ) -> Result<(), String> {
        let Self {
            input,
            test_null_key_rows,
            test_all_rows,
            eliminated,
            scan_rows,
            ..
        } = self;
        let test_set = if null_key_only {
            test_null_key_rows
        } else {
            test_all_rows
        };
        if !test_set.has_selections() {
            return Ok(());
        }

        let mut iter = BuildRowIter::default();
        loop {
            scan_rows.clear();
            let listed = table.list_rows(&mut iter, BUILD_SCAN_BATCH, scan_rows);
            if listed == 0 {
                break;
            }
            let mut page: Vec<Option<BuildRowId>> = Vec::with_capacity(listed);
            for &row in scan_rows.iter() {
                if !null_key_only || table.row_has_null_key(row)? {
                    page.push(Some(row));
                }
            }
            if page.is_empty() {
                continue;
            }
            let page_len = page.len();

            let mut build_columns: Vec<(usize, ArrayRef)> =
                Vec::with_capacity(input.build_inputs().len());
            for projection in input.build_inputs() {
                let extracted = table.extract_column(&page, projection.input_channel)?;
                build_columns.push((projection.output_channel, extracted));
            }

            for j in test_set.selected_rows() {
                let chunk =
                    broadcast_filter_input(input, probe, j, page_len, &build_columns)?;
                let result = input.eval_bool(&chunk)?;
                let passed = (0..page_len).any(|k| result.is_valid(k) && result.value(k));
                if passed {
                    test_set.set_valid(j, false);
                    eliminated[j] = true;
                }
            }
            if !test_set.has_selections() {
                break;
            }
        }
        Ok(())
    }
}

/// Filter input pairing one probe row, repeated `page_len` times, with a page
/// of build rows.
fn broadcast_filter_input(
    input: &FilterInput,
    probe: &Chunk,
    probe_row: usize,
    page_len: usize,
    build_columns: &[(usize, ArrayRef)],
) -> Result<Chunk, String> {
    let indices = UInt32Array::from(vec![probe_row as u32; page_len]);
    let mut columns: Vec<Option<ArrayRef>> = vec![None; input.schema().fields().len()];
    for projection in input.probe_inputs() {
        let column = probe.column(projection.input_channel)?;
        let taken = take(column.as_ref(), &indices, None).map_err(|e| e.to_string())?;
        columns[projection.output_channel] = Some(taken);
    }
    for (filter_channel, column) in build_columns {
        columns[*filter_channel] = Some(Arc::clone(column));
    }
    let mut out = Vec::with_capacity(columns.len());
    for (channel, column) in columns.into_iter().enumerate() {
        out.push(column.ok_or_else(|| {
            format!(
                "join filter input column {} was not assigned",
                input.schema().field(channel).name()
            )
        })?);
    }
    let batch =
        RecordBatch::try_new(Arc::clone(input.schema()), out).map_err(|e| e.to_string())?;
    Ok(Chunk::new(batch))
}
