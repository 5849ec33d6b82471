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
//! Residual join predicate evaluation.
//!
//! Responsibilities:
//! - Assembles the one-row-per-pair filter input (probe columns gathered
//!   through the row mapping, build columns extracted from matched rows) and
//!   evaluates the predicate; a null result counts as false.
//! - Interprets the result per join mode: plain compaction for the inner
//!   family, synthetic miss rows for left/full outer, first-match-only
//!   emission for left semi.
//!
//! Key exported interfaces:
//! - Types: `FilterInput`, `ResidualFilter`, `NoMatchDetector`, `LeftSemiTracker`.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, BooleanArray, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use super::join_table::{BuildRowId, JoinTable};
use super::output_assembler::Projection;
use crate::exec::chunk::Chunk;
use crate::exec::expr::FilterExpr;
use crate::exec::node::join::JoinType;

/// Shared filter-input assembly for the residual and null-aware anti paths.
#[derive(Debug)]
pub(crate) struct FilterInput {
    expr: Arc<dyn FilterExpr>,
    schema: SchemaRef,
    probe_inputs: Vec<Projection>,
    build_inputs: Vec<Projection>,
}

impl FilterInput {
    /// Splits the predicate's referenced fields between the probe schema and
    /// the build table schema. A field found on neither side is fatal.
    pub(crate) fn try_new(
        expr: Arc<dyn FilterExpr>,
        probe_schema: &SchemaRef,
        table_schema: &SchemaRef,
    ) -> Result<Self, String> {
        let mut probe_inputs = Vec::new();
        let mut build_inputs = Vec::new();
        let mut fields = Vec::with_capacity(expr.fields().len());
        for (filter_channel, name) in expr.fields().iter().enumerate() {
            if let Some((channel, field)) = probe_schema.column_with_name(name) {
                probe_inputs.push(Projection {
                    input_channel: channel,
                    output_channel: filter_channel,
                });
                fields.push(Field::new(name, field.data_type().clone(), true));
            } else if let Some((channel, field)) = table_schema.column_with_name(name) {
                build_inputs.push(Projection {
                    input_channel: channel,
                    output_channel: filter_channel,
                });
                fields.push(Field::new(name, field.data_type().clone(), true));
            } else {
                return Err(format!(
                    "join filter field {} not in probe or build input",
                    name
                ));
            }
        }
        Ok(Self {
            expr,
            schema: Arc::new(Schema::new(fields)),
            probe_inputs,
            build_inputs,
        })
    }

    pub(crate) fn expr(&self) -> &Arc<dyn FilterExpr> {
        &self.expr
    }

    pub(crate) fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub(crate) fn probe_inputs(&self) -> &[Projection] {
        &self.probe_inputs
    }

    pub(crate) fn build_inputs(&self) -> &[Projection] {
        &self.build_inputs
    }

    /// Builds the filter input chunk for the current pair list.
    pub(crate) fn fill(
        &self,
        input: &Chunk,
        table: &dyn JoinTable,
        mapping: &[u32],
        rows: &[Option<BuildRowId>],
    ) -> Result<Chunk, String> {
        let indices = UInt32Array::from(mapping.to_vec());
        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.schema.fields().len()];
        for projection in &self.probe_inputs {
            let column = input.column(projection.input_channel)?;
            let taken = take(column.as_ref(), &indices, None).map_err(|e| e.to_string())?;
            columns[projection.output_channel] = Some(taken);
        }
        for projection in &self.build_inputs {
            let extracted = table.extract_column(rows, projection.input_channel)?;
            columns[projection.output_channel] = Some(extracted);
        }
        let mut out = Vec::with_capacity(columns.len());
        for (channel, column) in columns.into_iter().enumerate() {
            out.push(column.ok_or_else(|| {
                format!(
                    "join filter input column {} was not assigned",
                    self.schema.field(channel).name()
                )
            })?);
        }
        let batch =
            RecordBatch::try_new(Arc::clone(&self.schema), out).map_err(|e| e.to_string())?;
        Ok(Chunk::new(batch))
    }

    /// Evaluates the predicate over `chunk`, expecting a boolean column of the
    /// chunk's length.
    pub(crate) fn eval_bool(&self, chunk: &Chunk) -> Result<BooleanArray, String> {
        let result = self.expr.evaluate(chunk)?;
        let mask = result
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| "join residual predicate must return boolean array".to_string())?;
        if mask.len() != chunk.len() {
            return Err(format!(
                "join residual predicate returned {} rows for {} input rows",
                mask.len(),
                chunk.len()
            ));
        }
        Ok(mask.clone())
    }

    /// Per pair row: true if any probe-side filter input is null. Used for
    /// null-propagating filters in the null-aware anti path.
    pub(crate) fn probe_input_null_rows(&self, chunk: &Chunk) -> Result<Vec<bool>, String> {
        let mut nulls = vec![false; chunk.len()];
        for projection in &self.probe_inputs {
            let column = chunk.column(projection.output_channel)?;
            if column.null_count() == 0 {
                continue;
            }
            for (row, is_null) in nulls.iter_mut().enumerate() {
                if column.is_null(row) {
                    *is_null = true;
                }
            }
        }
        Ok(nulls)
    }
}

/// Tracks filter outcomes per probe row: when every pair of a row fails, the
/// row is flushed once as a synthetic miss on the next row change (or at
/// `finish`).
#[derive(Debug, Default)]
pub(crate) struct NoMatchDetector {
    current: Option<usize>,
    has_match: bool,
}

impl NoMatchDetector {
    /// Feeds one `(row, passed)` pair; returns the previous row if it just
    /// completed without any passing pair.
    pub(crate) fn advance(&mut self, row: usize, passed: bool) -> Option<usize> {
        if self.current == Some(row) {
            self.has_match |= passed;
            return None;
        }
        let miss = match self.current {
            Some(prev) if !self.has_match => Some(prev),
            _ => None,
        };
        self.current = Some(row);
        self.has_match = passed;
        miss
    }

    /// Flushes the trailing row once the pair stream for this input ended.
    pub(crate) fn finish(&mut self) -> Option<usize> {
        let miss = match self.current.take() {
            Some(prev) if !self.has_match => Some(prev),
            _ => None,
        };
        self.has_match = false;
        miss
    }
}

/// Emits at most one output per probe row for left semi joins: the row is
/// flushed on the next passing row change (or at `finish`).
#[derive(Debug, Default)]
pub(crate) struct LeftSemiTracker {
    pending: Option<usize>,
}

impl LeftSemiTracker {
    /// Feeds one passing pair; returns the previously pending row when the
    /// probe row changed.
    pub(crate) fn advance(&mut self, row: usize) -> Option<usize> {
        if self.pending == Some(row) {
            return None;
        }
        self.pending.replace(row)
    }

    pub(crate) fn finish(&mut self) -> Option<usize> {
        self.pending.take()
    }
}

/// Residual filter for all join modes except null-aware anti.
#[derive(Debug)]
pub(crate) struct ResidualFilter {
    input: FilterInput,
    detector: NoMatchDetector,
    tracker: LeftSemiTracker,
}

impl ResidualFilter {
    pub(crate) fn new(input: FilterInput) -> Self {
        Self {
            input,
            detector: NoMatchDetector::default(),
            tracker: LeftSemiTracker::default(),
        }
    }

    /// Evaluates the predicate over the current pair list and compacts
    /// `mapping`/`rows` in place according to the join mode. Returns the
    /// number of surviving rows.
    pub(crate) fn eval(
        &mut self,
        join_type: JoinType,
        probe: &Chunk,
        table: &dyn JoinTable,
        at_end: bool,
        mapping: &mut Vec<u32>,
        rows: &mut Vec<Option<BuildRowId>>,
    ) -> Result<usize, String> {
        let num_rows = mapping.len();
        if num_rows == 0 {
            return Ok(0);
        }
        let chunk = self.input.fill(probe, table, mapping, rows)?;
        let result = self.input.eval_bool(&chunk)?;

        let mut num_passed = 0usize;
        match join_type {
            JoinType::LeftOuter | JoinType::FullOuter => {
                for i in 0..num_rows {
                    let probe_row = mapping[i];
                    let build_row = rows[i];
                    let passed = result.is_valid(i) && result.value(i);
                    if let Some(miss) = self.detector.advance(probe_row as usize, passed) {
                        mapping[num_passed] = miss as u32;
                        rows[num_passed] = None;
                        num_passed += 1;
                    }
                    if passed {
                        mapping[num_passed] = probe_row;
                        rows[num_passed] = build_row;
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
            }
            JoinType::LeftSemi => {
                for i in 0..num_rows {
                    if result.is_valid(i) && result.value(i) {
                        if let Some(row) = self.tracker.advance(mapping[i] as usize) {
                            mapping[num_passed] = row as u32;
                            rows[num_passed] = None;
                            num_passed += 1;
                        }
                    }
                }
                if at_end {
                    if let Some(row) = self.tracker.finish() {
                        mapping[num_passed] = row as u32;
                        rows[num_passed] = None;
                        num_passed += 1;
                    }
                }
            }
            JoinType::Inner | JoinType::RightOuter | JoinType::RightSemi => {
                for i in 0..num_rows {
                    if result.is_valid(i) && result.value(i) {
                        mapping[num_passed] = mapping[i];
                        rows[num_passed] = rows[i];
                        num_passed += 1;
                    }
                }
            }
            JoinType::NullAwareLeftAnti => {
                return Err("null-aware anti residual filter must use the anti path".to_string());
            }
        }
        mapping.truncate(num_passed);
        rows.truncate(num_passed);
        Ok(num_passed)
    }
}
