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
//! Join output batch construction.
//!
//! Responsibilities:
//! - Resolves the output schema into identity (probe-side) and table
//!   (build-side) projections; every output column is assigned by exactly one
//!   of the two sets.
//! - Gathers probe columns through the row-number mapping and extracts build
//!   columns from matched rows; fills probe columns with nulls for the
//!   unmatched-build drain phase.
//!
//! Key exported interfaces:
//! - Types: `Projection`, `OutputAssembler`.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array, new_null_array};
use arrow::compute::take;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;

use super::join_table::{BuildRowId, JoinTable};
use crate::exec::chunk::Chunk;

/// Maps one input channel to one output channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Projection {
    pub input_channel: usize,
    pub output_channel: usize,
}

/// Builds join output batches from the surviving row-number mapping and
/// build-row list of one emission step.
#[derive(Debug)]
pub(crate) struct OutputAssembler {
    output_schema: SchemaRef,
    identity_projections: Vec<Projection>,
    table_projections: Vec<Projection>,
    is_identity_projection: bool,
}

impl OutputAssembler {
    /// Resolves output columns by name, probe side first, then the build
    /// table. An unresolvable column is a configuration error.
    pub(crate) fn try_new(
        probe_schema: &SchemaRef,
        table_schema: &SchemaRef,
        output_schema: SchemaRef,
    ) -> Result<Self, String> {
        let mut identity_projections = Vec::new();
        let mut table_projections = Vec::new();
        for (out_channel, field) in output_schema.fields().iter().enumerate() {
            if let Some((probe_channel, _)) = probe_schema.column_with_name(field.name()) {
                identity_projections.push(Projection {
                    input_channel: probe_channel,
                    output_channel: out_channel,
                });
            } else if let Some((table_channel, _)) = table_schema.column_with_name(field.name()) {
                table_projections.push(Projection {
                    input_channel: table_channel,
                    output_channel: out_channel,
                });
            } else {
                return Err(format!(
                    "join output column {} not found on probe or build side",
                    field.name()
                ));
            }
        }
        let is_identity_projection = table_projections.is_empty()
            && identity_projections.len() == probe_schema.fields().len()
            && identity_projections
                .iter()
                .all(|p| p.input_channel == p.output_channel);
        Ok(Self {
            output_schema,
            identity_projections,
            table_projections,
            is_identity_projection,
        })
    }

    pub(crate) fn output_schema(&self) -> &SchemaRef {
        &self.output_schema
    }

    pub(crate) fn has_table_projections(&self) -> bool {
        !self.table_projections.is_empty()
    }

    #[allow(dead_code)]
    pub(crate) fn is_identity_projection(&self) -> bool {
        self.is_identity_projection
    }

    /// Assembles one output batch: probe columns gathered through `mapping`,
    /// build columns extracted from `rows` (`None` entries become nulls).
    pub(crate) fn assemble(
        &self,
        input: &Chunk,
        table: &dyn JoinTable,
        mapping: &[u32],
        rows: &[Option<BuildRowId>],
    ) -> Result<Chunk, String> {
        let num_rows = mapping.len();
        let indices = UInt32Array::from(mapping.to_vec());
        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.output_schema.fields().len()];
        for projection in &self.identity_projections {
            let column = input.column(projection.input_channel)?;
            let taken = take(column.as_ref(), &indices, None).map_err(|e| e.to_string())?;
            columns[projection.output_channel] = Some(taken);
        }
        for projection in &self.table_projections {
            let extracted = table.extract_column(rows, projection.input_channel)?;
            if extracted.len() != num_rows {
                return Err(format!(
                    "build column extraction returned {} rows, expected {}",
                    extracted.len(),
                    num_rows
                ));
            }
            columns[projection.output_channel] = Some(extracted);
        }
        self.finish(columns)
    }

    /// Assembles one unmatched-build batch: probe columns are typed nulls.
    pub(crate) fn assemble_build_only(
        &self,
        table: &dyn JoinTable,
        rows: &[BuildRowId],
    ) -> Result<Chunk, String> {
        let num_rows = rows.len();
        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.output_schema.fields().len()];
        for projection in &self.identity_projections {
            let data_type = self
                .output_schema
                .field(projection.output_channel)
                .data_type();
            columns[projection.output_channel] = Some(new_null_array(data_type, num_rows));
        }
        let hit_rows: Vec<Option<BuildRowId>> = rows.iter().map(|row| Some(*row)).collect();
        for projection in &self.table_projections {
            let extracted = table.extract_column(&hit_rows, projection.input_channel)?;
            columns[projection.output_channel] = Some(extracted);
        }
        self.finish(columns)
    }

    /// Forwards `input` untouched through the identity projections; used when
    /// the join was replaced by a pushed-down dynamic filter.
    pub(crate) fn passthrough(&self, input: &Chunk) -> Result<Chunk, String> {
        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.output_schema.fields().len()];
        for projection in &self.identity_projections {
            columns[projection.output_channel] = Some(Arc::clone(input.column(projection.input_channel)?));
        }
        self.finish(columns)
    }

    fn finish(&self, columns: Vec<Option<ArrayRef>>) -> Result<Chunk, String> {
        let mut out = Vec::with_capacity(columns.len());
        for (channel, column) in columns.into_iter().enumerate() {
            out.push(column.ok_or_else(|| {
                format!(
                    "join output column {} was not assigned by any projection",
                    self.output_schema.field(channel).name()
                )
            })?);
        }
        let batch =
            RecordBatch::try_new(Arc::clone(&self.output_schema), out).map_err(|e| e.to_string())?;
        Ok(Chunk::new(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field, Schema};

    fn schema(names: &[&str]) -> SchemaRef {
        Arc::new(Schema::new(
            names
                .iter()
                .map(|n| Field::new(*n, DataType::Int32, true))
                .collect::<Vec<_>>(),
        ))
    }

    #[test]
    fn splits_projections_by_side() {
        let probe = schema(&["p0", "p1"]);
        let table = schema(&["b0", "b1"]);
        let out = schema(&["p1", "b0"]);
        let assembler = OutputAssembler::try_new(&probe, &table, out).expect("assembler");
        assert!(assembler.has_table_projections());
        assert!(!assembler.is_identity_projection());
    }

    #[test]
    fn detects_identity_projection() {
        let probe = schema(&["p0", "p1"]);
        let table = schema(&["b0"]);
        let out = schema(&["p0", "p1"]);
        let assembler = OutputAssembler::try_new(&probe, &table, out).expect("assembler");
        assert!(assembler.is_identity_projection());
    }

    #[test]
    fn unknown_output_column_is_a_config_error() {
        let probe = schema(&["p0"]);
        let table = schema(&["b0"]);
        let out = schema(&["nope"]);
        let err = OutputAssembler::try_new(&probe, &table, out).expect_err("expected error");
        assert!(err.contains("not found"), "err={}", err);
    }
}
