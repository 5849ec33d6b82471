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
//! Shared fixtures for hash-join probe integration tests: an in-memory build
//! table behind the `JoinTable` trait, small comparison filter expressions,
//! and a driver loop exercising the operator contract.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Int32Array, Int64Array, StringArray, UInt32Array,
    new_null_array,
};
use arrow::compute::take;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use hashbrown::HashMap;

use kestrel::exec::chunk::Chunk;
use kestrel::exec::expr::FilterExpr;
use kestrel::exec::operators::hashjoin::dynamic_filter::JoinDynamicFilter;
use kestrel::exec::operators::hashjoin::key_encoder::{combine_hash, hash_key_columns};
use kestrel::exec::operators::hashjoin::{
    BuildRowId, HashLookup, HashMode, JoinTable,
};
use kestrel::exec::pipeline::operator::{BlockedReason, Operator};
use kestrel::exec::selectivity::SelectivityVector;

pub const FIXTURE_HASH_SEED: u64 = 17;

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
enum ValueKey {
    Int32(i32),
    Int64(i64),
    Utf8(String),
}

fn value_key(column: &ArrayRef, row: usize) -> Result<Option<ValueKey>, String> {
    if column.is_null(row) {
        return Ok(None);
    }
    match column.data_type() {
        DataType::Int32 => {
            let arr = column
                .as_any()
                .downcast_ref::<Int32Array>()
                .ok_or_else(|| "expected Int32 key".to_string())?;
            Ok(Some(ValueKey::Int32(arr.value(row))))
        }
        DataType::Int64 => {
            let arr = column
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| "expected Int64 key".to_string())?;
            Ok(Some(ValueKey::Int64(arr.value(row))))
        }
        DataType::Utf8 => {
            let arr = column
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| "expected Utf8 key".to_string())?;
            Ok(Some(ValueKey::Utf8(arr.value(row).to_string())))
        }
        other => Err(format!("fixture value-id key type not supported: {other}")),
    }
}

/// In-memory build table: duplicate chains in build order, atomic probed
/// flags, optional value-id dictionaries.
#[derive(Debug)]
pub struct FixtureJoinTable {
    schema: SchemaRef,
    columns: Vec<ArrayRef>,
    key_count: usize,
    hash_mode: HashMode,
    heads: HashMap<u64, BuildRowId>,
    next: Vec<Option<BuildRowId>>,
    null_key_rows: Vec<bool>,
    num_distinct: usize,
    has_duplicates: bool,
    value_dicts: Vec<HashMap<ValueKey, u64>>,
    probed: Vec<AtomicU64>,
}

impl FixtureJoinTable {
    /// Builds the table from table-order columns (keys first).
    pub fn build(
        schema: SchemaRef,
        columns: Vec<ArrayRef>,
        key_count: usize,
        hash_mode: HashMode,
    ) -> Result<Arc<Self>, String> {
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);

        let mut null_key_rows = vec![false; num_rows];
        for column in columns.iter().take(key_count) {
            for (row, is_null) in null_key_rows.iter_mut().enumerate() {
                if column.is_null(row) {
                    *is_null = true;
                }
            }
        }

        let mut value_dicts: Vec<HashMap<ValueKey, u64>> = Vec::new();
        let row_keys = match hash_mode {
            HashMode::Hash => {
                hash_key_columns(&columns[0..key_count], num_rows, FIXTURE_HASH_SEED)?
            }
            HashMode::ValueId => {
                value_dicts = vec![HashMap::new(); key_count];
                let mut ids = vec![0u64; num_rows];
                for (key_index, column) in columns.iter().take(key_count).enumerate() {
                    for row in 0..num_rows {
                        if null_key_rows[row] {
                            continue;
                        }
                        let key = value_key(column, row)?
                            .ok_or_else(|| "null key row not deselected".to_string())?;
                        let dict = &mut value_dicts[key_index];
                        let next_id = dict.len() as u64 + 1;
                        let id = *dict.entry(key).or_insert(next_id);
                        ids[row] = if key_index == 0 {
                            id
                        } else {
                            combine_hash(ids[row], id)
                        };
                    }
                }
                ids
            }
        };

        let mut heads = HashMap::new();
        let mut tails: HashMap<u64, usize> = HashMap::new();
        let mut next = vec![None; num_rows];
        let mut num_distinct = 0usize;
        let mut has_duplicates = false;
        for row in 0..num_rows {
            if null_key_rows[row] {
                continue;
            }
            let key = row_keys[row];
            if let Some(tail) = tails.get_mut(&key) {
                next[*tail] = Some(BuildRowId(row as u64));
                *tail = row;
                has_duplicates = true;
            } else {
                heads.insert(key, BuildRowId(row as u64));
                tails.insert(key, row);
                num_distinct += 1;
            }
        }

        let num_words = num_rows.div_ceil(64);
        let probed = (0..num_words).map(|_| AtomicU64::new(0)).collect();
        Ok(Arc::new(Self {
            schema,
            columns,
            key_count,
            hash_mode,
            heads,
            next,
            null_key_rows,
            num_distinct,
            has_duplicates,
            value_dicts,
            probed,
        }))
    }

    pub fn has_null_key_rows(&self) -> bool {
        self.null_key_rows.iter().any(|v| *v)
    }
}

impl JoinTable for FixtureJoinTable {
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn num_rows(&self) -> usize {
        self.next.len()
    }

    fn num_distinct(&self) -> usize {
        self.num_distinct
    }

    fn has_duplicate_keys(&self) -> bool {
        self.has_duplicates
    }

    fn hash_mode(&self) -> HashMode {
        self.hash_mode
    }

    fn hash_seed(&self) -> u64 {
        FIXTURE_HASH_SEED
    }

    fn key_count(&self) -> usize {
        self.key_count
    }

    fn probe(&self, lookup: &mut HashLookup) -> Result<(), String> {
        for &row in &lookup.rows {
            let hash = *lookup
                .hashes
                .get(row)
                .ok_or_else(|| format!("lookup hashes missing entry for row {row}"))?;
            let hit = self.heads.get(&hash).copied();
            let slot = lookup
                .hits
                .get_mut(row)
                .ok_or_else(|| format!("lookup hits missing entry for row {row}"))?;
            *slot = hit;
        }
        Ok(())
    }

    fn next_duplicate(&self, row: BuildRowId) -> Option<BuildRowId> {
        self.next.get(row.0 as usize).copied().flatten()
    }

    fn extract_column(
        &self,
        rows: &[Option<BuildRowId>],
        channel: usize,
    ) -> Result<ArrayRef, String> {
        let column = self
            .columns
            .get(channel)
            .ok_or_else(|| format!("build column {channel} out of bounds"))?;
        if column.is_empty() {
            return Ok(new_null_array(column.data_type(), rows.len()));
        }
        let indices: UInt32Array = rows
            .iter()
            .map(|row| row.map(|r| r.0 as u32))
            .collect::<Vec<_>>()
            .into();
        take(column.as_ref(), &indices, None).map_err(|e| e.to_string())
    }

    fn lookup_value_ids(
        &self,
        key_index: usize,
        keys: &ArrayRef,
        active: &mut SelectivityVector,
        ids: &mut [u64],
    ) -> Result<(), String> {
        let dict = self
            .value_dicts
            .get(key_index)
            .ok_or_else(|| format!("value dict {key_index} missing"))?;
        let mut deselect = Vec::new();
        let mut error = None;
        active.for_each_selected(|row| {
            if error.is_some() {
                return;
            }
            match value_key(keys, row) {
                Ok(Some(key)) => match dict.get(&key) {
                    Some(id) => {
                        ids[row] = if key_index == 0 {
                            *id
                        } else {
                            combine_hash(ids[row], *id)
                        };
                    }
                    None => deselect.push(row),
                },
                Ok(None) => deselect.push(row),
                Err(e) => error = Some(e),
            }
        });
        if let Some(e) = error {
            return Err(e);
        }
        for row in deselect {
            active.set_valid(row, false);
        }
        Ok(())
    }

    fn key_filter(&self, key_index: usize) -> Option<JoinDynamicFilter> {
        let column = self.columns.get(key_index)?;
        JoinDynamicFilter::from_key_values(column).ok().flatten()
    }

    fn row_has_null_key(&self, row: BuildRowId) -> Result<bool, String> {
        self.null_key_rows
            .get(row.0 as usize)
            .copied()
            .ok_or_else(|| format!("build row {} out of bounds", row.0))
    }

    fn is_probed(&self, row: BuildRowId) -> bool {
        let word = (row.0 / 64) as usize;
        let bit = row.0 % 64;
        self.probed[word].load(Ordering::Relaxed) & (1 << bit) != 0
    }

    fn set_probed(&self, rows: &[Option<BuildRowId>]) {
        for row in rows.iter().flatten() {
            let word = (row.0 / 64) as usize;
            let bit = row.0 % 64;
            self.probed[word].fetch_or(1 << bit, Ordering::Relaxed);
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub enum CompareOp {
    Lt,
    Gt,
}

/// `left < right` / `left > right` over two Int32 filter-input columns,
/// propagating nulls.
#[derive(Debug)]
pub struct ColumnCompareExpr {
    fields: Vec<String>,
    op: CompareOp,
}

impl ColumnCompareExpr {
    pub fn lt(left: &str, right: &str) -> Arc<dyn FilterExpr> {
        Arc::new(Self {
            fields: vec![left.to_string(), right.to_string()],
            op: CompareOp::Lt,
        })
    }

    pub fn gt(left: &str, right: &str) -> Arc<dyn FilterExpr> {
        Arc::new(Self {
            fields: vec![left.to_string(), right.to_string()],
            op: CompareOp::Gt,
        })
    }
}

impl FilterExpr for ColumnCompareExpr {
    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn propagates_nulls(&self) -> bool {
        true
    }

    fn evaluate(&self, input: &Chunk) -> Result<ArrayRef, String> {
        let left = input
            .column(0)?
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| "compare filter expects Int32 columns".to_string())?;
        let right = input
            .column(1)?
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| "compare filter expects Int32 columns".to_string())?;
        let mut values = Vec::with_capacity(input.len());
        for row in 0..input.len() {
            if left.is_null(row) || right.is_null(row) {
                values.push(None);
            } else {
                let pass = match self.op {
                    CompareOp::Lt => left.value(row) < right.value(row),
                    CompareOp::Gt => left.value(row) > right.value(row),
                };
                values.push(Some(pass));
            }
        }
        Ok(Arc::new(BooleanArray::from(values)))
    }
}

pub fn int32_field(name: &str) -> Field {
    Field::new(name, DataType::Int32, true)
}

pub fn utf8_field(name: &str) -> Field {
    Field::new(name, DataType::Utf8, true)
}

pub fn schema_of(fields: Vec<Field>) -> SchemaRef {
    Arc::new(Schema::new(fields))
}

pub fn int32_array(values: Vec<Option<i32>>) -> ArrayRef {
    Arc::new(Int32Array::from(values))
}

pub fn utf8_array(values: Vec<Option<&str>>) -> ArrayRef {
    Arc::new(StringArray::from(values))
}

pub fn chunk_of(schema: &SchemaRef, columns: Vec<ArrayRef>) -> Chunk {
    Chunk::new(RecordBatch::try_new(Arc::clone(schema), columns).expect("record batch"))
}

/// Renders one cell for multiset comparisons.
fn cell_to_string(column: &ArrayRef, row: usize) -> String {
    if column.is_null(row) {
        return "null".to_string();
    }
    match column.data_type() {
        DataType::Int32 => column
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| a.value(row).to_string())
            .unwrap_or_default(),
        DataType::Int64 => column
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row).to_string())
            .unwrap_or_default(),
        DataType::Utf8 => column
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| a.value(row).to_string())
            .unwrap_or_default(),
        other => format!("<{other}>"),
    }
}

/// Flattens output batches into printable rows, preserving emission order.
pub fn collect_rows(batches: &[RecordBatch]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            rows.push(
                batch
                    .columns()
                    .iter()
                    .map(|c| cell_to_string(c, row))
                    .collect(),
            );
        }
    }
    rows
}

pub fn sorted_rows(batches: &[RecordBatch]) -> Vec<Vec<String>> {
    let mut rows = collect_rows(batches);
    rows.sort();
    rows
}

/// Drives one operator through the scheduler contract until it finishes.
pub fn drive(op: &mut dyn Operator, inputs: Vec<Chunk>) -> Result<Vec<RecordBatch>, String> {
    let mut outputs = Vec::new();
    match op.is_blocked()? {
        BlockedReason::NotBlocked => {}
        BlockedReason::WaitForJoinBuild(dep) => {
            return Err(format!("operator blocked on {}", dep.name()));
        }
    }

    let mut pending = inputs.into_iter();
    let mut next = pending.next();
    let mut signaled_end = false;
    for _ in 0..100_000 {
        if op.is_finished() {
            op.close()?;
            return Ok(outputs);
        }
        if op.needs_input() {
            match next.take() {
                Some(chunk) => {
                    op.add_input(chunk)?;
                    next = pending.next();
                }
                None => {
                    if !signaled_end {
                        op.no_more_input()?;
                        signaled_end = true;
                    }
                }
            }
            continue;
        }
        match op.get_output()? {
            Some(out) => outputs.push(out.batch),
            None => {
                if op.is_finished() {
                    op.close()?;
                    return Ok(outputs);
                }
                if !op.needs_input() && next.is_none() && !signaled_end {
                    op.no_more_input()?;
                    signaled_end = true;
                }
            }
        }
    }
    Err("driver loop did not converge".to_string())
}
