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
//! Probe lookup scratch and join-result iteration.
//!
//! Responsibilities:
//! - Holds per-batch lookup state: probed row indices, hashes or value ids,
//!   and per-row build chain heads. Buffers are reused across batches.
//! - Walks the cartesian pairing of probe rows against duplicate-key build
//!   chains in bounded steps.
//!
//! Key exported interfaces:
//! - Types: `HashLookup`, `JoinResultCursor`.

use super::join_table::{BuildRowId, JoinTable};

/// Mutable scratch for one probe batch.
///
/// `rows` lists the input rows to probe in ascending order; `hashes` is the
/// parallel hash (or value-id) array indexed by input row; `hits[row]` holds
/// the head of the matching build chain once `JoinTable::probe` ran. For the
/// outer/anti family `hits` spans the whole input; otherwise it spans
/// `rows.last() + 1` entries.
#[derive(Debug, Default)]
pub struct HashLookup {
    pub rows: Vec<usize>,
    pub hashes: Vec<u64>,
    pub hits: Vec<Option<BuildRowId>>,
}

impl HashLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the buffers without releasing capacity.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.hashes.clear();
        self.hits.clear();
    }
}

/// Iterator over `(probe_row, build_row)` pairs for the current input batch.
///
/// Each `list_results` call appends up to `cap` pairs, resuming duplicate
/// chains across calls. Pairs come out in ascending
/// `(probe_row, chain_position)` order.
#[derive(Debug, Default)]
pub struct JoinResultCursor {
    row_index: usize,
    num_rows: usize,
    chain: Option<BuildRowId>,
    row_started: bool,
}

impl JoinResultCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, lookup: &HashLookup) {
        self.row_index = 0;
        self.num_rows = lookup.rows.len();
        self.chain = None;
        self.row_started = false;
    }

    pub fn at_end(&self) -> bool {
        self.row_index >= self.num_rows
    }

    /// Fills `mapping`/`out_rows` with up to `cap` pairs. With
    /// `include_misses`, input rows whose hit slot is empty produce one
    /// `(row, None)` pair; otherwise they are skipped.
    pub fn list_results(
        &mut self,
        table: &dyn JoinTable,
        lookup: &HashLookup,
        include_misses: bool,
        cap: usize,
        mapping: &mut Vec<u32>,
        out_rows: &mut Vec<Option<BuildRowId>>,
    ) -> Result<usize, String> {
        mapping.clear();
        out_rows.clear();
        let mut num_out = 0usize;

        while num_out < cap && self.row_index < self.num_rows {
            let probe_row = lookup.rows[self.row_index];
            if !self.row_started {
                self.row_started = true;
                self.chain = lookup
                    .hits
                    .get(probe_row)
                    .copied()
                    .ok_or_else(|| format!("lookup hits missing entry for row {}", probe_row))?;
                if self.chain.is_none() {
                    if include_misses {
                        mapping.push(probe_row as u32);
                        out_rows.push(None);
                        num_out += 1;
                    }
                    self.advance_row();
                    continue;
                }
            }
            while num_out < cap {
                let Some(hit) = self.chain else {
                    break;
                };
                mapping.push(probe_row as u32);
                out_rows.push(Some(hit));
                num_out += 1;
                self.chain = table.next_duplicate(hit);
            }
            if self.chain.is_none() {
                self.advance_row();
            }
        }
        Ok(num_out)
    }

    fn advance_row(&mut self) {
        self.row_index += 1;
        self.row_started = false;
        self.chain = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::operators::hashjoin::join_table::{
        BuildRowId, HashMode, JoinTable,
    };
    use crate::exec::selectivity::SelectivityVector;
    use arrow::array::ArrayRef;
    use arrow::datatypes::{Schema, SchemaRef};
    use std::sync::Arc;

    /// Table stub exposing only duplicate chains.
    #[derive(Debug)]
    struct ChainTable {
        next: Vec<Option<BuildRowId>>,
    }

    impl JoinTable for ChainTable {
        fn schema(&self) -> SchemaRef {
            Arc::new(Schema::empty())
        }

        fn num_rows(&self) -> usize {
            self.next.len()
        }

        fn num_distinct(&self) -> usize {
            self.next.len()
        }

        fn has_duplicate_keys(&self) -> bool {
            true
        }

        fn hash_mode(&self) -> HashMode {
            HashMode::Hash
        }

        fn hash_seed(&self) -> u64 {
            0
        }

        fn key_count(&self) -> usize {
            1
        }

        fn probe(&self, _lookup: &mut HashLookup) -> Result<(), String> {
            Err("unused".to_string())
        }

        fn next_duplicate(&self, row: BuildRowId) -> Option<BuildRowId> {
            self.next[row.0 as usize]
        }

        fn extract_column(
            &self,
            _rows: &[Option<BuildRowId>],
            _channel: usize,
        ) -> Result<ArrayRef, String> {
            Err("unused".to_string())
        }

        fn lookup_value_ids(
            &self,
            _key_index: usize,
            _keys: &ArrayRef,
            _active: &mut SelectivityVector,
            _ids: &mut [u64],
        ) -> Result<(), String> {
            Err("unused".to_string())
        }

        fn key_filter(
            &self,
            _key_index: usize,
        ) -> Option<crate::exec::operators::hashjoin::dynamic_filter::JoinDynamicFilter> {
            None
        }

        fn row_has_null_key(&self, _row: BuildRowId) -> Result<bool, String> {
            Ok(false)
        }

        fn is_probed(&self, _row: BuildRowId) -> bool {
            false
        }

        fn set_probed(&self, _rows: &[Option<BuildRowId>]) {}
    }

    fn lookup_with(rows: Vec<usize>, hits: Vec<Option<BuildRowId>>) -> HashLookup {
        HashLookup {
            rows,
            hashes: Vec::new(),
            hits,
        }
    }

    #[test]
    fn walks_duplicate_chains_in_order() {
        // Row 0 matches chain 0 -> 1, row 1 has no match, row 2 matches row 2.
        let table = ChainTable {
            next: vec![Some(BuildRowId(1)), None, None],
        };
        let lookup = lookup_with(
            vec![0, 1, 2],
            vec![Some(BuildRowId(0)), None, Some(BuildRowId(2))],
        );
        let mut cursor = JoinResultCursor::new();
        cursor.reset(&lookup);

        let mut mapping = Vec::new();
        let mut out_rows = Vec::new();
        let n = cursor
            .list_results(&table, &lookup, false, 16, &mut mapping, &mut out_rows)
            .expect("list results");
        assert_eq!(n, 3);
        assert_eq!(mapping, vec![0, 0, 2]);
        assert_eq!(
            out_rows,
            vec![
                Some(BuildRowId(0)),
                Some(BuildRowId(1)),
                Some(BuildRowId(2))
            ]
        );
        assert!(cursor.at_end());
    }

    #[test]
    fn include_misses_emits_null_pairs() {
        let table = ChainTable {
            next: vec![None],
        };
        let lookup = lookup_with(vec![0, 1], vec![Some(BuildRowId(0)), None]);
        let mut cursor = JoinResultCursor::new();
        cursor.reset(&lookup);

        let mut mapping = Vec::new();
        let mut out_rows = Vec::new();
        let n = cursor
            .list_results(&table, &lookup, true, 16, &mut mapping, &mut out_rows)
            .expect("list results");
        assert_eq!(n, 2);
        assert_eq!(mapping, vec![0, 1]);
        assert_eq!(out_rows, vec![Some(BuildRowId(0)), None]);
    }

    #[test]
    fn cap_splits_chains_across_calls() {
        let table = ChainTable {
            next: vec![Some(BuildRowId(1)), Some(BuildRowId(2)), None],
        };
        let lookup = lookup_with(vec![0], vec![Some(BuildRowId(0))]);
        let mut cursor = JoinResultCursor::new();
        cursor.reset(&lookup);

        let mut mapping = Vec::new();
        let mut out_rows = Vec::new();
        let n = cursor
            .list_results(&table, &lookup, false, 2, &mut mapping, &mut out_rows)
            .expect("list results");
        assert_eq!(n, 2);
        assert!(!cursor.at_end());

        let n = cursor
            .list_results(&table, &lookup, false, 2, &mut mapping, &mut out_rows)
            .expect("list results");
        assert_eq!(n, 1);
        assert_eq!(out_rows, vec![Some(BuildRowId(2))]);
        assert!(cursor.at_end());

        let n = cursor
            .list_results(&table, &lookup, false, 2, &mut mapping, &mut out_rows)
            .expect("list results");
        assert_eq!(n, 0);
    }
}
