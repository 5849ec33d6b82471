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
//! Hash-join probe operator.
//!
//! Responsibilities:
//! - Runs the probe-side state machine: wait for the build table, probe input
//!   batches against it, evaluate the residual filter, assemble output, and
//!   for the right family drain unmatched build rows after the last probe
//!   driver finishes.
//! - Publishes dynamic filters to upstream scans when the build is small and
//!   value-id encoded, and passes batches through once the join has been
//!   replaced by the pushed-down filter.
//!
//! Key exported interfaces:
//! - Types: `HashJoinProbe`.

use std::sync::Arc;

use super::dynamic_filter::DynamicFilterConsumer;
use super::join_bridge::{HashJoinBridge, ProbeBarrier};
use super::join_table::{BuildRowId, BuildRowIter, JoinTable};
use super::key_encoder::ProbeKeyEncoder;
use super::lookup::{HashLookup, JoinResultCursor};
use super::null_aware_anti::NullAwareAntiFilter;
use super::output_assembler::OutputAssembler;
use super::residual_filter::{FilterInput, ResidualFilter};
use crate::common::config;
use crate::exec::chunk::Chunk;
use crate::exec::node::join::{join_type_str, make_table_schema, HashJoinNode, JoinType};
use crate::exec::pipeline::operator::{BlockedReason, Operator};
use crate::exec::selectivity::SelectivityVector;
use crate::kestrel_logging::debug;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ProbeState {
    Initial,
    WaitForBuild,
    Running,
    DrainUnmatchedBuild,
    Finished,
}

#[derive(Debug)]
enum JoinFilter {
    Standard(ResidualFilter),
    NullAware(NullAwareAntiFilter),
}

#[derive(Debug, Default)]
struct ProbeStats {
    input_chunks: u64,
    input_rows: u64,
    output_rows: u64,
    lookup_hit_rows: u64,
    lookup_miss_rows: u64,
    replaced_with_dynamic_filter_rows: u64,
}

/// Probe side of one hash join, one instance per pipeline driver.
///
/// All scratch (key hashes, hits, row mapping, drain iterator) is owned by
/// this driver and reused across batches; the hash table behind `bridge` is
/// shared read-only, except for the atomic probed flags.
pub struct HashJoinProbe {
    name: String,
    node_id: i32,
    driver_id: i32,
    join_type: JoinType,
    output_batch_size: usize,
    state: ProbeState,
    bridge: Arc<HashJoinBridge>,
    barrier: Option<Arc<ProbeBarrier>>,
    dynamic_filters: Option<Arc<dyn DynamicFilterConsumer>>,
    table: Option<Arc<dyn JoinTable>>,
    encoder: ProbeKeyEncoder,
    lookup: HashLookup,
    cursor: JoinResultCursor,
    non_null_rows: SelectivityVector,
    active_rows: SelectivityVector,
    assembler: OutputAssembler,
    filter: Option<JoinFilter>,
    input: Option<Chunk>,
    no_more_input: bool,
    last_probe: bool,
    drain_iter: BuildRowIter,
    drain_rows: Vec<BuildRowId>,
    mapping: Vec<u32>,
    out_rows: Vec<Option<BuildRowId>>,
    can_replace_with_dynamic_filter: bool,
    replaced_with_dynamic_filter: bool,
    stats: ProbeStats,
    stats_logged: bool,
}

impl HashJoinProbe {
    pub fn new(
        node: &HashJoinNode,
        driver_id: i32,
        bridge: Arc<HashJoinBridge>,
        barrier: Option<Arc<ProbeBarrier>>,
        dynamic_filters: Option<Arc<dyn DynamicFilterConsumer>>,
    ) -> Result<Self, String> {
        if node.probe_key_channels.is_empty() {
            return Err("hash join probe requires at least one key".to_string());
        }
        if node.probe_key_channels.len() != node.build_key_channels.len() {
            return Err("hash join probe/build key counts differ".to_string());
        }
        let table_schema = make_table_schema(&node.build_schema, &node.build_key_channels)?;
        let assembler = OutputAssembler::try_new(
            &node.probe_schema,
            &table_schema,
            Arc::clone(&node.output_schema),
        )?;
        let filter = match node.filter.as_ref() {
            None => None,
            Some(expr) => {
                let input =
                    FilterInput::try_new(Arc::clone(expr), &node.probe_schema, &table_schema)?;
                Some(match node.join_type {
                    JoinType::NullAwareLeftAnti => {
                        JoinFilter::NullAware(NullAwareAntiFilter::new(input))
                    }
                    _ => JoinFilter::Standard(ResidualFilter::new(input)),
                })
            }
        };
        Ok(Self {
            name: format!("HASH_JOIN_PROBE (id={})", node.node_id),
            node_id: node.node_id,
            driver_id,
            join_type: node.join_type,
            output_batch_size: config::preferred_output_batch_size(),
            state: ProbeState::Initial,
            bridge,
            barrier,
            dynamic_filters,
            table: None,
            encoder: ProbeKeyEncoder::new(node.probe_key_channels.clone()),
            lookup: HashLookup::new(),
            cursor: JoinResultCursor::new(),
            non_null_rows: SelectivityVector::default(),
            active_rows: SelectivityVector::default(),
            assembler,
            filter,
            input: None,
            no_more_input: false,
            last_probe: false,
            drain_iter: BuildRowIter::default(),
            drain_rows: Vec::new(),
            mapping: Vec::new(),
            out_rows: Vec::new(),
            can_replace_with_dynamic_filter: false,
            replaced_with_dynamic_filter: false,
            stats: ProbeStats::default(),
            stats_logged: false,
        })
    }

    pub fn replaced_with_dynamic_filter_rows(&self) -> u64 {
        self.stats.replaced_with_dynamic_filter_rows
    }

    pub fn output_rows(&self) -> u64 {
        self.stats.output_rows
    }

    fn acquire_table(&mut self) -> Result<BlockedReason, String> {
        let Some(result) = self.bridge.table_or_wait()? else {
            return Ok(BlockedReason::WaitForJoinBuild(self.bridge.dep()));
        };
        if result.anti_join_has_null_keys {
            if self.join_type != JoinType::NullAwareLeftAnti {
                return Err("build reported anti-join null keys for a non-anti join".to_string());
            }
            // A null key on the build side makes the anti join universally empty.
            self.finish();
            return Ok(BlockedReason::NotBlocked);
        }
        let table = result
            .table
            .ok_or_else(|| "join build result has no table".to_string())?;
        if table.num_distinct() == 0 && self.join_type.short_circuits_on_empty_build() {
            self.finish();
            return Ok(BlockedReason::NotBlocked);
        }
        self.maybe_publish_dynamic_filters(&table)?;
        self.table = Some(table);
        self.state = ProbeState::Running;
        Ok(BlockedReason::NotBlocked)
    }

    fn maybe_publish_dynamic_filters(&mut self, table: &Arc<dyn JoinTable>) -> Result<(), String> {
        if !self.join_type.supports_dynamic_filters() {
            return Ok(());
        }
        if table.hash_mode() == super::join_table::HashMode::Hash {
            return Ok(());
        }
        let Some(consumer) = self.dynamic_filters.as_ref() else {
            return Ok(());
        };
        let key_channels = self.encoder.key_channels().to_vec();
        let accepted = consumer.pushdown_channels(&key_channels);
        let mut published = 0usize;
        for (key_index, channel) in key_channels.iter().enumerate() {
            if !accepted.contains(channel) {
                continue;
            }
            if let Some(filter) = table.key_filter(key_index) {
                consumer.publish(*channel, filter)?;
                published += 1;
            }
        }
        // The join can be dropped entirely when the pushed filter is exact:
        // one unique key and nothing to project or filter on the build side.
        if published > 0
            && key_channels.len() == 1
            && !table.has_duplicate_keys()
            && !self.assembler.has_table_projections()
            && self.filter.is_none()
        {
            self.can_replace_with_dynamic_filter = true;
        }
        debug!(
            "HashJoinProbe dynamic filters: node_id={} driver_id={} published={} can_replace={}",
            self.node_id, self.driver_id, published, self.can_replace_with_dynamic_filter
        );
        Ok(())
    }

    fn encode_input(&mut self, chunk: &Chunk, table: &Arc<dyn JoinTable>) -> Result<bool, String> {
        self.encoder.encode(
            chunk,
            table.as_ref(),
            &mut self.non_null_rows,
            &mut self.active_rows,
            &mut self.lookup,
        )?;
        let input_size = chunk.len();
        if self.join_type.emits_probe_misses() {
            // Every input row needs a hits slot so misses can reach the output.
            self.lookup.hits.clear();
            self.lookup.hits.resize(input_size, None);
            if !self.lookup.rows.is_empty() {
                table.probe(&mut self.lookup)?;
            }
            self.count_lookup_stats();
            self.lookup.rows.clear();
            self.lookup.rows.extend(0..input_size);
        } else {
            if self.lookup.rows.is_empty() {
                // All keys null: nothing can match.
                return Ok(false);
            }
            let last = *self.lookup.rows.last().expect("rows not empty");
            self.lookup.hits.clear();
            self.lookup.hits.resize(last + 1, None);
            table.probe(&mut self.lookup)?;
            self.count_lookup_stats();
        }
        self.cursor.reset(&self.lookup);
        Ok(true)
    }

    fn count_lookup_stats(&mut self) {
        let mut hits = 0u64;
        let mut misses = 0u64;
        self.active_rows.for_each_selected(|row| {
            if self.lookup.hits[row].is_some() {
                hits += 1;
            } else {
                misses += 1;
            }
        });
        self.stats.lookup_hit_rows += hits;
        self.stats.lookup_miss_rows += misses;
    }

    fn running_output(&mut self) -> Result<Option<Chunk>, String> {
        let table = Arc::clone(
            self.table
                .as_ref()
                .ok_or_else(|| "probe table missing in running state".to_string())?,
        );
        let input = match self.input.as_ref() {
            Some(chunk) => chunk.clone(),
            None => return Ok(None),
        };
        let input_size = input.len();

        if self.replaced_with_dynamic_filter {
            self.stats.replaced_with_dynamic_filter_rows += input_size as u64;
            self.stats.output_rows += input_size as u64;
            let out = self.assembler.passthrough(&input)?;
            self.input = None;
            return Ok(Some(out));
        }

        let empty_build = table.num_distinct() == 0;
        let anti_without_filter =
            self.join_type == JoinType::NullAwareLeftAnti && self.filter.is_none();
        let single_shot = empty_build
            || (self.filter.is_none()
                && matches!(
                    self.join_type,
                    JoinType::LeftSemi | JoinType::NullAwareLeftAnti
                ));
        let output_batch_size = if single_shot {
            input_size
        } else {
            self.output_batch_size
        };

        loop {
            let mut num_out;
            if empty_build {
                // Valid only for modes that keep probe rows: emit every input
                // row once with a null build pair. The residual filter cannot
                // eliminate anything because no build row exists.
                self.mapping.clear();
                self.out_rows.clear();
                self.mapping.extend((0..input_size).map(|i| i as u32));
                self.out_rows.resize(input_size, None);
                num_out = input_size;
            } else if anti_without_filter {
                // Probe rows with non-null keys and no build match survive.
                self.mapping.clear();
                self.out_rows.clear();
                for row in 0..input_size {
                    if self.non_null_rows.is_valid(row)
                        && (!self.active_rows.is_valid(row) || self.lookup.hits[row].is_none())
                    {
                        self.mapping.push(row as u32);
                        self.out_rows.push(None);
                    }
                }
                num_out = self.mapping.len();
            } else if self.join_type == JoinType::LeftSemi && self.filter.is_none() {
                // One output per matching probe row, regardless of how many
                // duplicates the build chain holds.
                self.mapping.clear();
                self.out_rows.clear();
                for &row in &self.lookup.rows {
                    if let Some(hit) = self.lookup.hits[row] {
                        self.mapping.push(row as u32);
                        self.out_rows.push(Some(hit));
                    }
                }
                num_out = self.mapping.len();
            } else {
                num_out = self.cursor.list_results(
                    table.as_ref(),
                    &self.lookup,
                    self.join_type.emits_probe_misses(),
                    output_batch_size,
                    &mut self.mapping,
                    &mut self.out_rows,
                )?;
            }

            if num_out == 0 {
                self.input = None;
                return Ok(None);
            }

            if !empty_build {
                let at_end = anti_without_filter || self.cursor.at_end();
                num_out = match self.filter.as_mut() {
                    None => num_out,
                    Some(JoinFilter::Standard(filter)) => filter.eval(
                        self.join_type,
                        &input,
                        table.as_ref(),
                        at_end,
                        &mut self.mapping,
                        &mut self.out_rows,
                    )?,
                    Some(JoinFilter::NullAware(filter)) => filter.eval(
                        &input,
                        table.as_ref(),
                        &self.non_null_rows,
                        at_end,
                        &mut self.mapping,
                        &mut self.out_rows,
                    )?,
                };
            }

            if num_out == 0 {
                if single_shot {
                    self.input = None;
                    return Ok(None);
                }
                continue;
            }

            if self.join_type.is_right_family() {
                // A build row counts as probed only once the full join
                // predicate passed on it.
                table.set_probed(&self.out_rows[..num_out]);
            }

            if self.join_type == JoinType::RightSemi {
                // Output comes from the build side once all probing is done.
                if self.cursor.at_end() {
                    self.input = None;
                }
                return Ok(None);
            }

            let out = self.assembler.assemble(
                &input,
                table.as_ref(),
                &self.mapping[..num_out],
                &self.out_rows[..num_out],
            )?;
            self.stats.output_rows += num_out as u64;
            if single_shot {
                self.input = None;
            }
            return Ok(Some(out));
        }
    }

    fn drain_step(&mut self) -> Result<Option<Chunk>, String> {
        let table = Arc::clone(
            self.table
                .as_ref()
                .ok_or_else(|| "probe table missing in drain state".to_string())?,
        );
        self.drain_rows.clear();
        let num_out = if self.join_type == JoinType::RightSemi {
            table.list_probed_rows(&mut self.drain_iter, self.output_batch_size, &mut self.drain_rows)
        } else {
            table.list_not_probed_rows(
                &mut self.drain_iter,
                self.output_batch_size,
                &mut self.drain_rows,
            )
        };
        if num_out == 0 {
            self.finish();
            return Ok(None);
        }
        let out = self
            .assembler
            .assemble_build_only(table.as_ref(), &self.drain_rows)?;
        self.stats.output_rows += num_out as u64;
        Ok(Some(out))
    }

    fn finish(&mut self) {
        if self.state == ProbeState::Finished {
            return;
        }
        self.state = ProbeState::Finished;
        self.log_stats();
    }

    fn log_stats(&mut self) {
        if self.stats_logged {
            return;
        }
        self.stats_logged = true;
        debug!(
            "HashJoinProbe finished: node_id={} driver_id={} join_type={} last_probe={} input_chunks={} input_rows={} output_rows={} lookup_hit_rows={} lookup_miss_rows={} replaced_with_dynamic_filter_rows={}",
            self.node_id,
            self.driver_id,
            join_type_str(self.join_type),
            self.last_probe,
            self.stats.input_chunks,
            self.stats.input_rows,
            self.stats.output_rows,
            self.stats.lookup_hit_rows,
            self.stats.lookup_miss_rows,
            self.stats.replaced_with_dynamic_filter_rows
        );
    }
}

impl Operator for HashJoinProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_blocked(&mut self) -> Result<BlockedReason, String> {
        if self.state == ProbeState::Initial {
            self.state = ProbeState::WaitForBuild;
        }
        if self.state != ProbeState::WaitForBuild {
            return Ok(BlockedReason::NotBlocked);
        }
        self.acquire_table()
    }

    fn needs_input(&self) -> bool {
        self.state == ProbeState::Running && !self.no_more_input && self.input.is_none()
    }

    fn add_input(&mut self, chunk: Chunk) -> Result<(), String> {
        match self.state {
            ProbeState::Running => {}
            ProbeState::Initial | ProbeState::WaitForBuild => {
                return Err("hash probe received input before build table is ready".to_string());
            }
            ProbeState::DrainUnmatchedBuild | ProbeState::Finished => {
                return Err("hash probe received input after end of input".to_string());
            }
        }
        if self.no_more_input {
            return Err("hash probe received input after no_more_input".to_string());
        }
        if self.input.is_some() {
            return Err("hash probe received input while current batch is not drained".to_string());
        }
        if chunk.is_empty() {
            return Err("hash probe received an empty input batch".to_string());
        }

        self.stats.input_chunks += 1;
        self.stats.input_rows += chunk.len() as u64;

        if self.can_replace_with_dynamic_filter {
            self.replaced_with_dynamic_filter = true;
            self.input = Some(chunk);
            return Ok(());
        }

        let table = Arc::clone(
            self.table
                .as_ref()
                .ok_or_else(|| "probe table missing in running state".to_string())?,
        );
        if table.num_distinct() == 0 {
            // Reaching here with an empty build is valid only for modes that
            // keep probe rows; the rest short-circuited at build acquisition.
            if !self.join_type.emits_probe_misses() {
                return Err("empty build side reached a short-circuit join mode".to_string());
            }
            self.input = Some(chunk);
            return Ok(());
        }

        let has_work = self.encode_input(&chunk, &table)?;
        if !has_work {
            // Inner-family batch with no probeable row is consumed in place.
            return Ok(());
        }
        self.input = Some(chunk);
        Ok(())
    }

    fn get_output(&mut self) -> Result<Option<Chunk>, String> {
        match self.state {
            ProbeState::Initial | ProbeState::WaitForBuild => return Ok(None),
            ProbeState::Finished => return Ok(None),
            ProbeState::DrainUnmatchedBuild => return self.drain_step(),
            ProbeState::Running => {}
        }
        if self.input.is_none() {
            if self.no_more_input {
                if self.join_type.is_right_family() && self.last_probe && self.table.is_some() {
                    self.state = ProbeState::DrainUnmatchedBuild;
                    self.drain_iter.reset();
                    return self.drain_step();
                }
                self.finish();
            }
            return Ok(None);
        }
        self.running_output()
    }

    fn no_more_input(&mut self) -> Result<(), String> {
        if self.no_more_input {
            return Ok(());
        }
        self.no_more_input = true;
        if self.join_type.is_right_family() {
            // The last driver over the barrier emits the unmatched build rows;
            // everyone else just finishes.
            let elected = match self.barrier.as_ref() {
                Some(barrier) => barrier.all_peers_finished(),
                None => true,
            };
            if elected && self.table.is_some() {
                self.last_probe = true;
            }
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state == ProbeState::Finished
    }

    fn close(&mut self) -> Result<(), String> {
        self.log_stats();
        Ok(())
    }

    fn cancel(&mut self) {
        self.state = ProbeState::Finished;
    }
}
