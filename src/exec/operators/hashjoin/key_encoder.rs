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
//! Probe-side key decoding and hashing.
//!
//! Responsibilities:
//! - Decodes probe key columns against the current selectivity, deselecting
//!   rows with null keys, and fills the lookup scratch with either 64-bit
//!   hashes or build-time value ids.
//! - Hosts the shared key-hashing primitives; the build side must hash with
//!   the same functions and seed for probe lookups to line up.
//!
//! Key exported interfaces:
//! - Types: `ProbeKeyEncoder`.
//! - Functions: `hash_key_columns`, `hash_key_column`, `combine_hash`.

use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float32Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, StringArray, TimestampMicrosecondArray,
    TimestampMillisecondArray, TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};

use super::join_table::{HashMode, JoinTable};
use super::lookup::HashLookup;
use crate::exec::chunk::Chunk;
use crate::exec::selectivity::SelectivityVector;

pub fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    acc ^ value_hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

pub fn hash_u64_with_seed(seed: u64, value: u64) -> u64 {
    mix_u64(seed ^ value)
}

pub fn hash_i128_with_seed(seed: u64, value: i128) -> u64 {
    let value = value as u128;
    let low = value as u64;
    let high = (value >> 64) as u64;
    let low_hash = hash_u64_with_seed(seed, low);
    let high_hash = hash_u64_with_seed(seed, high);
    combine_hash(low_hash, high_hash)
}

pub fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn hash_null_with_seed(seed: u64) -> u64 {
    hash_u64_with_seed(seed, 0x9e3779b97f4a7c15)
}

pub fn canonical_f64_bits(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

pub fn canonical_f32_bits(value: f32) -> u32 {
    if value.is_nan() {
        f32::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

/// Combines the hash of one key column into `hashes`, row by row. Null rows
/// combine a per-seed null marker so multi-key hashing stays aligned.
pub fn hash_key_column(column: &ArrayRef, seed: u64, hashes: &mut [u64]) -> Result<(), String> {
    let num_rows = column.len().min(hashes.len());
    let null_hash = hash_null_with_seed(seed);

    macro_rules! hash_values {
        ($arr:expr, $to_bits:expr) => {{
            let arr = $arr;
            for row in 0..num_rows {
                let value_hash = if arr.is_null(row) {
                    null_hash
                } else {
                    hash_u64_with_seed(seed, $to_bits(arr.value(row)))
                };
                hashes[row] = combine_hash(hashes[row], value_hash);
            }
        }};
    }

    match column.data_type() {
        DataType::Boolean => {
            let arr = downcast::<BooleanArray>(column, "Boolean")?;
            for row in 0..num_rows {
                let value_hash = if arr.is_null(row) {
                    null_hash
                } else {
                    hash_u64_with_seed(seed, arr.value(row) as u64)
                };
                hashes[row] = combine_hash(hashes[row], value_hash);
            }
        }
        DataType::Int8 => hash_values!(downcast::<Int8Array>(column, "Int8")?, |v| v as i64 as u64),
        DataType::Int16 => {
            hash_values!(downcast::<Int16Array>(column, "Int16")?, |v| v as i64 as u64)
        }
        DataType::Int32 => {
            hash_values!(downcast::<Int32Array>(column, "Int32")?, |v| v as i64 as u64)
        }
        DataType::Int64 => hash_values!(downcast::<Int64Array>(column, "Int64")?, |v| v as u64),
        DataType::Date32 => {
            hash_values!(downcast::<Date32Array>(column, "Date32")?, |v| v as i64 as u64)
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            hash_values!(
                downcast::<TimestampSecondArray>(column, "Timestamp")?,
                |v| v as u64
            )
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            hash_values!(
                downcast::<TimestampMillisecondArray>(column, "Timestamp")?,
                |v| v as u64
            )
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            hash_values!(
                downcast::<TimestampMicrosecondArray>(column, "Timestamp")?,
                |v| v as u64
            )
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            hash_values!(
                downcast::<TimestampNanosecondArray>(column, "Timestamp")?,
                |v| v as u64
            )
        }
        DataType::Float32 => {
            hash_values!(downcast::<Float32Array>(column, "Float32")?, |v| {
                canonical_f32_bits(v) as u64
            })
        }
        DataType::Float64 => {
            hash_values!(downcast::<Float64Array>(column, "Float64")?, canonical_f64_bits)
        }
        DataType::Decimal128(_, _) => {
            let arr = downcast::<Decimal128Array>(column, "Decimal128")?;
            for row in 0..num_rows {
                let value_hash = if arr.is_null(row) {
                    null_hash
                } else {
                    hash_i128_with_seed(seed, arr.value(row))
                };
                hashes[row] = combine_hash(hashes[row], value_hash);
            }
        }
        DataType::Utf8 => {
            let arr = downcast::<StringArray>(column, "Utf8")?;
            for row in 0..num_rows {
                let value_hash = if arr.is_null(row) {
                    null_hash
                } else {
                    hash_bytes_with_seed(seed, arr.value(row).as_bytes())
                };
                hashes[row] = combine_hash(hashes[row], value_hash);
            }
        }
        other => {
            return Err(format!("hash join key type not supported: {other}"));
        }
    }
    Ok(())
}

/// Hashes `columns` into one 64-bit value per row, starting from `seed`.
pub fn hash_key_columns(
    columns: &[ArrayRef],
    num_rows: usize,
    seed: u64,
) -> Result<Vec<u64>, String> {
    let mut hashes = vec![seed; num_rows];
    for column in columns {
        hash_key_column(column, seed, &mut hashes)?;
    }
    Ok(hashes)
}

fn downcast<'a, T: 'static>(column: &'a ArrayRef, label: &str) -> Result<&'a T, String> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("key column is not a {label} array"))
}

/// Decodes probe key columns and prepares the lookup scratch for one batch.
#[derive(Debug)]
pub(crate) struct ProbeKeyEncoder {
    key_channels: Vec<usize>,
}

impl ProbeKeyEncoder {
    pub(crate) fn new(key_channels: Vec<usize>) -> Self {
        Self { key_channels }
    }

    pub(crate) fn key_channels(&self) -> &[usize] {
        &self.key_channels
    }

    /// Fills `non_null_rows` (rows with no null key), `active_rows` (the rows
    /// that will be probed) and `lookup.rows`/`lookup.hashes`.
    pub(crate) fn encode(
        &self,
        input: &Chunk,
        table: &dyn JoinTable,
        non_null_rows: &mut SelectivityVector,
        active_rows: &mut SelectivityVector,
        lookup: &mut HashLookup,
    ) -> Result<(), String> {
        let num_rows = input.len();
        non_null_rows.resize_fill(num_rows, true);
        for &channel in &self.key_channels {
            non_null_rows.deselect_nulls(input.column(channel)?.as_ref());
        }
        *active_rows = non_null_rows.clone();

        lookup.reset();
        lookup.hashes.resize(num_rows, 0);
        let seed = table.hash_seed();
        lookup.hashes.iter_mut().for_each(|h| *h = seed);

        match table.hash_mode() {
            HashMode::Hash => {
                for &channel in &self.key_channels {
                    hash_key_column(input.column(channel)?, seed, &mut lookup.hashes)?;
                }
            }
            HashMode::ValueId => {
                for (key_index, &channel) in self.key_channels.iter().enumerate() {
                    table.lookup_value_ids(
                        key_index,
                        input.column(channel)?,
                        active_rows,
                        &mut lookup.hashes,
                    )?;
                }
            }
        }

        lookup.rows = active_rows.selected_rows();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn equal_keys_hash_equal() {
        let a: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3]));
        let b: ArrayRef = Arc::new(Int32Array::from(vec![3, 2, 1]));
        let ha = hash_key_columns(&[a], 3, 42).expect("hashes");
        let hb = hash_key_columns(&[b], 3, 42).expect("hashes");
        assert_eq!(ha[0], hb[2]);
        assert_eq!(ha[1], hb[1]);
        assert_ne!(ha[0], ha[1]);
    }

    #[test]
    fn multi_key_hash_differs_from_single() {
        let k1: ArrayRef = Arc::new(Int32Array::from(vec![1]));
        let k2: ArrayRef = Arc::new(StringArray::from(vec!["a"]));
        let single = hash_key_columns(&[Arc::clone(&k1)], 1, 7).expect("hashes");
        let multi = hash_key_columns(&[k1, k2], 1, 7).expect("hashes");
        assert_ne!(single[0], multi[0]);
    }

    #[test]
    fn seed_changes_hashes() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![10]));
        let h1 = hash_key_columns(&[Arc::clone(&a)], 1, 1).expect("hashes");
        let h2 = hash_key_columns(&[a], 1, 2).expect("hashes");
        assert_ne!(h1[0], h2[0]);
    }

    #[test]
    fn unsupported_type_is_an_error() {
        let a: ArrayRef = Arc::new(arrow::array::ListArray::from_iter_primitive::<
            arrow::datatypes::Int32Type,
            _,
            _,
        >(vec![Some(vec![Some(1)])]));
        let err = hash_key_columns(&[a], 1, 0).expect_err("expected unsupported type");
        assert!(err.contains("not supported"), "err={}", err);
    }
}
