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
//! Dynamic filters pushed down to upstream scans.
//!
//! Responsibilities:
//! - Stores typed value-set filters synthesized from build-time key values
//!   and probes candidate columns via exact set membership.
//! - Defines the consumer seam through which a probe operator publishes
//!   filters to whoever owns the upstream scan.
//!
//! Key exported interfaces:
//! - Types: `JoinDynamicFilter`.
//! - Traits: `DynamicFilterConsumer`.

use arrow::array::{Array, ArrayRef, BooleanArray, Int32Array, Int64Array, StringArray};
use arrow::datatypes::DataType;
use hashbrown::HashSet;

/// Typed value-set filter over one probe key channel. Integer variants also
/// carry the value range so consumers can degrade to a min/max filter.
#[derive(Clone, Debug)]
pub enum JoinDynamicFilter {
    Int32Values {
        values: HashSet<i32>,
        min: i32,
        max: i32,
    },
    Int64Values {
        values: HashSet<i64>,
        min: i64,
        max: i64,
    },
    Utf8Values {
        values: HashSet<String>,
    },
}

impl JoinDynamicFilter {
    /// Builds a filter from the distinct non-null key values of `keys`.
    /// Returns `None` for key types without value-set support.
    pub fn from_key_values(keys: &ArrayRef) -> Result<Option<Self>, String> {
        match keys.data_type() {
            DataType::Int32 => {
                let arr = keys
                    .as_any()
                    .downcast_ref::<Int32Array>()
                    .ok_or_else(|| "dynamic filter key is not an Int32 array".to_string())?;
                let mut values = HashSet::new();
                let mut min = i32::MAX;
                let mut max = i32::MIN;
                for row in 0..arr.len() {
                    if arr.is_null(row) {
                        continue;
                    }
                    let v = arr.value(row);
                    min = min.min(v);
                    max = max.max(v);
                    values.insert(v);
                }
                if values.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Self::Int32Values { values, min, max }))
            }
            DataType::Int64 => {
                let arr = keys
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| "dynamic filter key is not an Int64 array".to_string())?;
                let mut values = HashSet::new();
                let mut min = i64::MAX;
                let mut max = i64::MIN;
                for row in 0..arr.len() {
                    if arr.is_null(row) {
                        continue;
                    }
                    let v = arr.value(row);
                    min = min.min(v);
                    max = max.max(v);
                    values.insert(v);
                }
                if values.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Self::Int64Values { values, min, max }))
            }
            DataType::Utf8 => {
                let arr = keys
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| "dynamic filter key is not a Utf8 array".to_string())?;
                let mut values = HashSet::new();
                for row in 0..arr.len() {
                    if arr.is_null(row) {
                        continue;
                    }
                    values.insert(arr.value(row).to_string());
                }
                if values.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Self::Utf8Values { values }))
            }
            _ => Ok(None),
        }
    }

    pub fn num_values(&self) -> usize {
        match self {
            Self::Int32Values { values, .. } => values.len(),
            Self::Int64Values { values, .. } => values.len(),
            Self::Utf8Values { values } => values.len(),
        }
    }

    /// Membership mask for `column`; null rows are filtered out.
    pub fn filter_mask(&self, column: &ArrayRef) -> Result<BooleanArray, String> {
        let mask: Vec<bool> = match self {
            Self::Int32Values { values, min, max } => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Int32Array>()
                    .ok_or_else(|| "dynamic filter probe column is not Int32".to_string())?;
                (0..arr.len())
                    .map(|row| {
                        !arr.is_null(row) && {
                            let v = arr.value(row);
                            v >= *min && v <= *max && values.contains(&v)
                        }
                    })
                    .collect()
            }
            Self::Int64Values { values, min, max } => {
                let arr = column
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .ok_or_else(|| "dynamic filter probe column is not Int64".to_string())?;
                (0..arr.len())
                    .map(|row| {
                        !arr.is_null(row) && {
                            let v = arr.value(row);
                            v >= *min && v <= *max && values.contains(&v)
                        }
                    })
                    .collect()
            }
            Self::Utf8Values { values } => {
                let arr = column
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| "dynamic filter probe column is not Utf8".to_string())?;
                (0..arr.len())
                    .map(|row| !arr.is_null(row) && values.contains(arr.value(row)))
                    .collect()
            }
        };
        Ok(BooleanArray::from(mask))
    }
}

/// Receiver for dynamic filters; typically backed by the upstream scan
/// operators of the probe pipeline. Publication happens at most once per
/// probe driver, right after build acquisition.
pub trait DynamicFilterConsumer: Send + Sync {
    /// Subset of `candidates` (probe key channels) the upstream can accept
    /// pushdown on.
    fn pushdown_channels(&self, candidates: &[usize]) -> Vec<usize>;

    fn publish(&self, channel: usize, filter: JoinDynamicFilter) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn int32_filter_masks_membership_and_nulls() {
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), Some(3), Some(1), None]));
        let filter = JoinDynamicFilter::from_key_values(&keys)
            .expect("filter")
            .expect("int32 supported");
        assert_eq!(filter.num_values(), 2);

        let probe: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), Some(2), None, Some(3)]));
        let mask = filter.filter_mask(&probe).expect("mask");
        let got: Vec<bool> = (0..mask.len()).map(|i| mask.value(i)).collect();
        assert_eq!(got, vec![true, false, false, true]);
    }

    #[test]
    fn utf8_filter_masks_membership() {
        let keys: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
        let filter = JoinDynamicFilter::from_key_values(&keys)
            .expect("filter")
            .expect("utf8 supported");
        let probe: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), Some("c"), None]));
        let mask = filter.filter_mask(&probe).expect("mask");
        let got: Vec<bool> = (0..mask.len()).map(|i| mask.value(i)).collect();
        assert_eq!(got, vec![true, false, false]);
    }

    #[test]
    fn all_null_keys_produce_no_filter() {
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![None::<i32>]));
        assert!(JoinDynamicFilter::from_key_values(&keys)
            .expect("filter")
            .is_none());
    }

    #[test]
    fn unsupported_type_produces_no_filter() {
        let keys: ArrayRef = Arc::new(arrow::array::Float64Array::from(vec![1.0]));
        assert!(JoinDynamicFilter::from_key_values(&keys)
            .expect("filter")
            .is_none());
    }
}
