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
//! Selectivity bitmap over row indices.
//!
//! Responsibilities:
//! - Tracks the set of valid row positions in `[0, len)` for vectorized passes.
//! - Supports fast all/any checks, set-bit iteration, and null deselection
//!   against Arrow validity buffers.
//!
//! Key exported interfaces:
//! - Types: `SelectivityVector`.

use arrow::array::Array;

const WORD_BITS: usize = 64;

/// Word-packed set of valid row indices over `[0, len)`.
#[derive(Clone, Debug, Default)]
pub struct SelectivityVector {
    words: Vec<u64>,
    len: usize,
}

impl SelectivityVector {
    pub fn new_all(len: usize) -> Self {
        let mut v = Self::default();
        v.resize_fill(len, true);
        v
    }

    pub fn new_none(len: usize) -> Self {
        let mut v = Self::default();
        v.resize_fill(len, false);
        v
    }

    /// Resets to `len` rows, all set to `value`. Capacity is kept.
    pub fn resize_fill(&mut self, len: usize, value: bool) {
        self.len = len;
        let num_words = len.div_ceil(WORD_BITS);
        self.words.clear();
        self.words
            .resize(num_words, if value { u64::MAX } else { 0 });
        self.trim_tail();
    }

    fn trim_tail(&mut self) {
        let tail = self.len % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_valid(&self, row: usize) -> bool {
        debug_assert!(row < self.len);
        (self.words[row / WORD_BITS] >> (row % WORD_BITS)) & 1 != 0
    }

    pub fn set_valid(&mut self, row: usize, valid: bool) {
        debug_assert!(row < self.len);
        let mask = 1u64 << (row % WORD_BITS);
        if valid {
            self.words[row / WORD_BITS] |= mask;
        } else {
            self.words[row / WORD_BITS] &= !mask;
        }
    }

    pub fn count_selected(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_all_selected(&self) -> bool {
        self.count_selected() == self.len
    }

    pub fn has_selections(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    /// Calls `f` for every valid row in ascending order.
    pub fn for_each_selected(&self, mut f: impl FnMut(usize)) {
        for (word_idx, word) in self.words.iter().enumerate() {
            let mut bits = *word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                f(word_idx * WORD_BITS + bit);
                bits &= bits - 1;
            }
        }
    }

    /// Collects valid rows, ascending.
    pub fn selected_rows(&self) -> Vec<usize> {
        let mut rows = Vec::with_capacity(self.count_selected());
        self.for_each_selected(|row| rows.push(row));
        rows
    }

    /// Deselects rows that are null in `array`.
    pub fn deselect_nulls(&mut self, array: &dyn Array) {
        if array.null_count() == 0 {
            return;
        }
        for row in 0..self.len.min(array.len()) {
            if array.is_null(row) {
                self.set_valid(row, false);
            }
        }
    }
}
