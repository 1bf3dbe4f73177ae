// This file is part of staking-rewards.
// Copyright (C) 2025 The staking-rewards Authors
// SPDX-License-Identifier: Apache-2.0
// Licensed under the Apache License, Version 2.0 (the "License");
// You may not use this file except in compliance with the License.
// You may obtain a copy of the License at
// http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::domain::Era;
use std::iter;

pub const DEFAULT_HISTORY_DEPTH: usize = 21;

/// Era aligned dense buffer of samples, newest era first: the sample for `era` lives at index
/// `start - 1 - era`. Samples may arrive in any order and the buffer only depends on the set of
/// samples and the highest active era seen. Holes are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartAccumulator<T> {
    start: Era,
    result: Vec<Option<T>>,
    capacity: usize,
}

impl<T> ChartAccumulator<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            start: 0,
            result: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Fold the sample for the given era into the buffer and return the updated buffer. Samples
    /// older than the window are ignored, as are samples for `Era::MAX` which has no anchor.
    pub fn apply(&mut self, era: Era, value: T, active_era: Era) -> &[Option<T>] {
        let Some(next_era) = era.checked_add(1) else {
            return &self.result;
        };
        let anchor = active_era.max(next_era);

        if self.result.is_empty() {
            self.start = anchor;
        } else if anchor > self.start {
            let shift = (anchor - self.start) as usize;
            if shift >= self.capacity {
                self.result.clear();
            } else {
                self.result
                    .splice(0..0, iter::repeat_with(|| None).take(shift));
            }
            self.start = anchor;
        }

        let index = (self.start - 1 - era) as usize;
        if index < self.capacity {
            if self.result.len() <= index {
                self.result.resize_with(index + 1, || None);
            }
            self.result[index] = Some(value);
        }

        self.result.truncate(self.capacity);
        &self.result
    }

    /// The era following the newest slot of the buffer.
    pub fn start(&self) -> Era {
        self.start
    }

    pub fn result(&self) -> &[Option<T>] {
        &self.result
    }

    /// The present samples together with their eras, newest first.
    pub fn samples(&self) -> impl Iterator<Item = (Era, &T)> {
        self.result.iter().enumerate().filter_map(|(index, value)| {
            value
                .as_ref()
                .map(|value| (self.start - 1 - index as Era, value))
        })
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.result.clear();
    }
}

impl<T> Default for ChartAccumulator<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}
