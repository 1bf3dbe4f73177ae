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

use crate::domain::Balance;

const YEAR_MS: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1_000.0;

/// Annualize the reward rate observed in a single era by compounding it over all eras of a year.
///
/// The observed rate is assumed to recur in every era for a whole year. Returns `0.0` if nothing
/// was invested or the era duration is zero.
pub fn era_apy(era_reward: Balance, invested: Balance, era_duration_ms: u64) -> f64 {
    if invested == 0 || era_duration_ms == 0 {
        return 0.0;
    }

    let eras_per_year = YEAR_MS / era_duration_ms as f64;
    let per_era_rate = era_reward as f64 / invested as f64;

    (1.0 + per_era_rate).powf(eras_per_year) - 1.0
}
