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

use crate::domain::{Era, chain::Chain};
use async_stream::stream;
use futures::Stream;
use log::debug;
use rewards_common::stream::distinct_ok_by;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{MissedTickBehavior, interval};

/// Chain constants determining the nominal length of an era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConstants {
    pub expected_block_time_ms: u64,
    /// Slots per epoch (session).
    pub epoch_duration: u64,
    pub sessions_per_era: u32,
}

impl ChainConstants {
    pub fn era_duration_ms(&self) -> u64 {
        self.sessions_per_era as u64 * self.epoch_duration * self.expected_block_time_ms
    }
}

/// The on-chain active era record; `start_ms` is `None` until the first block of the era.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveEraInfo {
    pub index: Era,
    pub start_ms: Option<u64>,
}

/// The active era together with its progress, derived at a given point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveEra {
    pub era: Era,
    pub pct_complete: f64,
    pub estimated_end_ms: u64,
}

impl ActiveEra {
    pub fn derive(info: ActiveEraInfo, era_duration_ms: u64, now_ms: u64) -> Self {
        let start_ms = info.start_ms.unwrap_or(now_ms);

        let pct_complete = if era_duration_ms == 0 {
            1.0
        } else {
            (now_ms.saturating_sub(start_ms) as f64 / era_duration_ms as f64).clamp(0.0, 1.0)
        };

        Self {
            era: info.index,
            pct_complete,
            estimated_end_ms: start_ms + era_duration_ms,
        }
    }
}

/// An infinite stream of the active era, re-derived every `refresh_interval`. Errors reading the
/// active era from the chain are passed on; the stream continues with the next tick.
pub fn active_eras<C>(
    chain: C,
    constants: ChainConstants,
    refresh_interval: Duration,
) -> impl Stream<Item = Result<ActiveEra, C::Error>>
where
    C: Chain,
{
    let era_duration_ms = constants.era_duration_ms();

    stream! {
        let mut ticker = interval(refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let active_era = chain
                .active_era()
                .await
                .map(|info| ActiveEra::derive(info, era_duration_ms, now_ms()));
            if let Ok(active_era) = &active_era {
                debug!(
                    era = active_era.era,
                    pct_complete = active_era.pct_complete;
                    "active era refreshed"
                );
            }

            yield active_era;
        }
    }
}

/// Projects a stream of active eras onto the era numbers, only emitting when the number changes.
pub fn active_era_numbers<E>(
    active_eras: impl Stream<Item = Result<ActiveEra, E>>,
) -> impl Stream<Item = Result<Era, E>> {
    distinct_ok_by(active_eras, |active_era| active_era.era)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or_default()
}
