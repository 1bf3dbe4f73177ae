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

use crate::domain::{Address, Era, RewardBreakdown};
use derive_more::Display;
use std::error::Error as StdError;

/// Source of per-era reward breakdowns.
#[trait_variant::make(Send)]
pub trait RewardSource
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// Fetch the rewards of the given address in the given era; `None` means the address was not
    /// staking in that era, which is a valid result and not a failure.
    async fn fetch(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, Self::Error>;
}

/// The strategy a request was served by.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    #[display("indexer")]
    Indexer,

    #[display("worker")]
    Worker,
}

#[cfg(test)]
pub mod tests {
    use crate::domain::{Address, Era, RewardBreakdown, source::RewardSource};
    use parking_lot::Mutex;
    use std::{collections::BTreeMap, sync::Arc, time::Duration};
    use thiserror::Error;
    use tokio::time::sleep;

    /// Scripted [RewardSource] counting its calls per era.
    #[derive(Debug, Clone, Default)]
    pub struct MockSource(Arc<Mutex<State>>);

    #[derive(Debug, Default)]
    struct State {
        rewards: BTreeMap<Era, RewardBreakdown>,
        failures: BTreeMap<Era, usize>,
        delay: Option<Duration>,
        calls: BTreeMap<Era, usize>,
    }

    #[derive(Debug, Error)]
    #[error("mock source failed for era {0}")]
    pub struct MockSourceError(pub Era);

    impl MockSource {
        pub fn with_rewards(self, era: Era, rewards: RewardBreakdown) -> Self {
            self.0.lock().rewards.insert(era, rewards);
            self
        }

        /// Let every request for the given era fail.
        pub fn with_failure(self, era: Era) -> Self {
            self.with_failures(era, usize::MAX)
        }

        /// Let the next `count` requests for the given era fail.
        pub fn with_failures(self, era: Era, count: usize) -> Self {
            self.0.lock().failures.insert(era, count);
            self
        }

        pub fn with_delay(self, delay: Duration) -> Self {
            self.0.lock().delay = Some(delay);
            self
        }

        pub fn calls(&self, era: Era) -> usize {
            self.0.lock().calls.get(&era).copied().unwrap_or_default()
        }

        pub fn total_calls(&self) -> usize {
            self.0.lock().calls.values().sum()
        }
    }

    impl RewardSource for MockSource {
        type Error = MockSourceError;

        async fn fetch(
            &self,
            _address: &Address,
            era: Era,
        ) -> Result<Option<RewardBreakdown>, Self::Error> {
            let delay = {
                let mut state = self.0.lock();
                *state.calls.entry(era).or_default() += 1;
                state.delay
            };

            if let Some(delay) = delay {
                sleep(delay).await;
            }

            let mut state = self.0.lock();
            match state.failures.get_mut(&era) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(MockSourceError(era))
                }

                _ => Ok(state.rewards.get(&era).cloned()),
            }
        }
    }
}
