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

use crate::domain::{
    AccountId, ActiveEraInfo, Address, ChainConstants, Era, HistoricValidator, RewardBreakdown,
};
use rewards_common::domain::NetworkId;
use std::error::Error as StdError;

/// Chain abstraction: read-only access to the staking state of a Polkadot-family chain.
#[trait_variant::make(Send)]
pub trait Chain
where
    Self: Clone + Send + Sync + 'static,
{
    type Error: StdError + Send + Sync + 'static;

    /// Constants determining the era duration.
    async fn constants(&self) -> Result<ChainConstants, Self::Error>;

    /// The era currently in progress.
    async fn active_era(&self) -> Result<ActiveEraInfo, Self::Error>;

    /// The rewards of the given nominator in the given era, `None` if it was not staking.
    async fn nominator_rewards(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, Self::Error>;

    /// The validators backed by the given nominator in the given era.
    async fn nominator_active_validators(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Vec<AccountId>, Self::Error>;

    /// The snapshot of the given validator in the given era, `None` if it was not elected.
    async fn validator_rewards(
        &self,
        validator: &AccountId,
        era: Era,
    ) -> Result<Option<HistoricValidator>, Self::Error>;

    /// Snapshots of all validators elected in the given era.
    async fn era_validators(&self, era: Era) -> Result<Vec<HistoricValidator>, Self::Error>;
}

/// Establishes a [Chain] connection for a network.
#[trait_variant::make(Send)]
pub trait Connector
where
    Self: Send + Sync + 'static,
{
    type Chain: Chain;

    type Error: StdError + Send + Sync + 'static;

    async fn connect(&self, network_id: &NetworkId) -> Result<Self::Chain, Self::Error>;
}

#[cfg(test)]
pub mod tests {
    use crate::domain::{
        AccountId, ActiveEraInfo, Address, ChainConstants, Era, HistoricValidator,
        RewardBreakdown,
        chain::{Chain, Connector},
    };
    use parking_lot::Mutex;
    use rewards_common::domain::NetworkId;
    use std::{collections::BTreeMap, sync::Arc, time::Duration};
    use thiserror::Error;
    use tokio::time::sleep;

    /// In-memory [Chain] serving the same rewards for every address.
    #[derive(Debug, Clone, Default)]
    pub struct MockChain(Arc<Mutex<State>>);

    #[derive(Debug, Default)]
    struct State {
        active_era: Era,
        active_era_fails: bool,
        rewards: BTreeMap<Era, RewardBreakdown>,
        failures: BTreeMap<Era, usize>,
        delays: BTreeMap<Era, Duration>,
        validators: BTreeMap<Era, Vec<HistoricValidator>>,
        in_flight: usize,
        max_in_flight: usize,
        calls: usize,
    }

    #[derive(Debug, Error)]
    #[error("mock chain failure: {0}")]
    pub struct MockChainError(pub String);

    impl MockChain {
        pub fn with_active_era(self, era: Era) -> Self {
            self.0.lock().active_era = era;
            self
        }

        pub fn with_rewards(self, era: Era, rewards: RewardBreakdown) -> Self {
            self.0.lock().rewards.insert(era, rewards);
            self
        }

        /// Let the next `count` reward queries for the given era fail.
        pub fn with_failures(self, era: Era, count: usize) -> Self {
            self.0.lock().failures.insert(era, count);
            self
        }

        pub fn with_delay(self, era: Era, delay: Duration) -> Self {
            self.0.lock().delays.insert(era, delay);
            self
        }

        pub fn with_validators(self, era: Era, validators: Vec<HistoricValidator>) -> Self {
            self.0.lock().validators.insert(era, validators);
            self
        }

        pub fn fail_active_era(&self) {
            self.0.lock().active_era_fails = true;
        }

        /// Highest number of concurrently running reward queries.
        pub fn max_in_flight(&self) -> usize {
            self.0.lock().max_in_flight
        }

        /// Number of reward queries.
        pub fn calls(&self) -> usize {
            self.0.lock().calls
        }

        async fn query<T>(
            &self,
            era: Era,
            f: impl FnOnce(&State) -> T,
        ) -> Result<T, MockChainError> {
            let delay = {
                let mut state = self.0.lock();
                state.calls += 1;
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.delays.get(&era).copied()
            };

            if let Some(delay) = delay {
                sleep(delay).await;
            }

            let mut state = self.0.lock();
            state.in_flight -= 1;

            match state.failures.get_mut(&era) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    Err(MockChainError(format!("era {era}")))
                }

                _ => Ok(f(&state)),
            }
        }
    }

    impl Chain for MockChain {
        type Error = MockChainError;

        async fn constants(&self) -> Result<ChainConstants, Self::Error> {
            Ok(ChainConstants {
                expected_block_time_ms: 6_000,
                epoch_duration: 2_400,
                sessions_per_era: 6,
            })
        }

        async fn active_era(&self) -> Result<ActiveEraInfo, Self::Error> {
            let state = self.0.lock();

            if state.active_era_fails {
                return Err(MockChainError("active era".to_owned()));
            }

            Ok(ActiveEraInfo {
                index: state.active_era,
                start_ms: None,
            })
        }

        async fn nominator_rewards(
            &self,
            _address: &Address,
            era: Era,
        ) -> Result<Option<RewardBreakdown>, Self::Error> {
            self.query(era, |state| state.rewards.get(&era).cloned())
                .await
        }

        async fn nominator_active_validators(
            &self,
            _address: &Address,
            era: Era,
        ) -> Result<Vec<AccountId>, Self::Error> {
            self.query(era, |state| {
                state
                    .rewards
                    .get(&era)
                    .map(|rewards| rewards.by_validator.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .await
        }

        async fn validator_rewards(
            &self,
            validator: &AccountId,
            era: Era,
        ) -> Result<Option<HistoricValidator>, Self::Error> {
            let validators = self.era_validators(era).await?;
            Ok(validators
                .into_iter()
                .find(|v| v.address.account_id() == validator))
        }

        async fn era_validators(&self, era: Era) -> Result<Vec<HistoricValidator>, Self::Error> {
            self.query(era, |state| {
                state.validators.get(&era).cloned().unwrap_or_default()
            })
            .await
        }
    }

    /// [Connector] handing out clones of one [MockChain] for known networks.
    #[derive(Debug, Clone)]
    pub struct MockConnector {
        pub chain: MockChain,
        pub network_id: NetworkId,
    }

    impl Connector for MockConnector {
        type Chain = MockChain;

        type Error = MockChainError;

        async fn connect(&self, network_id: &NetworkId) -> Result<Self::Chain, Self::Error> {
            if *network_id == self.network_id {
                Ok(self.chain.clone())
            } else {
                Err(MockChainError(format!("unknown network {network_id}")))
            }
        }
    }
}
