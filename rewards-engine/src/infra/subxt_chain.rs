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
    AccountId, ActiveEraInfo, Address, Balance, ChainConstants, Era, HistoricValidator,
    RewardBreakdown, ValidatorShare,
    chain::{Chain, Connector},
};
use futures::{StreamExt, TryStreamExt, stream};
use log::debug;
use parity_scale_codec::{Decode, DecodeAll};
use rewards_common::{domain::NetworkId, error::BoxError};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use subxt::{
    OnlineClient, PolkadotConfig,
    backend::rpc::reconnecting_rpc_client::{ExponentialBackoff, RpcClient},
    dynamic::Value,
};
use thiserror::Error;

const PERBILL: u128 = 1_000_000_000;
const SNAPSHOT_CONCURRENCY: usize = 8;

/// Config for chain connections.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub urls: HashMap<NetworkId, String>,

    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,

    pub reconnect_max_attempts: usize,
}

/// A [Connector] creating [SubxtChain]s for the configured networks.
#[derive(Debug, Clone)]
pub struct SubxtConnector {
    config: Config,
}

impl SubxtConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for SubxtConnector {
    type Chain = SubxtChain;

    type Error = Error;

    async fn connect(&self, network_id: &NetworkId) -> Result<Self::Chain, Self::Error> {
        let url = self
            .config
            .urls
            .get(network_id)
            .ok_or_else(|| Error::UnknownNetwork(network_id.to_owned()))?;

        SubxtChain::new(
            url,
            self.config.reconnect_max_delay,
            self.config.reconnect_max_attempts,
        )
        .await
    }
}

/// A [Chain] implementation based on subxt, reading the staking pallet via dynamic storage
/// queries.
#[derive(Clone)]
pub struct SubxtChain {
    online_client: OnlineClient<PolkadotConfig>,
}

impl SubxtChain {
    /// Create a new [SubxtChain] connected to the given URL, reconnecting with exponential
    /// backoff.
    pub async fn new(
        url: &str,
        reconnect_max_delay: Duration,
        reconnect_max_attempts: usize,
    ) -> Result<Self, Error> {
        let retry_policy = ExponentialBackoff::from_millis(10)
            .max_delay(reconnect_max_delay)
            .take(reconnect_max_attempts);
        let rpc_client = RpcClient::builder()
            .retry_policy(retry_policy)
            .build(url)
            .await
            .map_err(|error| Error::RpcClient(error.into()))?;

        let online_client = OnlineClient::<PolkadotConfig>::from_rpc_client(rpc_client).await?;

        Ok(Self { online_client })
    }

    async fn fetch<T>(
        &self,
        entry: &'static str,
        keys: Vec<Value>,
    ) -> Result<Option<T>, SubxtChainError>
    where
        T: Decode,
    {
        let address = subxt::dynamic::storage("Staking", entry, keys);

        let value = self
            .online_client
            .storage()
            .at_latest()
            .await
            .map_err(|error| SubxtChainError::Storage(entry, error.into()))?
            .fetch(&address)
            .await
            .map_err(|error| SubxtChainError::Storage(entry, error.into()))?;

        value
            .map(|value| T::decode_all(&mut value.encoded()))
            .transpose()
            .map_err(|error| SubxtChainError::ScaleDecode(entry, error))
    }

    fn constant<T>(&self, pallet: &'static str, name: &'static str) -> Result<T, SubxtChainError>
    where
        T: Decode,
    {
        let address = subxt::dynamic::constant(pallet, name);

        let value = self
            .online_client
            .constants()
            .at(&address)
            .map_err(|error| SubxtChainError::Constant(name, error.into()))?;

        T::decode_all(&mut value.encoded())
            .map_err(|error| SubxtChainError::ScaleDecode(name, error))
    }

    async fn era_context(&self, era: Era) -> Result<Option<EraContext>, SubxtChainError> {
        let reward = self
            .fetch::<Balance>("ErasValidatorReward", vec![Value::u128(era as u128)])
            .await?;
        let Some(reward) = reward else {
            return Ok(None);
        };

        let points = self
            .fetch::<EraRewardPoints>("ErasRewardPoints", vec![Value::u128(era as u128)])
            .await?
            .unwrap_or_default();

        Ok(Some(EraContext {
            era,
            reward,
            points,
        }))
    }

    async fn overview(
        &self,
        validator: &AccountId,
        era: Era,
    ) -> Result<Option<PagedExposureMetadata>, SubxtChainError> {
        self.fetch(
            "ErasStakersOverview",
            vec![Value::u128(era as u128), Value::from_bytes(validator.0)],
        )
        .await
    }

    async fn prefs(
        &self,
        validator: &AccountId,
        era: Era,
    ) -> Result<ValidatorPrefs, SubxtChainError> {
        let prefs = self
            .fetch(
                "ErasValidatorPrefs",
                vec![Value::u128(era as u128), Value::from_bytes(validator.0)],
            )
            .await?
            .unwrap_or_default();

        Ok(prefs)
    }

    /// The stake of the given nominator behind the given validator, searching all exposure pages.
    async fn nominator_stake(
        &self,
        nominator: &AccountId,
        validator: &AccountId,
        era: Era,
        overview: &PagedExposureMetadata,
    ) -> Result<Option<Balance>, SubxtChainError> {
        if nominator == validator {
            return Ok(Some(overview.own));
        }

        for page in 0..overview.page_count {
            let exposure = self
                .fetch::<ExposurePage>(
                    "ErasStakersPaged",
                    vec![
                        Value::u128(era as u128),
                        Value::from_bytes(validator.0),
                        Value::u128(page as u128),
                    ],
                )
                .await?;

            let stake = exposure.and_then(|exposure| {
                exposure
                    .others
                    .into_iter()
                    .find(|individual| &individual.who == nominator)
                    .map(|individual| individual.value)
            });
            if stake.is_some() {
                return Ok(stake);
            }
        }

        Ok(None)
    }

    /// Validators backing the given nominator in the given era together with its stake. The
    /// current nominations are checked against the exposures of the era; a validator address
    /// counts as backing itself.
    async fn exposures(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Vec<Exposure>, SubxtChainError> {
        let account_id = address.account_id();

        let mut targets = self
            .fetch::<Nominations>("Nominators", vec![Value::from_bytes(account_id.0)])
            .await?
            .map(|nominations| nominations.targets)
            .unwrap_or_default();
        targets.push(account_id.to_owned());
        targets.sort();
        targets.dedup();

        let mut exposures = vec![];
        for validator in targets {
            let Some(overview) = self.overview(&validator, era).await? else {
                continue;
            };

            if let Some(stake) = self
                .nominator_stake(account_id, &validator, era, &overview)
                .await?
            {
                exposures.push(Exposure {
                    validator,
                    stake,
                    overview,
                });
            }
        }

        Ok(exposures)
    }

    async fn validator_snapshot(
        &self,
        context: &EraContext,
        validator: &AccountId,
    ) -> Result<Option<HistoricValidator>, SubxtChainError> {
        let overview = self.overview(validator, context.era).await?;
        let points = context.points.individual.get(validator).copied();
        if overview.is_none() && points.is_none() {
            return Ok(None);
        }

        let overview = overview.unwrap_or_default();
        let points = points.unwrap_or_default();
        let prefs = self.prefs(validator, context.era).await?;
        let (reward, commission_share) = split_validator_reward(
            context.reward,
            points,
            context.points.total,
            prefs.commission,
        );

        Ok(Some(HistoricValidator {
            address: Address::from(validator.to_owned()),
            commission: prefs.commission as f64 / PERBILL as f64,
            blocked: prefs.blocked,
            points,
            reward,
            commission_share,
            nominators_share: reward.saturating_sub(commission_share),
            active_bond: overview.total,
            nominator_quantity: overview.nominator_count,
        }))
    }
}

impl Chain for SubxtChain {
    type Error = SubxtChainError;

    async fn constants(&self) -> Result<ChainConstants, Self::Error> {
        let expected_block_time_ms = self.constant::<u64>("Babe", "ExpectedBlockTime")?;
        let epoch_duration = self.constant::<u64>("Babe", "EpochDuration")?;
        let sessions_per_era = self.constant::<u32>("Staking", "SessionsPerEra")?;

        Ok(ChainConstants {
            expected_block_time_ms,
            epoch_duration,
            sessions_per_era,
        })
    }

    async fn active_era(&self) -> Result<ActiveEraInfo, Self::Error> {
        let active_era = self
            .fetch::<StakingActiveEraInfo>("ActiveEra", vec![])
            .await?
            .ok_or(SubxtChainError::NoActiveEra)?;

        Ok(ActiveEraInfo {
            index: active_era.index,
            start_ms: active_era.start,
        })
    }

    async fn nominator_rewards(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, Self::Error> {
        let Some(context) = self.era_context(era).await? else {
            debug!(era; "no validator reward for era");
            return Ok(None);
        };

        let exposures = self.exposures(address, era).await?;
        if exposures.is_empty() {
            return Ok(None);
        }

        let mut breakdown = RewardBreakdown::default();
        for exposure in exposures {
            let points = context
                .points
                .individual
                .get(&exposure.validator)
                .copied()
                .unwrap_or_default();
            let prefs = self.prefs(&exposure.validator, era).await?;
            let (validator_reward, validator_commission) = split_validator_reward(
                context.reward,
                points,
                context.points.total,
                prefs.commission,
            );

            let nominators_share = multiply_ratio(
                validator_reward.saturating_sub(validator_commission),
                exposure.stake,
                exposure.overview.total,
            );
            let commission = if &exposure.validator == address.account_id() {
                validator_commission
            } else {
                0
            };

            breakdown.total += nominators_share + commission;
            breakdown.active_bond += exposure.stake;
            breakdown.nominators_share += nominators_share;
            breakdown.commission_share += commission;
            breakdown.by_validator.insert(
                exposure.validator,
                ValidatorShare {
                    reward: nominators_share + commission,
                    bond: exposure.stake,
                    commission,
                },
            );
        }

        Ok(Some(breakdown))
    }

    async fn nominator_active_validators(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Vec<AccountId>, Self::Error> {
        let validators = self
            .exposures(address, era)
            .await?
            .into_iter()
            .map(|exposure| exposure.validator)
            .collect();

        Ok(validators)
    }

    async fn validator_rewards(
        &self,
        validator: &AccountId,
        era: Era,
    ) -> Result<Option<HistoricValidator>, Self::Error> {
        match self.era_context(era).await? {
            Some(context) => self.validator_snapshot(&context, validator).await,
            None => Ok(None),
        }
    }

    async fn era_validators(&self, era: Era) -> Result<Vec<HistoricValidator>, Self::Error> {
        let Some(context) = self.era_context(era).await? else {
            return Ok(vec![]);
        };

        let validators = context.points.individual.keys().cloned().collect::<Vec<_>>();
        let snapshots = stream::iter(validators)
            .map(|validator| {
                let context = &context;
                async move { self.validator_snapshot(context, &validator).await }
            })
            .buffered(SNAPSHOT_CONCURRENCY)
            .try_filter_map(|snapshot| async move { Ok(snapshot) })
            .try_collect::<Vec<_>>()
            .await?;

        Ok(snapshots)
    }
}

/// Error possibly returned by [SubxtChain::new] or [SubxtConnector::connect].
#[derive(Debug, Error)]
pub enum Error {
    #[error("no chain URL configured for network {0}")]
    UnknownNetwork(NetworkId),

    #[error("cannot create reconnecting subxt RPC client")]
    RpcClient(#[source] BoxError),

    #[error("cannot create subxt online client")]
    OnlineClient(#[from] subxt::Error),
}

/// Error possibly returned by [SubxtChain] queries.
#[derive(Debug, Error)]
pub enum SubxtChainError {
    #[error("cannot fetch storage entry Staking.{0}")]
    Storage(&'static str, #[source] BoxError),

    #[error("cannot get constant {0}")]
    Constant(&'static str, #[source] BoxError),

    #[error("cannot SCALE decode {0}")]
    ScaleDecode(&'static str, #[source] parity_scale_codec::Error),

    #[error("no active era")]
    NoActiveEra,
}

struct EraContext {
    era: Era,
    reward: Balance,
    points: EraRewardPoints,
}

struct Exposure {
    validator: AccountId,
    stake: Balance,
    overview: PagedExposureMetadata,
}

#[derive(Debug, Decode)]
struct StakingActiveEraInfo {
    index: Era,
    start: Option<u64>,
}

#[derive(Debug, Default, Decode)]
struct EraRewardPoints {
    total: u32,
    individual: BTreeMap<AccountId, u32>,
}

#[derive(Debug, Default, Decode)]
struct ValidatorPrefs {
    /// Perbill.
    #[codec(compact)]
    commission: u32,
    blocked: bool,
}

#[derive(Debug, Default, Decode)]
struct PagedExposureMetadata {
    #[codec(compact)]
    total: Balance,
    #[codec(compact)]
    own: Balance,
    nominator_count: u32,
    page_count: u32,
}

#[derive(Debug, Decode)]
struct ExposurePage {
    #[codec(compact)]
    #[allow(dead_code)]
    page_total: Balance,
    others: Vec<IndividualExposure>,
}

#[derive(Debug, Decode)]
struct IndividualExposure {
    who: AccountId,
    #[codec(compact)]
    value: Balance,
}

#[derive(Debug, Decode)]
struct Nominations {
    targets: Vec<AccountId>,
    #[allow(dead_code)]
    submitted_in: Era,
    #[allow(dead_code)]
    suppressed: bool,
}

/// The era reward of a validator by its share of the era points, and the commission it takes.
fn split_validator_reward(
    era_reward: Balance,
    points: u32,
    total_points: u32,
    commission: u32,
) -> (Balance, Balance) {
    let reward = multiply_ratio(era_reward, points as Balance, total_points as Balance);
    let commission = multiply_ratio(reward, commission as Balance, PERBILL);
    (reward, commission)
}

fn multiply_ratio(value: Balance, numerator: Balance, denominator: Balance) -> Balance {
    value
        .saturating_mul(numerator)
        .checked_div(denominator)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use crate::{
        domain::AccountId,
        infra::subxt_chain::{
            EraRewardPoints, ExposurePage, PagedExposureMetadata, StakingActiveEraInfo,
            ValidatorPrefs, multiply_ratio, split_validator_reward,
        },
    };
    use parity_scale_codec::{Compact, DecodeAll, Encode};
    use std::collections::BTreeMap;

    #[test]
    fn test_split_validator_reward() {
        // 10% of the points, 5% commission.
        let (reward, commission) = split_validator_reward(1_000_000, 100, 1_000, 50_000_000);
        assert_eq!(reward, 100_000);
        assert_eq!(commission, 5_000);

        assert_eq!(split_validator_reward(1_000_000, 0, 0, 50_000_000), (0, 0));
    }

    #[test]
    fn test_multiply_ratio() {
        assert_eq!(multiply_ratio(95_000, 250, 1_000), 23_750);
        assert_eq!(multiply_ratio(95_000, 250, 0), 0);
    }

    #[test]
    fn test_decode_storage_values() {
        let bytes = (42u32, Some(1_700_000_000_000u64)).encode();
        let active_era = StakingActiveEraInfo::decode_all(&mut bytes.as_slice());
        assert!(matches!(
            active_era,
            Ok(StakingActiveEraInfo { index: 42, start: Some(1_700_000_000_000) })
        ));

        let individual = BTreeMap::from([(AccountId::from([1; 32]), 20u32)]);
        let bytes = (20u32, individual).encode();
        let points = EraRewardPoints::decode_all(&mut bytes.as_slice());
        assert!(matches!(points, Ok(points) if points.total == 20 && points.individual.len() == 1));

        let bytes = (Compact(30_000_000u32), true).encode();
        let prefs = ValidatorPrefs::decode_all(&mut bytes.as_slice());
        assert!(matches!(prefs, Ok(ValidatorPrefs { commission: 30_000_000, blocked: true })));

        let bytes = (Compact(1_000u128), Compact(100u128), 3u32, 1u32).encode();
        let overview = PagedExposureMetadata::decode_all(&mut bytes.as_slice());
        assert!(matches!(
            overview,
            Ok(overview) if overview.total == 1_000 && overview.page_count == 1
        ));

        let others = vec![(AccountId::from([2; 32]), Compact(900u128))];
        let bytes = (Compact(900u128), others).encode();
        let page = ExposurePage::decode_all(&mut bytes.as_slice());
        assert!(matches!(
            page,
            Ok(page) if page.others.len() == 1 && page.others[0].value == 900
        ));
    }
}
