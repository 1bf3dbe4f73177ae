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
    AccountId, Address, Balance, Era, RewardBreakdown, ValidatorShare, source::RewardSource,
};
use log::debug;
use parity_scale_codec::{Decode, DecodeAll, Encode};
use reqwest::Client;
use rewards_common::domain::NetworkId;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Config for the indexer HTTP API. Networks without a base URL are served by the worker only.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub urls: HashMap<NetworkId, String>,

    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            urls: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// A [RewardSource] backed by a batch indexer serving SCALE encoded per-era rewards at
/// `{base_url}/{era}/{address}`; an empty body means no rewards.
#[derive(Debug, Clone)]
pub struct IndexerClient {
    http: Client,
    base_url: String,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, IndexerError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_owned();

        Ok(Self { http, base_url })
    }

    /// Create an [IndexerClient] for the given network, `None` if no URL is configured for it.
    pub fn for_network(
        config: &Config,
        network_id: &NetworkId,
    ) -> Result<Option<Self>, IndexerError> {
        config
            .urls
            .get(network_id)
            .map(|url| Self::new(url.as_str(), config.timeout))
            .transpose()
    }
}

impl RewardSource for IndexerClient {
    type Error = IndexerError;

    async fn fetch(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, Self::Error> {
        let url = format!("{}/{era}/{address}", self.base_url);
        debug!(url:%; "fetching rewards from indexer");

        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        if body.is_empty() {
            return Ok(None);
        }

        let rewards = IndexerRewards::decode_all(&mut body.as_ref())?;
        Ok(Some(rewards.into()))
    }
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("indexer HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("cannot SCALE decode indexer response")]
    Decode(#[from] parity_scale_codec::Error),
}

#[derive(Debug, Encode, Decode)]
struct IndexerRewards {
    #[codec(compact)]
    total: Balance,
    #[codec(compact)]
    total_commission: Balance,
    #[codec(compact)]
    active_bond: Balance,
    by_validator: BTreeMap<AccountId, IndexerValidatorShare>,
}

#[derive(Debug, Encode, Decode)]
struct IndexerValidatorShare {
    #[codec(compact)]
    reward: Balance,
    #[codec(compact)]
    bond: Balance,
    #[codec(compact)]
    commission: Balance,
}

impl From<IndexerRewards> for RewardBreakdown {
    fn from(rewards: IndexerRewards) -> Self {
        let by_validator = rewards
            .by_validator
            .into_iter()
            .map(|(validator, share)| {
                let share = ValidatorShare {
                    reward: share.reward,
                    bond: share.bond,
                    commission: share.commission,
                };
                (validator, share)
            })
            .collect();

        Self {
            total: rewards.total,
            active_bond: rewards.active_bond,
            nominators_share: rewards.total.saturating_sub(rewards.total_commission),
            commission_share: rewards.total_commission,
            by_validator,
        }
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}
