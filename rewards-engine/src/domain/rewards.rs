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

use crate::domain::era_apy;
use derive_more::Display;
use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;

/// Index of a reward-accounting period; increases monotonically by one.
pub type Era = u32;

/// Amount in the smallest unit of the chain.
pub type Balance = u128;

pub type AccountId = subxt::utils::AccountId32;

/// An SS58 encoded address together with the account it decodes to. The SS58 text is kept as given,
/// because indexer files are keyed by it.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("{ss58}")]
pub struct Address {
    ss58: String,
    account_id: AccountId,
}

impl Address {
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn as_ss58(&self) -> &str {
        &self.ss58
    }
}

impl FromStr for Address {
    type Err = InvalidAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let account_id = s
            .parse::<AccountId>()
            .map_err(|_| InvalidAddressError(s.to_owned()))?;

        Ok(Self {
            ss58: s.to_owned(),
            account_id,
        })
    }
}

impl From<AccountId> for Address {
    fn from(account_id: AccountId) -> Self {
        Self {
            ss58: account_id.to_string(),
            account_id,
        }
    }
}

#[derive(Debug, Error)]
#[error("invalid SS58 address {0:?}")]
pub struct InvalidAddressError(String);

/// Reward, bond and commission attributed to one validator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorShare {
    pub reward: Balance,
    pub bond: Balance,
    pub commission: Balance,
}

/// Rewards of one address in one era.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardBreakdown {
    pub total: Balance,
    pub active_bond: Balance,
    pub nominators_share: Balance,
    pub commission_share: Balance,
    pub by_validator: BTreeMap<AccountId, ValidatorShare>,
}

/// The yield derived for one era; `apy` is `None` if there was nothing staked.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub era: Era,
    pub apy: Option<f64>,
}

impl PerformanceSample {
    pub fn new(era: Era, breakdown: Option<&RewardBreakdown>, era_duration_ms: u64) -> Self {
        let apy = breakdown
            .filter(|breakdown| breakdown.active_bond > 0)
            .map(|breakdown| era_apy(breakdown.total, breakdown.active_bond, era_duration_ms));

        Self { era, apy }
    }
}
