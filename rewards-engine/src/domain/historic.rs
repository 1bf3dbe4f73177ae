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

use crate::domain::{AccountId, Address, Balance, Era};
use derive_more::Display;
use serde::Deserialize;
use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;

/// Snapshot of a validator in one era.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricValidator {
    pub address: Address,
    /// Commission as a fraction in `0.0..=1.0`.
    pub commission: f64,
    pub blocked: bool,
    pub points: u32,
    pub reward: Balance,
    pub commission_share: Balance,
    pub nominators_share: Balance,
    pub active_bond: Balance,
    pub nominator_quantity: u32,
}

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovingAverage {
    #[default]
    #[display("simple")]
    Simple,

    #[display("exponential")]
    Exponential,
}

impl FromStr for MovingAverage {
    type Err = UnknownMovingAverageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "simple" | "sma" => Ok(Self::Simple),
            "exponential" | "ema" => Ok(Self::Exponential),
            _ => Err(UnknownMovingAverageError(s.to_owned())),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown moving average {0:?}, expected simple or exponential")]
pub struct UnknownMovingAverageError(String);

/// Which eras to aggregate and how: the window covers the `period` eras ending with
/// `selected_era`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationConfig {
    pub selected_era: Era,
    pub period: u32,
    pub kind: MovingAverage,
}

/// How a [HistoricValidator] field is aggregated over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Taken from the most recent era in the window.
    Passthrough,
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Address,
    Commission,
    Blocked,
    Points,
    Reward,
    CommissionShare,
    NominatorsShare,
    ActiveBond,
    NominatorQuantity,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Address,
        Field::Commission,
        Field::Blocked,
        Field::Points,
        Field::Reward,
        Field::CommissionShare,
        Field::NominatorsShare,
        Field::ActiveBond,
        Field::NominatorQuantity,
    ];

    pub fn aggregation(self) -> Aggregation {
        match self {
            Field::Address | Field::Commission | Field::Blocked => Aggregation::Passthrough,
            _ => Aggregation::Mean,
        }
    }

    fn value(self, validator: &HistoricValidator) -> Option<f64> {
        match self {
            Field::Address | Field::Blocked => None,
            Field::Commission => Some(validator.commission),
            Field::Points => Some(validator.points as f64),
            Field::Reward => Some(validator.reward as f64),
            Field::CommissionShare => Some(validator.commission_share as f64),
            Field::NominatorsShare => Some(validator.nominators_share as f64),
            Field::ActiveBond => Some(validator.active_bond as f64),
            Field::NominatorQuantity => Some(validator.nominator_quantity as f64),
        }
    }

    fn set(self, validator: &mut HistoricValidator, value: f64) {
        match self {
            Field::Address | Field::Blocked => {}
            Field::Commission => validator.commission = value,
            Field::Points => validator.points = value.round() as u32,
            Field::Reward => validator.reward = value.round() as Balance,
            Field::CommissionShare => validator.commission_share = value.round() as Balance,
            Field::NominatorsShare => validator.nominators_share = value.round() as Balance,
            Field::ActiveBond => validator.active_bond = value.round() as Balance,
            Field::NominatorQuantity => validator.nominator_quantity = value.round() as u32,
        }
    }
}

impl MovingAverage {
    /// Average values ordered from oldest to newest; `None` for no values.
    pub fn average(self, values: &[f64], period: u32) -> Option<f64> {
        let (first, rest) = values.split_first()?;

        let average = match self {
            MovingAverage::Simple => values.iter().sum::<f64>() / values.len() as f64,

            MovingAverage::Exponential => {
                let smoothing = 2.0 / (1.0 + period as f64);
                rest.iter().fold(*first, |average, value| {
                    value * smoothing + average * (1.0 - smoothing)
                })
            }
        };

        Some(average)
    }
}

/// Folds per-era validator snapshots and aggregates them over a moving window. The aggregate is
/// cached until the snapshots or the config change.
#[derive(Debug, Clone)]
pub struct HistoricalAggregator {
    eras: BTreeMap<Era, BTreeMap<AccountId, HistoricValidator>>,
    config: AggregationConfig,
    aggregated: Option<Option<BTreeMap<AccountId, HistoricValidator>>>,
}

impl HistoricalAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            eras: BTreeMap::new(),
            config,
            aggregated: None,
        }
    }

    pub fn insert_era(
        &mut self,
        era: Era,
        validators: impl IntoIterator<Item = HistoricValidator>,
    ) {
        let validators = validators
            .into_iter()
            .map(|validator| (validator.address.account_id().to_owned(), validator))
            .collect();
        self.eras.insert(era, validators);
        self.aggregated = None;
    }

    pub fn configure(&mut self, config: AggregationConfig) {
        if config != self.config {
            self.config = config;
            self.aggregated = None;
        }
    }

    pub fn config(&self) -> AggregationConfig {
        self.config
    }

    /// The validators of the window aggregated per address; `None` if the period is zero or
    /// there is no data for the selected era.
    pub fn aggregated(&mut self) -> Option<&BTreeMap<AccountId, HistoricValidator>> {
        if self.aggregated.is_none() {
            self.aggregated = Some(aggregate(&self.eras, self.config));
        }

        self.aggregated.as_ref().and_then(|a| a.as_ref())
    }
}

fn aggregate(
    eras: &BTreeMap<Era, BTreeMap<AccountId, HistoricValidator>>,
    config: AggregationConfig,
) -> Option<BTreeMap<AccountId, HistoricValidator>> {
    let AggregationConfig {
        selected_era,
        period,
        kind,
    } = config;

    if period < 1 || !eras.contains_key(&selected_era) {
        return None;
    }

    let window_start = selected_era.saturating_sub(period - 1);
    let mut by_address = BTreeMap::<&AccountId, Vec<&HistoricValidator>>::new();
    for validators in eras.range(window_start..=selected_era).map(|(_, v)| v) {
        for (account_id, validator) in validators {
            by_address.entry(account_id).or_default().push(validator);
        }
    }

    let aggregated = by_address
        .into_iter()
        .filter_map(|(account_id, snapshots)| {
            let mut aggregated = (*snapshots.last()?).clone();

            for field in Field::ALL {
                if field.aggregation() == Aggregation::Mean {
                    let values = snapshots
                        .iter()
                        .filter_map(|validator| field.value(validator))
                        .collect::<Vec<_>>();
                    if let Some(average) = kind.average(&values, period) {
                        field.set(&mut aggregated, average);
                    }
                }
            }

            Some((account_id.to_owned(), aggregated))
        })
        .collect();

    Some(aggregated)
}

#[cfg(test)]
mod tests {
    use crate::domain::{
        AccountId, Address, AggregationConfig, Aggregation, Field, HistoricValidator,
        HistoricalAggregator, MovingAverage,
    };
    use proptest::prelude::*;

    fn validator(seed: u8, points: u32, commission: f64) -> HistoricValidator {
        HistoricValidator {
            address: Address::from(AccountId::from([seed; 32])),
            commission,
            blocked: false,
            points,
            reward: points as u128 * 1_000,
            commission_share: 0,
            nominators_share: points as u128 * 900,
            active_bond: 1_000_000,
            nominator_quantity: 10,
        }
    }

    fn config(selected_era: u32, period: u32, kind: MovingAverage) -> AggregationConfig {
        AggregationConfig {
            selected_era,
            period,
            kind,
        }
    }

    #[test]
    fn test_field_table() {
        let passthrough = Field::ALL
            .into_iter()
            .filter(|field| field.aggregation() == Aggregation::Passthrough)
            .collect::<Vec<_>>();
        assert_eq!(
            passthrough,
            vec![Field::Address, Field::Commission, Field::Blocked]
        );
    }

    #[test]
    fn test_simple() {
        let mut aggregator = HistoricalAggregator::new(config(3, 3, MovingAverage::Simple));
        aggregator.insert_era(1, [validator(1, 100, 0.01)]);
        aggregator.insert_era(2, [validator(1, 200, 0.02)]);
        let mut latest = validator(1, 300, 0.05);
        latest.blocked = true;
        aggregator.insert_era(3, [latest]);

        let aggregated = aggregator.aggregated().expect("aggregate for era 3");
        let v = &aggregated[&AccountId::from([1; 32])];
        assert_eq!(v.points, 200);
        assert_eq!(v.reward, 200_000);
        assert_eq!(v.commission, 0.05);
        assert!(v.blocked);
    }

    #[test]
    fn test_missing_eras_are_skipped() {
        let mut aggregator = HistoricalAggregator::new(config(4, 4, MovingAverage::Simple));
        aggregator.insert_era(1, [validator(1, 100, 0.1)]);
        aggregator.insert_era(3, [validator(1, 200, 0.1)]);
        aggregator.insert_era(4, [validator(1, 600, 0.1), validator(2, 50, 0.1)]);

        let aggregated = aggregator.aggregated().expect("aggregate for era 4");
        assert_eq!(aggregated[&AccountId::from([1; 32])].points, 300);
        assert_eq!(aggregated[&AccountId::from([2; 32])].points, 50);
    }

    #[test]
    fn test_none() {
        let mut aggregator = HistoricalAggregator::new(config(3, 0, MovingAverage::Simple));
        aggregator.insert_era(3, [validator(1, 100, 0.1)]);
        assert!(aggregator.aggregated().is_none());

        aggregator.configure(config(4, 2, MovingAverage::Simple));
        assert!(aggregator.aggregated().is_none());

        aggregator.configure(config(3, 2, MovingAverage::Simple));
        assert!(aggregator.aggregated().is_some());
    }

    #[test]
    fn test_cache_invalidation() {
        let mut aggregator = HistoricalAggregator::new(config(2, 2, MovingAverage::Simple));
        aggregator.insert_era(2, [validator(1, 100, 0.1)]);
        assert_eq!(
            aggregator.aggregated().map(|a| a[&AccountId::from([1; 32])].points),
            Some(100)
        );

        aggregator.insert_era(1, [validator(1, 300, 0.1)]);
        assert_eq!(
            aggregator.aggregated().map(|a| a[&AccountId::from([1; 32])].points),
            Some(200)
        );

        aggregator.configure(config(2, 2, MovingAverage::Exponential));
        assert_eq!(
            aggregator.aggregated().map(|a| a[&AccountId::from([1; 32])].points),
            Some(167)
        );
    }

    #[test]
    fn test_moving_average_from_str() {
        assert_eq!("simple".parse::<MovingAverage>().ok(), Some(MovingAverage::Simple));
        assert_eq!("EMA".parse::<MovingAverage>().ok(), Some(MovingAverage::Exponential));
        assert!("median".parse::<MovingAverage>().is_err());
    }

    proptest! {
        #[test]
        fn test_exponential_above_simple_for_increasing_series(
            start in 0u32..1_000_000,
            increments in prop::collection::vec(1_000u32..100_000, 1..5),
        ) {
            let period = increments.len() as u32 + 1;
            let selected_era = 100 + increments.len() as u32;

            let mut points = start;
            let mut simple =
                HistoricalAggregator::new(config(selected_era, period, MovingAverage::Simple));
            let mut exponential =
                HistoricalAggregator::new(config(selected_era, period, MovingAverage::Exponential));
            for (era, increment) in (100..).zip([0].into_iter().chain(increments)) {
                points += increment;
                simple.insert_era(era, [validator(1, points, 0.1)]);
                exponential.insert_era(era, [validator(1, points, 0.1)]);
            }

            let account_id = AccountId::from([1; 32]);
            let simple = simple.aggregated().map(|a| a[&account_id].reward);
            let exponential = exponential.aggregated().map(|a| a[&account_id].reward);
            prop_assert!(exponential > simple, "{exponential:?} <= {simple:?}");
        }
    }
}
