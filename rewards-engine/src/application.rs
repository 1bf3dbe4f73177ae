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
    Address, AggregationConfig, BreakerConfig, ChartAccumulator, DEFAULT_HISTORY_DEPTH, Era,
    HistoricValidator, HistoricalAggregator, PerformanceSample, ResolvedRewards, RewardResolver,
    active_era_numbers, active_eras,
    chain::Chain,
    source::RewardSource,
};
use anyhow::Context;
use async_stream::stream;
use futures::{Stream, StreamExt, future::ready, stream, stream::FuturesUnordered};
use log::{debug, info, warn};
use rewards_common::{domain::NetworkId, error::StdErrorExt};
use serde::Deserialize;
use std::{collections::BTreeSet, error::Error as StdError, pin::pin, time::Duration};
use tokio::{select, signal::unix::Signal};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network_id: NetworkId,

    #[serde(default = "default_history_depth")]
    pub history_depth: u32,

    #[serde(with = "humantime_serde", default = "default_era_refresh_interval")]
    pub era_refresh_interval: Duration,

    #[serde(rename = "breaker", default)]
    pub breaker_config: BreakerConfig,
}

/// Keep the reward chart of the given address up to date: whenever the active era changes, all
/// eras of the look-back window not yet resolved and the active era itself are requested and the
/// results folded into the chart. Runs until SIGTERM.
pub async fn run<I, W, C>(
    config: Config,
    address: Address,
    resolver: RewardResolver<I, W>,
    chain: C,
    mut sigterm: Signal,
) -> anyhow::Result<()>
where
    I: RewardSource,
    W: RewardSource,
    C: Chain,
{
    let Config {
        network_id,
        history_depth,
        era_refresh_interval,
        ..
    } = config;

    let constants = chain.constants().await.context("get chain constants")?;
    info!(network_id:%, address:%, constants:?; "starting reward pipeline");

    let mut pipeline = RewardPipeline::new(history_depth, constants.era_duration_ms());
    let mut active_era_numbers = pin!(active_era_numbers(active_eras(
        chain,
        constants,
        era_refresh_interval
    )));
    let mut pending = FuturesUnordered::new();

    let resolve = |era, active_era| {
        let resolver = &resolver;
        let address = &address;
        async move {
            let result = resolver.resolve(address, era, active_era).await;
            (era, active_era, result)
        }
    };

    loop {
        select! {
            active_era = active_era_numbers.next() => match active_era {
                Some(Ok(active_era)) => {
                    info!(active_era; "active era changed");
                    for era in pipeline.advance(active_era) {
                        pending.push(resolve(era, active_era));
                    }
                }

                Some(Err(error)) => warn!(
                    error = error.as_chain();
                    "cannot get active era"
                ),

                None => return Ok(()),
            },

            Some((era, requested_under, result)) = pending.next(), if !pending.is_empty() => {
                pipeline.fold(era, requested_under, result);
            }

            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                return Ok(());
            }
        }
    }
}

/// Resolve the rewards of the look-back window ending with the given active era and emit the
/// chart after each resolved era.
pub fn reward_chart<I, W>(
    resolver: RewardResolver<I, W>,
    address: Address,
    active_era: Era,
    history_depth: u32,
    era_duration_ms: u64,
) -> impl Stream<Item = Vec<Option<PerformanceSample>>>
where
    I: RewardSource,
    W: RewardSource,
{
    stream! {
        let mut pipeline = RewardPipeline::new(history_depth, era_duration_ms);

        let mut pending = pipeline
            .advance(active_era)
            .into_iter()
            .map(|era| {
                let resolver = &resolver;
                let address = &address;
                async move { (era, resolver.resolve(address, era, active_era).await) }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some((era, result)) = pending.next().await {
            if let Some(chart) = pipeline.fold(era, active_era, result) {
                yield chart.to_vec();
            }
        }
    }
}

/// Validator snapshots of the given eras; eras which cannot be fetched are logged and skipped.
pub fn historic_validators<C>(
    chain: C,
    eras: impl IntoIterator<Item = Era>,
) -> impl Stream<Item = (Era, Vec<HistoricValidator>)>
where
    C: Chain,
{
    stream::iter(eras)
        .then(move |era| {
            let chain = chain.clone();
            async move { (era, chain.era_validators(era).await) }
        })
        .filter_map(|(era, validators)| {
            let validators = match validators {
                Ok(validators) => Some((era, validators)),

                Err(error) => {
                    warn!(era, error = error.as_chain(); "cannot get validators");
                    None
                }
            };

            ready(validators)
        })
}

/// Snapshots of a single validator in the given eras. Eras in which it was not elected are
/// skipped, as are eras which cannot be fetched, the latter with a warning.
pub fn validator_history<C>(
    chain: C,
    validator: Address,
    eras: impl IntoIterator<Item = Era>,
) -> impl Stream<Item = (Era, HistoricValidator)>
where
    C: Chain,
{
    stream::iter(eras)
        .then(move |era| {
            let chain = chain.clone();
            let validator = validator.clone();
            async move {
                let snapshot = chain.validator_rewards(validator.account_id(), era).await;
                (era, validator, snapshot)
            }
        })
        .filter_map(|(era, validator, snapshot)| {
            let snapshot = match snapshot {
                Ok(snapshot) => snapshot.map(|snapshot| (era, snapshot)),

                Err(error) => {
                    warn!(era, validator:%, error = error.as_chain(); "cannot get validator");
                    None
                }
            };

            ready(snapshot)
        })
}

/// Aggregate the validators over the window of the given config.
pub async fn aggregate_validators<C>(chain: C, config: AggregationConfig) -> Vec<HistoricValidator>
where
    C: Chain,
{
    let AggregationConfig {
        selected_era,
        period,
        ..
    } = config;

    let window_start = selected_era.saturating_sub(period.saturating_sub(1));
    let mut aggregator = HistoricalAggregator::new(config);

    let mut validators = pin!(historic_validators(chain, window_start..=selected_era));
    while let Some((era, validators)) = validators.next().await {
        aggregator.insert_era(era, validators);
    }

    aggregator
        .aggregated()
        .map(|aggregated| aggregated.values().cloned().collect())
        .unwrap_or_default()
}

/// Tracks which eras of the look-back window still need to be resolved and folds resolved eras
/// into the chart.
struct RewardPipeline {
    history_depth: u32,
    era_duration_ms: u64,
    active_era: Era,
    resolved: BTreeSet<Era>,
    chart: ChartAccumulator<PerformanceSample>,
}

impl RewardPipeline {
    fn new(history_depth: u32, era_duration_ms: u64) -> Self {
        Self {
            history_depth,
            era_duration_ms,
            active_era: 0,
            resolved: BTreeSet::new(),
            chart: ChartAccumulator::new(history_depth as usize),
        }
    }

    /// Advance to the given active era and return the eras to be requested: the completed eras of
    /// the window not yet resolved and the active era.
    fn advance(&mut self, active_era: Era) -> Vec<Era> {
        self.active_era = self.active_era.max(active_era);

        let window_start = self
            .active_era
            .saturating_sub(self.history_depth.saturating_sub(1));
        self.resolved.retain(|era| *era >= window_start);

        (window_start..=self.active_era)
            .filter(|era| !self.resolved.contains(era))
            .collect()
    }

    /// Fold the result for the given era, requested while `requested_under` was the active era.
    /// Results for an era which was in progress when requested but has completed since are
    /// discarded; the completed era has been requested again.
    fn fold<E>(
        &mut self,
        era: Era,
        requested_under: Era,
        result: Result<ResolvedRewards, E>,
    ) -> Option<&[Option<PerformanceSample>]>
    where
        E: StdError,
    {
        if era >= requested_under && requested_under < self.active_era {
            debug!(era, requested_under, active_era = self.active_era; "discarding stale result");
            return None;
        }

        match result {
            Ok(resolved) => {
                let sample =
                    PerformanceSample::new(era, resolved.breakdown.as_ref(), self.era_duration_ms);
                if era < self.active_era {
                    self.resolved.insert(era);
                }

                let chart = self.chart.apply(era, sample, self.active_era);
                info!(
                    era,
                    source:% = resolved.source,
                    apy:? = sample.apy,
                    len = chart.len();
                    "reward chart updated"
                );

                Some(chart)
            }

            Err(error) => {
                warn!(era, error = error.as_chain(); "cannot resolve rewards, leaving gap");
                None
            }
        }
    }
}

fn default_history_depth() -> u32 {
    DEFAULT_HISTORY_DEPTH as u32
}

fn default_era_refresh_interval() -> Duration {
    Duration::from_secs(600)
}
