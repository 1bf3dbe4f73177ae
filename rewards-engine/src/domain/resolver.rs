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
    Address, CacheKey, Era, RequestCache, RewardBreakdown, SourceRouter, Tally,
    source::{RewardSource, Source},
};
use log::{debug, warn};
use metrics::{Counter, counter};
use parking_lot::Mutex;
use rewards_common::error::StdErrorExt;
use std::{error::Error as StdError, sync::Arc, time::Instant};
use thiserror::Error;

/// Rewards of one era together with the source that served them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRewards {
    pub era: Era,
    pub breakdown: Option<RewardBreakdown>,
    pub source: Source,
}

/// Rewards of an era could not be resolved, neither by the indexer (if eligible) nor by the
/// worker after one retry.
#[derive(Debug, Error)]
#[error("cannot resolve rewards for era {era}")]
pub struct ResolveError<E>
where
    E: StdError + 'static,
{
    pub era: Era,
    #[source]
    pub source: Arc<E>,
}

/// Resolves per-era rewards from the indexer if eligible, else or on failure from the worker.
/// Requests are deduplicated per source; results for completed eras are retained.
pub struct RewardResolver<I, W>
where
    I: RewardSource,
    W: RewardSource,
{
    indexer: Option<I>,
    worker: W,
    router: Arc<Mutex<SourceRouter>>,
    indexer_cache: RequestCache<Option<RewardBreakdown>, I::Error>,
    worker_cache: RequestCache<Option<RewardBreakdown>, W::Error>,
    metrics: Metrics,
}

impl<I, W> RewardResolver<I, W>
where
    I: RewardSource,
    W: RewardSource,
{
    pub fn new(indexer: Option<I>, worker: W, router: SourceRouter) -> Self {
        Self {
            indexer,
            worker,
            router: Arc::new(Mutex::new(router)),
            indexer_cache: RequestCache::new(),
            worker_cache: RequestCache::new(),
            metrics: Metrics::default(),
        }
    }

    pub async fn resolve(
        &self,
        address: &Address,
        era: Era,
        active_era: Era,
    ) -> Result<ResolvedRewards, ResolveError<W::Error>> {
        let retain = era < active_era;

        if let Some(indexer) = &self.indexer {
            let source = self.router.lock().route(era, active_era, Instant::now());

            if source == Source::Indexer {
                match self.fetch_indexer(indexer, address, era, retain).await {
                    Ok(breakdown) => {
                        return Ok(ResolvedRewards {
                            era,
                            breakdown,
                            source,
                        });
                    }

                    Err(error) => warn!(
                        address:%,
                        era,
                        error = error.as_chain();
                        "indexer request failed, falling back to worker"
                    ),
                }
            }
        }

        let breakdown = match self.fetch_worker(address, era, retain).await {
            Ok(breakdown) => breakdown,

            Err(error) => {
                debug!(
                    address:%,
                    era,
                    error = error.as_chain();
                    "worker request failed, retrying"
                );

                self.fetch_worker(address, era, retain)
                    .await
                    .map_err(|source| ResolveError { era, source })?
            }
        };

        Ok(ResolvedRewards {
            era,
            breakdown,
            source: Source::Worker,
        })
    }

    /// Indexer successes and failures counted by the circuit breaker.
    pub fn tally(&self) -> Tally {
        self.router.lock().tally()
    }

    async fn fetch_indexer(
        &self,
        indexer: &I,
        address: &Address,
        era: Era,
        retain: bool,
    ) -> Result<Option<RewardBreakdown>, Arc<I::Error>> {
        let fetch = {
            let indexer = indexer.clone();
            let address = address.clone();
            let router = self.router.clone();
            let metrics = self.metrics.clone();

            async move {
                let result = indexer.fetch(&address, era).await;

                match &result {
                    Ok(_) => {
                        metrics.indexer_successes.increment(1);
                        router.lock().record_success();
                    }

                    Err(_) => {
                        metrics.indexer_failures.increment(1);
                        if router.lock().record_failure(Instant::now()) {
                            metrics.breaker_trips.increment(1);
                        }
                    }
                }

                result
            }
        };

        self.indexer_cache
            .get_or_fetch(CacheKey::new(address, era), retain, fetch)
            .await
    }

    async fn fetch_worker(
        &self,
        address: &Address,
        era: Era,
        retain: bool,
    ) -> Result<Option<RewardBreakdown>, Arc<W::Error>> {
        let fetch = {
            let worker = self.worker.clone();
            let address = address.clone();
            let metrics = self.metrics.clone();

            async move {
                let result = worker.fetch(&address, era).await;

                match &result {
                    Ok(_) => metrics.worker_successes.increment(1),
                    Err(_) => metrics.worker_failures.increment(1),
                }

                result
            }
        };

        self.worker_cache
            .get_or_fetch(CacheKey::new(address, era), retain, fetch)
            .await
    }
}

impl<I, W> Clone for RewardResolver<I, W>
where
    I: RewardSource,
    W: RewardSource,
{
    fn clone(&self) -> Self {
        Self {
            indexer: self.indexer.clone(),
            worker: self.worker.clone(),
            router: self.router.clone(),
            indexer_cache: self.indexer_cache.clone(),
            worker_cache: self.worker_cache.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
struct Metrics {
    indexer_successes: Counter,
    indexer_failures: Counter,
    breaker_trips: Counter,
    worker_successes: Counter,
    worker_failures: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            indexer_successes: counter!("rewards_indexer_requests_total", "outcome" => "success"),
            indexer_failures: counter!("rewards_indexer_requests_total", "outcome" => "failure"),
            breaker_trips: counter!("rewards_breaker_trips_total"),
            worker_successes: counter!("rewards_worker_requests_total", "outcome" => "success"),
            worker_failures: counter!("rewards_worker_requests_total", "outcome" => "failure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::{
        AccountId, Address, ChartAccumulator, PerformanceSample, RewardBreakdown, RewardResolver,
        SourceRouter, Tally,
        source::{Source, tests::MockSource},
    };
    use assert_matches::assert_matches;
    use futures::future::join_all;
    use std::time::Duration;

    const ERA_DURATION_MS: u64 = 86_400_000;

    fn address() -> Address {
        Address::from(AccountId::from([1; 32]))
    }

    fn breakdown(total: u128) -> RewardBreakdown {
        RewardBreakdown {
            total,
            active_bond: 1_000_000,
            nominators_share: total,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_indexer_failure_falls_back_to_worker() {
        let indexer = (95..=97)
            .fold(MockSource::default(), |indexer, era| {
                indexer.with_rewards(era, breakdown(era as u128))
            })
            .with_failure(98);
        let worker = MockSource::default()
            .with_rewards(98, breakdown(98))
            .with_rewards(99, breakdown(99));
        let resolver = RewardResolver::new(
            Some(indexer.clone()),
            worker.clone(),
            SourceRouter::default(),
        );

        let address = address();
        let results = join_all((95..=99).map(|era| resolver.resolve(&address, era, 99))).await;

        let mut chart = ChartAccumulator::new(21);
        for result in results {
            let resolved = result.expect("era can be resolved");
            let expected_source = if resolved.era >= 98 {
                Source::Worker
            } else {
                Source::Indexer
            };
            assert_eq!(resolved.source, expected_source);

            let sample =
                PerformanceSample::new(resolved.era, resolved.breakdown.as_ref(), ERA_DURATION_MS);
            chart.apply(resolved.era, sample, 99);
        }

        assert_eq!(chart.result().len(), 5);
        assert!(chart.result().iter().all(Option::is_some));
        assert_eq!(
            resolver.tally(),
            Tally {
                successes: 3,
                fails: 1
            }
        );
        assert_eq!(indexer.calls(98), 1);
        assert_eq!(indexer.calls(99), 0);
        assert_eq!(worker.calls(97), 0);
        assert_eq!(worker.calls(98), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_deduplicated() {
        let indexer = MockSource::default()
            .with_rewards(10, breakdown(10))
            .with_delay(Duration::from_millis(10));
        let resolver = RewardResolver::new(
            Some(indexer.clone()),
            MockSource::default(),
            SourceRouter::default(),
        );

        let address = address();
        let (a, b) = tokio::join!(
            resolver.resolve(&address, 10, 12),
            resolver.resolve(&address, 10, 12)
        );
        assert_eq!(a.ok(), b.ok());
        assert_eq!(indexer.calls(10), 1);
        assert_eq!(resolver.tally().successes, 1);

        // Completed eras are retained.
        let c = resolver.resolve(&address, 10, 12).await;
        assert_matches!(c, Ok(resolved) if resolved.breakdown == Some(breakdown(10)));
        assert_eq!(indexer.calls(10), 1);
    }

    #[tokio::test]
    async fn test_active_era_is_not_retained() {
        let worker = MockSource::default().with_rewards(12, breakdown(1));
        let resolver = RewardResolver::new(
            Some(MockSource::default()),
            worker.clone(),
            SourceRouter::default(),
        );

        let address = address();
        resolver.resolve(&address, 12, 12).await.ok();
        resolver.resolve(&address, 12, 12).await.ok();
        assert_eq!(worker.calls(12), 2);
    }

    #[tokio::test]
    async fn test_worker_retried_once() {
        let worker = MockSource::default()
            .with_rewards(5, breakdown(5))
            .with_failures(5, 1)
            .with_failure(6);
        let resolver =
            RewardResolver::<MockSource, _>::new(None, worker.clone(), SourceRouter::default());

        let address = address();
        let resolved = resolver.resolve(&address, 5, 7).await;
        assert_matches!(
            resolved,
            Ok(resolved) if resolved.source == Source::Worker && resolved.breakdown.is_some()
        );
        assert_eq!(worker.calls(5), 2);

        let resolved = resolver.resolve(&address, 6, 7).await;
        assert_matches!(resolved, Err(error) if error.era == 6);
        assert_eq!(worker.calls(6), 2);
    }

    #[tokio::test]
    async fn test_no_data_is_not_a_failure() {
        let resolver = RewardResolver::new(
            Some(MockSource::default()),
            MockSource::default(),
            SourceRouter::default(),
        );

        let resolved = resolver.resolve(&address(), 3, 7).await;
        assert_matches!(
            resolved,
            Ok(resolved) if resolved.breakdown.is_none() && resolved.source == Source::Indexer
        );
        assert_eq!(resolver.tally().fails, 0);
    }
}
