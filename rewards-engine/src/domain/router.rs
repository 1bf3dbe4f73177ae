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

use crate::domain::{Era, source::Source};
use log::warn;
use serde::Deserialize;
use std::time::{Duration, Instant};

const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
const DEFAULT_FAIL_MARGIN: u32 = 10;

/// Config for the indexer circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BreakerConfig {
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown: Duration,

    #[serde(default = "default_fail_margin")]
    pub fail_margin: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            fail_margin: DEFAULT_FAIL_MARGIN,
        }
    }
}

/// Success and failure counts of indexer requests since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub successes: u32,
    pub fails: u32,
}

/// Decides per era which [Source] serves a request and guards the indexer with a ratio based
/// circuit breaker: once failures exceed successes by more than the fail margin, the indexer is
/// skipped for the cooldown, after which the counters start from zero.
#[derive(Debug, Clone)]
pub struct SourceRouter {
    tally: Tally,
    tripped_until: Option<Instant>,
    config: BreakerConfig,
}

impl SourceRouter {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            tally: Tally::default(),
            tripped_until: None,
            config,
        }
    }

    /// Completed eras go to the indexer unless the breaker is tripped; the active era and later
    /// ones always go to the worker.
    pub fn route(&mut self, era: Era, active_era: Era, now: Instant) -> Source {
        if self.is_tripped(now) {
            return Source::Worker;
        }

        if era < active_era {
            Source::Indexer
        } else {
            Source::Worker
        }
    }

    pub fn record_success(&mut self) {
        self.tally.successes += 1;
    }

    /// Record an indexer failure; returns `true` if this failure tripped the breaker.
    pub fn record_failure(&mut self, now: Instant) -> bool {
        self.tally.fails += 1;

        let tripped = self.tripped_until.is_none()
            && self.tally.fails > self.tally.successes + self.config.fail_margin;
        if tripped {
            warn!(
                successes = self.tally.successes,
                fails = self.tally.fails,
                cooldown:? = self.config.cooldown;
                "indexer circuit breaker tripped"
            );
            self.tripped_until = Some(now + self.config.cooldown);
        }

        tripped
    }

    /// Whether the breaker is tripped at the given time; an expired cooldown resets the counters.
    pub fn is_tripped(&mut self, now: Instant) -> bool {
        match self.tripped_until {
            Some(until) if now >= until => {
                self.tripped_until = None;
                self.tally = Tally::default();
                false
            }

            Some(_) => true,

            None => false,
        }
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }
}

impl Default for SourceRouter {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

fn default_cooldown() -> Duration {
    DEFAULT_COOLDOWN
}

fn default_fail_margin() -> u32 {
    DEFAULT_FAIL_MARGIN
}

#[cfg(test)]
mod tests {
    use crate::domain::{BreakerConfig, SourceRouter, Tally, source::Source};
    use std::time::{Duration, Instant};

    #[test]
    fn test_route_by_era() {
        let mut router = SourceRouter::default();
        let now = Instant::now();

        assert_eq!(router.route(98, 99, now), Source::Indexer);
        assert_eq!(router.route(99, 99, now), Source::Worker);
        assert_eq!(router.route(100, 99, now), Source::Worker);
    }

    #[test]
    fn test_trip_and_cooldown() {
        let mut router = SourceRouter::default();
        let now = Instant::now();

        for _ in 0..10 {
            assert!(!router.record_failure(now));
        }
        assert_eq!(router.route(90, 99, now), Source::Indexer);

        assert!(router.record_failure(now));
        for era in 80..99 {
            assert_eq!(router.route(era, 99, now), Source::Worker);
        }

        // Failures while tripped neither trip again nor extend the cooldown.
        assert!(!router.record_failure(now + Duration::from_secs(30)));
        assert_eq!(
            router.route(90, 99, now + Duration::from_secs(59)),
            Source::Worker
        );

        assert_eq!(
            router.route(90, 99, now + Duration::from_secs(60)),
            Source::Indexer
        );
        assert_eq!(router.tally(), Tally::default());
    }

    #[test]
    fn test_trip_is_relative_to_successes() {
        let mut router = SourceRouter::default();
        let now = Instant::now();

        for _ in 0..5 {
            router.record_success();
        }
        for _ in 0..15 {
            assert!(!router.record_failure(now));
        }
        assert_eq!(router.route(90, 99, now), Source::Indexer);

        assert!(router.record_failure(now));
        assert_eq!(router.route(90, 99, now), Source::Worker);
    }

    #[test]
    fn test_config() {
        let config = serde_json::from_str::<BreakerConfig>(r#"{"cooldown":"2m","fail_margin":3}"#);
        assert_eq!(
            config.ok(),
            Some(BreakerConfig {
                cooldown: Duration::from_secs(120),
                fail_margin: 3
            })
        );

        let config = serde_json::from_str::<BreakerConfig>("{}");
        assert_eq!(config.ok(), Some(BreakerConfig::default()));
    }
}
