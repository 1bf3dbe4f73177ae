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

use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "metrics")]
    pub metrics_config: MetricsConfig,
}

/// Metrics configuration; metrics are exposed in Prometheus format if enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: IpAddr,
    pub port: u16,
}

/// Initialize logging to stdout; the level is taken from the `RUST_LOG` environment variable.
pub fn init_logging() {
    logforth::starter_log::stdout().apply();
}

/// Initialize the Prometheus metrics exporter, if enabled. Must be called within a tokio runtime.
pub fn init_metrics(config: MetricsConfig) {
    let MetricsConfig {
        enabled,
        address,
        port,
    } = config;

    if !enabled {
        return;
    }

    let address = SocketAddr::new(address, port);
    match PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
    {
        Ok(()) => info!(address:%; "metrics exporter listening"),
        Err(error) => warn!(error:%; "cannot install metrics exporter"),
    }
}
