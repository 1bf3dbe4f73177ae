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

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use log::{error, info};
use rewards_common::{config::ConfigExt, telemetry};
use rewards_engine::{
    application,
    config::Config,
    domain::{
        Address, AggregationConfig, Era, HistoricValidator, MovingAverage, RewardResolver,
        SourceRouter,
        chain::{Chain, Connector},
    },
    infra::{self, indexer::IndexerClient, subxt_chain::SubxtConnector, worker::WorkerClient},
};
use std::{panic, pin::pin};
use tokio::signal::unix::{SignalKind, signal};

/// Era-indexed staking rewards and APY engine.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Keep the reward chart of the given address up to date until terminated.
    Rewards { address: Address },

    /// Aggregate the validator snapshots of a window of eras, or list the snapshots of a single
    /// validator in that window.
    Validators {
        /// Only show the snapshots of this validator.
        #[arg(long)]
        address: Option<Address>,

        /// The newest era of the window; defaults to the last completed era.
        #[arg(long)]
        era: Option<Era>,

        #[arg(long, default_value_t = 1)]
        period: u32,

        #[arg(long, default_value_t = MovingAverage::Simple)]
        average: MovingAverage,
    },

    /// List the validators backed by the given address in the given era.
    Nominations { address: Address, era: Era },
}

#[tokio::main]
async fn main() {
    telemetry::init_logging();
    panic::set_hook(Box::new(|panic| error!(panic:%; "process panicked")));

    if let Err(error) = run().await {
        let backtrace = error.backtrace();
        let error = format!("{error:#}");
        error!(error, backtrace:%; "process exited with ERROR");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler can be registered");
    let config = Config::load().context("load configuration")?;
    info!(config:?; "starting");
    let Config {
        application_config,
        infra_config,
        telemetry_config: telemetry::Config { metrics_config },
    } = config;

    telemetry::init_metrics(metrics_config);

    let infra::Config {
        indexer_config,
        chain_config,
        worker_config,
    } = infra_config;
    let network_id = application_config.network_id.clone();
    let connector = SubxtConnector::new(chain_config);

    match cli.command {
        Command::Rewards { address } => {
            let chain = connector
                .connect(&network_id)
                .await
                .context("connect to chain")?;

            let worker = WorkerClient::new(connector, worker_config);
            worker
                .set_chain(network_id.clone())
                .await
                .context("select chain of worker")?;

            let indexer = IndexerClient::for_network(&indexer_config, &network_id)
                .context("create indexer client")?;
            if indexer.is_none() {
                info!(network_id:%; "no indexer configured, all eras are served by the worker");
            }

            let router = SourceRouter::new(application_config.breaker_config);
            let resolver = RewardResolver::new(indexer, worker, router);

            application::run(application_config, address, resolver, chain, sigterm)
                .await
                .context("run reward pipeline")
        }

        Command::Validators {
            address,
            era,
            period,
            average,
        } => {
            let chain = connector
                .connect(&network_id)
                .await
                .context("connect to chain")?;

            let selected_era = match era {
                Some(era) => era,
                None => chain
                    .active_era()
                    .await
                    .context("get active era")?
                    .index
                    .saturating_sub(1),
            };

            if let Some(address) = address {
                let window_start = selected_era.saturating_sub(period.saturating_sub(1));
                let mut history = pin!(application::validator_history(
                    chain,
                    address,
                    window_start..=selected_era
                ));
                while let Some((era, validator)) = history.next().await {
                    print!("era={era} ");
                    print_validator(&validator);
                }

                return Ok(());
            }

            let config = AggregationConfig {
                selected_era,
                period,
                kind: average,
            };

            let validators = application::aggregate_validators(chain, config).await;
            info!(
                selected_era,
                period,
                average:%,
                count = validators.len();
                "validators aggregated"
            );
            for validator in &validators {
                print_validator(validator);
            }

            Ok(())
        }

        Command::Nominations { address, era } => {
            let worker = WorkerClient::new(connector, worker_config);
            worker
                .set_chain(network_id)
                .await
                .context("select chain of worker")?;

            let validators = worker
                .nominator_active_validators(&address, era)
                .await
                .with_context(|| format!("get validators backed by {address} in era {era}"))?;
            for validator in validators {
                println!("{validator}");
            }

            Ok(())
        }
    }
}

fn print_validator(validator: &HistoricValidator) {
    println!(
        "{} points={} reward={} commission={:.2}% blocked={} active_bond={} nominators={}",
        validator.address,
        validator.points,
        validator.reward,
        validator.commission * 100.0,
        validator.blocked,
        validator.active_bond,
        validator.nominator_quantity
    );
}
