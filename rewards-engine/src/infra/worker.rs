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
    AccountId, Address, Era, RewardBreakdown,
    chain::{Chain, Connector},
    source::RewardSource,
};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rewards_common::{domain::NetworkId, error::StdErrorExt};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use thiserror::Error;
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task,
};

/// Config for the background worker.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Config {
    /// Maximum number of chain queries running concurrently; further requests queue.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            queue_size: default_queue_size(),
        }
    }
}

/// A request to the worker, identified by a unique ascending id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRequest {
    pub id: u64,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    SetChain { network_id: NetworkId },
    GetNominatorRewards { address: Address, era: Era },
    GetNominatorActiveValidators { address: Address, era: Era },
}

/// A response of the worker, correlated to its request by id only; responses may arrive in any
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    /// The chain of a `SetChain` request is connected.
    Ready { id: u64 },

    Result {
        id: u64,
        payload: Result<WorkerPayload, String>,
    },
}

impl WorkerResponse {
    pub fn id(&self) -> u64 {
        match self {
            WorkerResponse::Ready { id } | WorkerResponse::Result { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerPayload {
    NominatorRewards(Option<RewardBreakdown>),
    NominatorActiveValidators(Vec<AccountId>),
}

/// Spawn the worker task owning the chain connection. Requests are handled in arrival order;
/// chain queries run concurrently up to `max_in_flight`. The task ends when the request sender is
/// dropped.
pub fn spawn<C>(
    connector: C,
    config: Config,
) -> (mpsc::Sender<WorkerRequest>, mpsc::Receiver<WorkerResponse>)
where
    C: Connector,
{
    let Config {
        max_in_flight,
        queue_size,
    } = config;

    let (request_sender, mut request_receiver) = mpsc::channel::<WorkerRequest>(queue_size);
    let (response_sender, response_receiver) = mpsc::channel(queue_size);

    task::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut chain = None::<C::Chain>;

        while let Some(WorkerRequest { id, kind }) = request_receiver.recv().await {
            debug!(id, kind:?; "worker request received");

            let query = match kind {
                RequestKind::SetChain { network_id } => {
                    let response = match connector.connect(&network_id).await {
                        Ok(connected) => {
                            info!(network_id:%; "worker chain connected");
                            chain = Some(connected);
                            WorkerResponse::Ready { id }
                        }

                        Err(error) => {
                            warn!(
                                network_id:%,
                                error = error.as_chain();
                                "cannot connect worker chain"
                            );
                            WorkerResponse::Result {
                                id,
                                payload: Err(error.as_chain()),
                            }
                        }
                    };

                    let _ = response_sender.send(response).await;
                    continue;
                }

                query => query,
            };

            let Some(chain) = chain.clone() else {
                let response = WorkerResponse::Result {
                    id,
                    payload: Err("no chain selected".to_owned()),
                };
                let _ = response_sender.send(response).await;
                continue;
            };

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let response_sender = response_sender.clone();

            task::spawn(async move {
                let payload = handle_query(&chain, query).await;
                drop(permit);

                let _ = response_sender
                    .send(WorkerResponse::Result { id, payload })
                    .await;
            });
        }

        debug!("worker stopped");
    });

    (request_sender, response_receiver)
}

async fn handle_query<C>(chain: &C, kind: RequestKind) -> Result<WorkerPayload, String>
where
    C: Chain,
{
    match kind {
        RequestKind::GetNominatorRewards { address, era } => chain
            .nominator_rewards(&address, era)
            .await
            .map(WorkerPayload::NominatorRewards)
            .map_err(|error| error.as_chain()),

        RequestKind::GetNominatorActiveValidators { address, era } => chain
            .nominator_active_validators(&address, era)
            .await
            .map(WorkerPayload::NominatorActiveValidators)
            .map_err(|error| error.as_chain()),

        RequestKind::SetChain { .. } => Err("unexpected chain selection".to_owned()),
    }
}

/// Client for the worker, correlating responses to requests by id. Implements [RewardSource].
#[derive(Clone)]
pub struct WorkerClient {
    requests: mpsc::Sender<WorkerRequest>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<WorkerResponse>>>>,
    next_id: Arc<AtomicU64>,
}

impl WorkerClient {
    /// Spawn the worker together with the task dispatching its responses.
    pub fn new<C>(connector: C, config: Config) -> Self
    where
        C: Connector,
    {
        let (requests, mut responses) = spawn(connector, config);
        let pending = Arc::new(Mutex::new(
            HashMap::<u64, oneshot::Sender<WorkerResponse>>::new(),
        ));

        task::spawn({
            let pending = pending.clone();

            async move {
                while let Some(response) = responses.recv().await {
                    let id = response.id();
                    match pending.lock().remove(&id) {
                        Some(sender) => {
                            let _ = sender.send(response);
                        }

                        None => debug!(id; "dropping response for unknown request"),
                    }
                }
            }
        });

        Self {
            requests,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Select the chain to run queries against.
    pub async fn set_chain(&self, network_id: NetworkId) -> Result<(), WorkerError> {
        match self.request(RequestKind::SetChain { network_id }).await? {
            WorkerResponse::Ready { .. } => Ok(()),
            WorkerResponse::Result { payload, .. } => match payload {
                Err(error) => Err(WorkerError::Chain(error)),
                Ok(_) => Err(WorkerError::UnexpectedResponse),
            },
        }
    }

    pub async fn nominator_rewards(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, WorkerError> {
        let kind = RequestKind::GetNominatorRewards {
            address: address.to_owned(),
            era,
        };

        match self.result(kind).await? {
            WorkerPayload::NominatorRewards(rewards) => Ok(rewards),
            _ => Err(WorkerError::UnexpectedResponse),
        }
    }

    pub async fn nominator_active_validators(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Vec<AccountId>, WorkerError> {
        let kind = RequestKind::GetNominatorActiveValidators {
            address: address.to_owned(),
            era,
        };

        match self.result(kind).await? {
            WorkerPayload::NominatorActiveValidators(validators) => Ok(validators),
            _ => Err(WorkerError::UnexpectedResponse),
        }
    }

    async fn result(&self, kind: RequestKind) -> Result<WorkerPayload, WorkerError> {
        match self.request(kind).await? {
            WorkerResponse::Result { payload, .. } => payload.map_err(WorkerError::Chain),
            WorkerResponse::Ready { .. } => Err(WorkerError::UnexpectedResponse),
        }
    }

    async fn request(&self, kind: RequestKind) -> Result<WorkerResponse, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(id, sender);

        if self
            .requests
            .send(WorkerRequest { id, kind })
            .await
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(WorkerError::Disconnected);
        }

        receiver.await.map_err(|_| WorkerError::Disconnected)
    }
}

impl RewardSource for WorkerClient {
    type Error = WorkerError;

    async fn fetch(
        &self,
        address: &Address,
        era: Era,
    ) -> Result<Option<RewardBreakdown>, Self::Error> {
        self.nominator_rewards(address, era).await
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("chain query failed: {0}")]
    Chain(String),

    #[error("worker disconnected")]
    Disconnected,

    #[error("unexpected worker response")]
    UnexpectedResponse,
}

fn default_max_in_flight() -> usize {
    3
}

fn default_queue_size() -> usize {
    64
}
