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

use crate::domain::{Address, Era};
use derive_more::Display;
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};

/// A fetch shared by all callers asking for the same key while it is in flight (or retained).
pub type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{address}-{era}")]
pub struct CacheKey {
    address: String,
    era: Era,
}

impl CacheKey {
    pub fn new(address: &Address, era: Era) -> Self {
        Self {
            address: address.as_ss58().to_owned(),
            era,
        }
    }
}

/// Deduplicates requests: at most one fetch per key runs at a time and all concurrent callers
/// observe its result, failures included. Failed fetches are evicted once completed, successful
/// ones only if not retained. A caller asking for a retained result never joins a fetch
/// registered as not retained; that fetch is replaced.
pub struct RequestCache<V, E> {
    entries: Arc<Mutex<Entries<V, E>>>,
}

struct Entries<V, E> {
    next_id: u64,
    fetches: HashMap<CacheKey, Entry<V, E>>,
}

struct Entry<V, E> {
    id: u64,
    retain: bool,
    fetch: SharedFetch<V, E>,
}

impl<V, E> RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Entries {
                next_id: 0,
                fetches: HashMap::new(),
            })),
        }
    }

    /// Return the pending or retained fetch for the given key or register the given one. Only
    /// the registered fetch is ever polled.
    pub fn get_or_fetch<F>(&self, key: CacheKey, retain: bool, fetch: F) -> SharedFetch<V, E>
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        let mut entries = self.entries.lock();

        match entries.fetches.get(&key) {
            Some(entry) if entry.retain || !retain => return entry.fetch.clone(),
            _ => {}
        }

        let id = entries.next_id;
        entries.next_id += 1;

        let shared = {
            let entries = self.entries.clone();
            let key = key.clone();

            async move {
                let result = fetch.await.map_err(Arc::new);
                if result.is_err() || !retain {
                    let mut entries = entries.lock();
                    if entries.fetches.get(&key).is_some_and(|entry| entry.id == id) {
                        entries.fetches.remove(&key);
                    }
                }
                result
            }
            .boxed()
            .shared()
        };
        entries.fetches.insert(
            key,
            Entry {
                id,
                retain,
                fetch: shared.clone(),
            },
        );

        shared
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().fetches.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().fetches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().fetches.is_empty()
    }
}

impl<V, E> Clone for RequestCache<V, E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<V, E> Default for RequestCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
