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

use futures::{Stream, StreamExt, future::ready};

/// Projects a stream of results onto a key and only passes on items whose key differs from the
/// key of the last passed `Ok` item. Errors are always passed on and do not reset the last key.
pub fn distinct_ok_by<T, E, K, F>(
    items: impl Stream<Item = Result<T, E>>,
    mut key: F,
) -> impl Stream<Item = Result<K, E>>
where
    K: Clone + PartialEq,
    F: FnMut(&T) -> K,
{
    let mut last = None;

    items.filter_map(move |item| {
        let item = match item {
            Ok(item) => {
                let key = key(&item);
                if last.as_ref() == Some(&key) {
                    None
                } else {
                    last = Some(key.clone());
                    Some(Ok(key))
                }
            }

            Err(error) => Some(Err(error)),
        };

        ready(item)
    })
}

#[cfg(test)]
mod tests {
    use crate::stream::distinct_ok_by;
    use futures::{StreamExt, stream};

    #[tokio::test]
    async fn test_distinct_ok_by() {
        let items = stream::iter(vec![
            Ok::<_, &'static str>((1, "a")),
            Ok((1, "b")),
            Ok((2, "c")),
            Err("error"),
            Ok((2, "d")),
            Ok((3, "e")),
            Ok((1, "f")),
        ]);

        let keys = distinct_ok_by(items, |(key, _)| *key)
            .collect::<Vec<_>>()
            .await;
        assert_eq!(keys, vec![Ok(1), Ok(2), Err("error"), Ok(3), Ok(1)]);
    }
}
