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

use derive_more::{Deref, Display, Into};
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

/// Network identifier, e.g. "polkadot" or "kusama"; selects the chain RPC and indexer URLs.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Deref, Into, Deserialize)]
#[deref(forward)]
#[serde(try_from = "String")]
pub struct NetworkId(pub String);

impl TryFrom<String> for NetworkId {
    type Error = InvalidNetworkIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s.is_empty() {
            Err(InvalidNetworkIdError::Empty)
        } else if s.chars().any(|c| c.is_whitespace()) {
            Err(InvalidNetworkIdError::Whitespace(s))
        } else {
            Ok(Self(s.to_lowercase()))
        }
    }
}

impl TryFrom<&str> for NetworkId {
    type Error = InvalidNetworkIdError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.to_owned().try_into()
    }
}

impl FromStr for NetworkId {
    type Err = InvalidNetworkIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.try_into()
    }
}

#[derive(Debug, Error)]
pub enum InvalidNetworkIdError {
    #[error("network ID must not be empty")]
    Empty,

    #[error("network ID {0:?} must not contain whitespace")]
    Whitespace(String),
}

#[cfg(test)]
mod tests {
    use crate::domain::{InvalidNetworkIdError, NetworkId};
    use assert_matches::assert_matches;

    #[test]
    fn test_network_id() {
        let network_id = "Polkadot".parse::<NetworkId>();
        assert_matches!(network_id, Ok(id) if id.0 == "polkadot");

        let network_id = "".parse::<NetworkId>();
        assert_matches!(network_id, Err(InvalidNetworkIdError::Empty));

        let network_id = "kusama ".parse::<NetworkId>();
        assert_matches!(network_id, Err(InvalidNetworkIdError::Whitespace(_)));
    }

    #[test]
    fn test_network_id_deserialize() {
        let network_id = serde_json::from_str::<NetworkId>(r#""westend""#);
        assert_matches!(network_id, Ok(id) if id.0 == "westend");

        let network_id = serde_json::from_str::<NetworkId>(r#""""#);
        assert!(network_id.is_err());
    }
}
