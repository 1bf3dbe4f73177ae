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

pub mod chain;
pub mod source;

mod apy;
mod cache;
mod chart;
mod era;
mod historic;
mod resolver;
mod rewards;
mod router;

pub use apy::*;
pub use cache::*;
pub use chart::*;
pub use era::*;
pub use historic::*;
pub use resolver::*;
pub use rewards::*;
pub use router::*;
