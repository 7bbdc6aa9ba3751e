// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Exchange subsystem of the pyrite execution engine.
//!
//! A query plan is split into fragments scheduled as distributed tasks; pages
//! produced by an upstream fragment are pulled across the network into the
//! local pipeline by the exchange source operator and its client. This crate
//! contains that subsystem: the page/split/schema value model, the exchange
//! client and operator, the cooperative source-operator contracts they
//! implement, and the debug plan-graph renderer.

pub mod common;
pub mod exec;
pub mod plan;
pub mod runtime;

// Folder layout mirrors the BE tree, with `pyrite_*` convenience aliases.
pub use common::app_config as pyrite_config;
pub use common::logging as pyrite_logging;

pub use common::ids::PlanNodeId;
pub use exec::page::{ColumnType, Page};
pub use exec::split::{RemoteSplit, Split};
pub use runtime::exchange_client::{ExchangeClient, ExchangeClientOptions};
pub use runtime::transport::{ExchangeTransport, FetchResult};
