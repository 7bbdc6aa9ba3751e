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
//! Exchange source for receiving distributed upstream data.
//!
//! Responsibilities:
//! - Bridges the exchange client's pull API to the pipeline source-operator
//!   contract: split discovery events flow down to the client, buffered pages
//!   flow up one at a time.
//! - The factory is the per-fragment singleton: one fresh client + operator
//!   pair per driver, immutable schema and source id shared, close-once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::ids::PlanNodeId;
use crate::exec::page::{ColumnType, Page};
use crate::exec::pipeline::driver_context::{DriverContext, OperatorContext};
use crate::exec::pipeline::operator::{Operator, SourceOperator};
use crate::exec::pipeline::operator_factory::SourceOperatorFactory;
use crate::exec::pipeline::ready::ReadyHandle;
use crate::exec::split::Split;
use crate::pyrite_logging::debug;
use crate::runtime::exchange_client::ExchangeClient;

/// Builds one fresh exchange client per driver. The supplier closes over the
/// fragment's transport and tuning; the factory shares it across drivers.
pub type ExchangeClientSupplier = Arc<dyn Fn() -> ExchangeClient + Send + Sync>;

/// Factory for exchange source operators that pull and decode remote pages.
pub struct ExchangeSourceFactory {
    name: String,
    operator_id: i32,
    source_id: PlanNodeId,
    schema: Vec<ColumnType>,
    client_supplier: ExchangeClientSupplier,
    closed: AtomicBool,
}

impl ExchangeSourceFactory {
    pub fn new(
        operator_id: i32,
        source_id: PlanNodeId,
        schema: Vec<ColumnType>,
        client_supplier: ExchangeClientSupplier,
    ) -> Self {
        Self {
            name: format!("EXCHANGE_SOURCE (id={source_id})"),
            operator_id,
            source_id,
            schema,
            client_supplier,
            closed: AtomicBool::new(false),
        }
    }
}

impl SourceOperatorFactory for ExchangeSourceFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_id(&self) -> PlanNodeId {
        self.source_id
    }

    fn schema(&self) -> &[ColumnType] {
        &self.schema
    }

    fn create_operator(
        &self,
        driver_context: &DriverContext,
    ) -> Result<Box<dyn SourceOperator>, String> {
        if self.closed.load(Ordering::Acquire) {
            return Err(format!(
                "exchange operator factory is already closed: source_id={}",
                self.source_id
            ));
        }
        let operator_context =
            driver_context.add_operator_context(self.operator_id, "ExchangeSourceOperator");
        let client = (self.client_supplier)();
        client.attach_mem_parent(driver_context.mem_tracker());
        {
            // The client's live status doubles as the operator's observability
            // snapshot.
            let status_client = client.clone();
            operator_context.set_info_supplier(Arc::new(move || {
                serde_json::to_value(status_client.status()).unwrap_or(serde_json::Value::Null)
            }));
        }
        debug!(
            "ExchangeSource created: source_id={} driver_id={}",
            self.source_id,
            driver_context.driver_id()
        );
        Ok(Box::new(ExchangeSourceOperator {
            name: self.name.clone(),
            source_id: self.source_id,
            client,
            operator_context,
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct ExchangeSourceOperator {
    name: String,
    source_id: PlanNodeId,
    client: ExchangeClient,
    operator_context: Arc<OperatorContext>,
}

impl Operator for ExchangeSourceOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn operator_context(&self) -> &Arc<OperatorContext> {
        &self.operator_context
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn add_input(&mut self, _page: Page) -> Result<(), String> {
        Err("exchange source operator does not accept input".to_string())
    }

    fn get_output(&mut self) -> Result<Option<Page>, String> {
        let page = self.client.poll_page();
        if let Some(page) = &page {
            self.operator_context
                .record_generated_input(page.data_size(), page.position_count());
        }
        Ok(page)
    }

    fn is_blocked(&self) -> ReadyHandle {
        self.client.is_blocked()
    }

    fn is_finished(&self) -> bool {
        self.client.is_finished()
    }

    fn finish(&mut self) -> Result<(), String> {
        self.client.close();
        Ok(())
    }
}

impl SourceOperator for ExchangeSourceOperator {
    fn source_id(&self) -> PlanNodeId {
        self.source_id
    }

    fn add_split(&mut self, split: Split) -> Result<(), String> {
        match split {
            Split::Remote(remote) => self.client.add_location(remote.location),
            other @ Split::FileRange(_) => Err(format!(
                "exchange source requires a remote split, got {} ({other})",
                other.kind()
            )),
        }
    }

    fn no_more_splits(&mut self) -> Result<(), String> {
        self.client.no_more_locations();
        Ok(())
    }
}
