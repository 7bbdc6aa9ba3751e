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
//! Operator factory trait definitions.
//!
//! Responsibilities:
//! - Defines factory contracts used to instantiate operators per driver,
//!   separating plan-time configuration from runtime operator instances.
//! - A factory is owned by the fragment's driver-setup phase and explicitly
//!   retired with `close()` once no further drivers will be created; creating
//!   an operator from a retired factory is a contract violation.

use crate::common::ids::PlanNodeId;
use crate::exec::page::ColumnType;
use crate::exec::pipeline::driver_context::DriverContext;
use crate::exec::pipeline::operator::SourceOperator;

/// Factory contract for source operators at the head of a pipeline.
pub trait SourceOperatorFactory: Send + Sync {
    fn name(&self) -> &str;

    fn source_id(&self) -> PlanNodeId;

    /// Output schema shared by every operator this factory creates.
    fn schema(&self) -> &[ColumnType];

    /// Build a fresh, fully independent operator bound to one driver. Fails
    /// with a contract-violation error once the factory is closed.
    fn create_operator(
        &self,
        driver_context: &DriverContext,
    ) -> Result<Box<dyn SourceOperator>, String>;

    /// Retire the factory. Idempotent; does not affect operators already
    /// created.
    fn close(&self);
}
