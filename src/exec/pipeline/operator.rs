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
//! Core operator traits and blocking semantics.
//!
//! Responsibilities:
//! - Defines the cooperative execution contract: operators are polled by
//!   driver worker threads and must return promptly; an operator that cannot
//!   produce output without waiting hands back a readiness token instead of
//!   blocking the thread.
//! - Used by drivers to orchestrate operator execution steps; the driver
//!   parks on the token from `is_blocked` and re-polls when it completes.

use std::sync::Arc;

use crate::common::ids::PlanNodeId;
use crate::exec::page::Page;
use crate::exec::pipeline::driver_context::OperatorContext;
use crate::exec::pipeline::ready::{ReadyHandle, ReadySignal};
use crate::exec::split::Split;

/// Base operator contract implemented by pipeline operator implementations.
///
/// No method may block the calling thread on I/O; all network waiting happens
/// on internal asynchronous loops, surfaced only through `is_blocked`.
pub trait Operator: Send {
    fn name(&self) -> &str;

    fn operator_context(&self) -> &Arc<OperatorContext>;

    /// Whether the operator can currently accept a pushed input page.
    fn needs_input(&self) -> bool;

    /// Push one input page. Source operators never accept input and must fail
    /// loudly, never silently ignore.
    fn add_input(&mut self, page: Page) -> Result<(), String>;

    /// Non-blocking poll for the next output page.
    fn get_output(&mut self) -> Result<Option<Page>, String>;

    /// Readiness token: already completed when the operator can make progress
    /// right now, otherwise completed the moment it can.
    fn is_blocked(&self) -> ReadyHandle {
        ReadySignal::not_blocked()
    }

    fn is_finished(&self) -> bool;

    /// Stop producing output and release resources. Idempotent; callable from
    /// any state, including concurrently with in-flight polls.
    fn finish(&mut self) -> Result<(), String>;
}

/// Extended contract for operators at the head of a pipeline that consume
/// scheduler-assigned splits instead of locally pushed pages.
pub trait SourceOperator: Operator {
    /// The plan node this operator instance services; the driver routes
    /// split-assignment events by this id.
    fn source_id(&self) -> PlanNodeId;

    fn add_split(&mut self, split: Split) -> Result<(), String>;

    fn no_more_splits(&mut self) -> Result<(), String>;
}
