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
//! Driver-side operator accounting.
//!
//! Responsibilities:
//! - Tracks per-operator output bytes/rows and exposes an observability
//!   snapshot supplier slot; this is the only coupling between the exchange
//!   components and the scheduling framework that owns the drivers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::runtime::mem_tracker::{MemTracker, process_mem_tracker};

/// Supplier of a point-in-time observability snapshot for one operator.
pub type InfoSupplier = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Per-driver context handed to operator factories at operator creation.
pub struct DriverContext {
    driver_id: i32,
    mem_tracker: Arc<MemTracker>,
    operators: Mutex<Vec<Arc<OperatorContext>>>,
}

impl DriverContext {
    pub fn new(driver_id: i32) -> Self {
        let label = format!("driver {driver_id}");
        Self {
            driver_id,
            mem_tracker: MemTracker::new_child(label, &process_mem_tracker()),
            operators: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mem_tracker(driver_id: i32, mem_tracker: Arc<MemTracker>) -> Self {
        Self {
            driver_id,
            mem_tracker,
            operators: Mutex::new(Vec::new()),
        }
    }

    pub fn driver_id(&self) -> i32 {
        self.driver_id
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    /// Register accounting for one operator instance.
    pub fn add_operator_context(
        &self,
        operator_id: i32,
        name: impl Into<String>,
    ) -> Arc<OperatorContext> {
        let ctx = Arc::new(OperatorContext {
            operator_id,
            name: name.into(),
            output_bytes: AtomicU64::new(0),
            output_rows: AtomicU64::new(0),
            info_supplier: Mutex::new(None),
        });
        let mut guard = self.operators.lock().expect("driver operators lock");
        guard.push(Arc::clone(&ctx));
        ctx
    }

    pub fn operator_contexts(&self) -> Vec<Arc<OperatorContext>> {
        let guard = self.operators.lock().expect("driver operators lock");
        guard.clone()
    }
}

/// Accounting context of one operator instance.
pub struct OperatorContext {
    operator_id: i32,
    name: String,
    output_bytes: AtomicU64,
    output_rows: AtomicU64,
    info_supplier: Mutex<Option<InfoSupplier>>,
}

impl OperatorContext {
    pub fn operator_id(&self) -> i32 {
        self.operator_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record one produced page. Observability only; no behavioral effect.
    pub fn record_generated_input(&self, bytes: usize, rows: usize) {
        self.output_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.output_rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn output_bytes(&self) -> u64 {
        self.output_bytes.load(Ordering::Relaxed)
    }

    pub fn output_rows(&self) -> u64 {
        self.output_rows.load(Ordering::Relaxed)
    }

    pub fn set_info_supplier(&self, supplier: InfoSupplier) {
        let mut guard = self.info_supplier.lock().expect("info supplier lock");
        *guard = Some(supplier);
    }

    /// Current observability snapshot, `Null` when no supplier is wired.
    pub fn info(&self) -> serde_json::Value {
        let supplier = {
            let guard = self.info_supplier.lock().expect("info supplier lock");
            guard.clone()
        };
        match supplier {
            Some(supplier) => supplier(),
            None => serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_generated_input_totals() {
        let driver = DriverContext::new(0);
        let ctx = driver.add_operator_context(7, "TestOperator");
        ctx.record_generated_input(100, 10);
        ctx.record_generated_input(50, 5);
        assert_eq!(ctx.output_bytes(), 150);
        assert_eq!(ctx.output_rows(), 15);
        assert_eq!(driver.operator_contexts().len(), 1);
    }

    #[test]
    fn info_supplier_snapshot() {
        let driver = DriverContext::new(1);
        let ctx = driver.add_operator_context(3, "TestOperator");
        assert_eq!(ctx.info(), serde_json::Value::Null);
        ctx.set_info_supplier(Arc::new(|| serde_json::json!({"buffered_pages": 2})));
        assert_eq!(ctx.info()["buffered_pages"], 2);
    }
}
