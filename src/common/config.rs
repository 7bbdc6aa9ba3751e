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
use crate::pyrite_config::config as pyrite_app_config;

pub(crate) fn exchange_buffer_capacity_bytes() -> usize {
    pyrite_app_config()
        .ok()
        .map(|c| c.runtime.exchange_buffer_capacity_bytes)
        .unwrap_or(32 * 1024 * 1024)
}

pub(crate) fn exchange_fetch_retry_max() -> u32 {
    pyrite_app_config()
        .ok()
        .map(|c| c.runtime.exchange_fetch_retry_max)
        .unwrap_or(3)
}

pub(crate) fn exchange_fetch_retry_backoff_ms() -> u64 {
    pyrite_app_config()
        .ok()
        .map(|c| c.runtime.exchange_fetch_retry_backoff_ms)
        .unwrap_or(100)
}

pub(crate) fn data_runtime_worker_threads() -> usize {
    pyrite_app_config()
        .ok()
        .map(|c| c.runtime.data_runtime_worker_threads)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

pub(crate) fn data_runtime_max_blocking_threads() -> usize {
    pyrite_app_config()
        .ok()
        .map(|c| c.runtime.data_runtime_max_blocking_threads)
        .unwrap_or(16)
}
