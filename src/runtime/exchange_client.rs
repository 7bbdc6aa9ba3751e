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
//! Exchange client: concurrent non-blocking access to remote page producers.
//!
//! Responsibilities:
//! - Maintains the set of known producer locations and one asynchronous fetch
//!   loop per location on the shared data runtime.
//! - Buffers decoded pages in one FIFO bounded by a byte budget; a loop that
//!   would exceed the budget stalls until the consumer drains, giving
//!   end-to-end flow control back to the remote producer.
//! - Tracks per-location fetch phase and receive counters, detects the drained
//!   terminal state, and completes readiness waiters handed out by
//!   `is_blocked`.
//!
//! Pages from a single location are delivered in the order that location
//! produced them; no ordering holds across locations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, watch};
use url::Url;

use crate::common::config::{
    exchange_buffer_capacity_bytes, exchange_fetch_retry_backoff_ms, exchange_fetch_retry_max,
};
use crate::exec::page::{ColumnType, Page, decode_pages};
use crate::exec::pipeline::ready::{ReadyHandle, ReadySignal};
use crate::pyrite_logging::debug;
use crate::runtime::global_async_runtime::data_runtime_handle;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::transport::ExchangeTransport;

const MAX_BACKOFF_SHIFT: u32 = 8;

/// Tuning knobs for one exchange client, shared by all its fetch loops.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeClientOptions {
    pub buffer_capacity_bytes: usize,
    pub fetch_retry_max: u32,
    pub fetch_retry_backoff: Duration,
}

impl Default for ExchangeClientOptions {
    fn default() -> Self {
        Self {
            buffer_capacity_bytes: exchange_buffer_capacity_bytes(),
            fetch_retry_max: exchange_fetch_retry_max(),
            fetch_retry_backoff: Duration::from_millis(exchange_fetch_retry_backoff_ms()),
        }
    }
}

/// Fetch phase of one producer location.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationPhase {
    Fetching,
    Exhausted,
    Failed,
}

#[derive(Debug)]
struct LocationState {
    phase: LocationPhase,
    requests_received: u64,
    pages_received: u64,
    bytes_received: u64,
    error: Option<String>,
}

impl LocationState {
    fn new() -> Self {
        Self {
            phase: LocationPhase::Fetching,
            requests_received: 0,
            pages_received: 0,
            bytes_received: 0,
            error: None,
        }
    }

    fn is_terminal(&self) -> bool {
        self.phase != LocationPhase::Fetching
    }
}

/// Read-only snapshot of one location for observability.
#[derive(Clone, Debug, Serialize)]
pub struct LocationStatus {
    pub location: String,
    pub phase: LocationPhase,
    pub requests_received: u64,
    pub pages_received: u64,
    pub bytes_received: u64,
    pub error: Option<String>,
}

/// Read-only snapshot of the whole client for observability. No side effects.
#[derive(Clone, Debug, Serialize)]
pub struct ExchangeClientStatus {
    pub buffered_pages: usize,
    pub buffered_bytes: usize,
    pub no_more_locations: bool,
    pub closed: bool,
    pub finished: bool,
    pub failed: bool,
    pub locations: Vec<LocationStatus>,
}

struct ClientState {
    locations: HashMap<Url, LocationState>,
    no_more_locations: bool,
    pages: VecDeque<Page>,
    buffered_bytes: usize,
    closed: bool,
    waiters: Vec<ReadyHandle>,
    mem_tracker: Option<Arc<MemTracker>>,
}

impl ClientState {
    /// Terminal drain: the location set is final, every location reached a
    /// terminal phase, and the buffer is empty. Once true, stays true.
    fn is_drained(&self) -> bool {
        self.no_more_locations
            && self.pages.is_empty()
            && self.locations.values().all(|l| l.is_terminal())
    }

    fn is_finished(&self) -> bool {
        self.closed || self.is_drained()
    }

    fn take_waiters(&mut self) -> Vec<ReadyHandle> {
        std::mem::take(&mut self.waiters)
    }
}

enum BufferSpace {
    Available,
    Full,
    Closed,
}

struct ClientShared {
    mu: Mutex<ClientState>,
    // Wakes fetch loops stalled on the byte budget.
    space_notify: Notify,
    shutdown: watch::Sender<bool>,
    options: ExchangeClientOptions,
}

impl ClientShared {
    fn buffer_space(&self) -> BufferSpace {
        let st = self.mu.lock().expect("exchange client lock");
        if st.closed {
            BufferSpace::Closed
        } else if st.buffered_bytes < self.options.buffer_capacity_bytes {
            BufferSpace::Available
        } else {
            BufferSpace::Full
        }
    }

    /// Append decoded pages from one answered fetch. Returns false once the
    /// client is closed, telling the loop to stop.
    fn append_pages(&self, location: &Url, pages: Vec<Page>, payload_bytes: usize) -> bool {
        let mut woken = Vec::new();
        {
            let mut st = self.mu.lock().expect("exchange client lock");
            if st.closed {
                debug!(
                    "exchange append dropped, client closed: location={} pages={}",
                    location,
                    pages.len()
                );
                return false;
            }
            if let Some(loc) = st.locations.get_mut(location) {
                loc.requests_received += 1;
                loc.pages_received += pages.len() as u64;
                loc.bytes_received += payload_bytes as u64;
            }
            if !pages.is_empty() {
                let added: usize = pages.iter().map(|p| p.data_size()).sum();
                st.buffered_bytes += added;
                if let Some(tracker) = st.mem_tracker.as_ref() {
                    tracker.consume(added as i64);
                }
                st.pages.extend(pages);
                woken = st.take_waiters();
            }
        }
        for waiter in woken {
            waiter.set_ready();
        }
        true
    }

    fn mark_exhausted(&self, location: &Url) {
        let woken = {
            let mut st = self.mu.lock().expect("exchange client lock");
            if st.closed {
                return;
            }
            if let Some(loc) = st.locations.get_mut(location) {
                if loc.phase == LocationPhase::Fetching {
                    loc.phase = LocationPhase::Exhausted;
                }
            }
            debug!("exchange location exhausted: location={}", location);
            if st.is_drained() {
                st.take_waiters()
            } else {
                Vec::new()
            }
        };
        for waiter in woken {
            waiter.set_ready();
        }
    }

    fn mark_failed(&self, location: &Url, error: String) {
        let woken = {
            let mut st = self.mu.lock().expect("exchange client lock");
            if st.closed {
                return;
            }
            if let Some(loc) = st.locations.get_mut(location) {
                loc.phase = LocationPhase::Failed;
                loc.error = Some(error.clone());
            }
            debug!(
                "exchange location FAILED: location={} error={}",
                location, error
            );
            // A terminal failure always satisfies outstanding readiness
            // tokens so the driver can observe the status change.
            st.take_waiters()
        };
        for waiter in woken {
            waiter.set_ready();
        }
    }
}

/// Handle to one exchange endpoint's client.
///
/// Cloning shares the same underlying state; exactly one component (the
/// exchange source operator) holds drain rights, other clones only observe
/// `status()`.
#[derive(Clone)]
pub struct ExchangeClient {
    shared: Arc<ClientShared>,
    transport: Arc<dyn ExchangeTransport>,
    schema: Arc<Vec<ColumnType>>,
}

impl ExchangeClient {
    pub fn new(
        schema: Vec<ColumnType>,
        transport: Arc<dyn ExchangeTransport>,
        options: ExchangeClientOptions,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(ClientShared {
                mu: Mutex::new(ClientState {
                    locations: HashMap::new(),
                    no_more_locations: false,
                    pages: VecDeque::new(),
                    buffered_bytes: 0,
                    closed: false,
                    waiters: Vec::new(),
                    mem_tracker: None,
                }),
                space_notify: Notify::new(),
                shutdown,
                options,
            }),
            transport,
            schema: Arc::new(schema),
        }
    }

    pub fn schema(&self) -> &[ColumnType] {
        &self.schema
    }

    /// Account the buffered pages against a child of `parent`. Idempotent;
    /// pages already buffered are transferred to the new tracker.
    pub fn attach_mem_parent(&self, parent: &Arc<MemTracker>) {
        let mut st = self.shared.mu.lock().expect("exchange client lock");
        if st.mem_tracker.is_some() {
            return;
        }
        let tracker = MemTracker::new_child("exchange client buffer", parent);
        tracker.consume(st.buffered_bytes as i64);
        st.mem_tracker = Some(tracker);
    }

    /// Register a new producer location and start fetching from it.
    ///
    /// The location set is determined incrementally but must be known before
    /// completion can be declared: adding after `no_more_locations()` or after
    /// `close()` is a contract violation. Duplicate locations are ignored.
    pub fn add_location(&self, location: Url) -> Result<(), String> {
        {
            let mut st = self.shared.mu.lock().expect("exchange client lock");
            if st.closed {
                return Err("exchange client is closed".to_string());
            }
            if st.no_more_locations {
                return Err(format!(
                    "no more locations already declared, cannot add {location}"
                ));
            }
            if st.locations.contains_key(&location) {
                debug!("exchange duplicate location ignored: location={}", location);
                return Ok(());
            }
            st.locations.insert(location.clone(), LocationState::new());
        }
        debug!("exchange location added: location={}", location);

        let handle = data_runtime_handle()?;
        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let schema = Arc::clone(&self.schema);
        let shutdown = self.shared.shutdown.subscribe();
        handle.spawn(run_fetch_loop(shared, transport, schema, location, shutdown));
        Ok(())
    }

    /// Declare the location set final. Idempotent.
    pub fn no_more_locations(&self) {
        let woken = {
            let mut st = self.shared.mu.lock().expect("exchange client lock");
            if st.no_more_locations {
                return;
            }
            st.no_more_locations = true;
            debug!(
                "exchange no more locations: known_locations={}",
                st.locations.len()
            );
            if st.is_drained() {
                st.take_waiters()
            } else {
                Vec::new()
            }
        };
        for waiter in woken {
            waiter.set_ready();
        }
    }

    /// Non-blocking FIFO dequeue of the next buffered page.
    ///
    /// Never waits on network I/O. Reaching the drained terminal state closes
    /// the client so fetch resources are released as soon as the last page is
    /// consumed.
    pub fn poll_page(&self) -> Option<Page> {
        let page = {
            let mut st = self.shared.mu.lock().expect("exchange client lock");
            if st.closed {
                return None;
            }
            match st.pages.pop_front() {
                Some(page) => {
                    st.buffered_bytes = st.buffered_bytes.saturating_sub(page.data_size());
                    if let Some(tracker) = st.mem_tracker.as_ref() {
                        tracker.release(page.data_size() as i64);
                    }
                    Some(page)
                }
                None => None,
            }
        };
        match page {
            Some(page) => {
                // Freed budget: unstall fetch loops waiting for space.
                self.shared.space_notify.notify_waiters();
                Some(page)
            }
            None => {
                if self.is_drained() {
                    self.close();
                }
                None
            }
        }
    }

    /// Readiness token for the driver scheduler.
    ///
    /// Already completed when a page is buffered or the client is finished;
    /// otherwise completed by the next page arrival, terminal location
    /// failure, drain completion, or close.
    pub fn is_blocked(&self) -> ReadyHandle {
        let mut st = self.shared.mu.lock().expect("exchange client lock");
        if !st.pages.is_empty() || st.is_finished() {
            return ReadySignal::not_blocked();
        }
        let signal = ReadySignal::new();
        st.waiters.push(Arc::clone(&signal));
        signal
    }

    pub fn is_closed(&self) -> bool {
        self.shared.mu.lock().expect("exchange client lock").closed
    }

    fn is_drained(&self) -> bool {
        self.shared
            .mu
            .lock()
            .expect("exchange client lock")
            .is_drained()
    }

    /// Terminal: drained, or closed explicitly.
    pub fn is_finished(&self) -> bool {
        self.shared
            .mu
            .lock()
            .expect("exchange client lock")
            .is_finished()
    }

    /// Cancel all in-flight fetches, discard buffered pages, mark closed.
    /// Idempotent; safe to call concurrently with polls.
    pub fn close(&self) {
        let woken = {
            let mut st = self.shared.mu.lock().expect("exchange client lock");
            if st.closed {
                return;
            }
            st.closed = true;
            let discarded = st.pages.len();
            if let Some(tracker) = st.mem_tracker.as_ref() {
                tracker.release(st.buffered_bytes as i64);
            }
            st.pages.clear();
            st.buffered_bytes = 0;
            debug!("exchange client closed: discarded_pages={}", discarded);
            st.take_waiters()
        };
        // Ends in-flight transport calls and stalled space waits promptly.
        self.shared.shutdown.send_replace(true);
        self.shared.space_notify.notify_waiters();
        for waiter in woken {
            waiter.set_ready();
        }
    }

    /// Observability snapshot; read-only, no side effects.
    pub fn status(&self) -> ExchangeClientStatus {
        let st = self.shared.mu.lock().expect("exchange client lock");
        let mut locations: Vec<LocationStatus> = st
            .locations
            .iter()
            .map(|(url, loc)| LocationStatus {
                location: url.to_string(),
                phase: loc.phase,
                requests_received: loc.requests_received,
                pages_received: loc.pages_received,
                bytes_received: loc.bytes_received,
                error: loc.error.clone(),
            })
            .collect();
        locations.sort_by(|a, b| a.location.cmp(&b.location));
        ExchangeClientStatus {
            buffered_pages: st.pages.len(),
            buffered_bytes: st.buffered_bytes,
            no_more_locations: st.no_more_locations,
            closed: st.closed,
            finished: st.is_finished(),
            failed: st.locations.values().any(|l| l.phase == LocationPhase::Failed),
            locations,
        }
    }
}

/// Stall until the buffer is under budget. Returns false when the client
/// closed instead.
async fn wait_for_buffer_space(
    shared: &ClientShared,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        match shared.buffer_space() {
            BufferSpace::Available => return true,
            BufferSpace::Closed => return false,
            BufferSpace::Full => {}
        }
        let notified = shared.space_notify.notified();
        // A drain between the check above and the registration would be lost;
        // re-check before parking.
        match shared.buffer_space() {
            BufferSpace::Available => return true,
            BufferSpace::Closed => return false,
            BufferSpace::Full => {}
        }
        tokio::select! {
            _ = notified => {}
            _ = shutdown.wait_for(|closed| *closed) => return false,
        }
    }
}

/// One location's fetch loop: request chunks in sequence, decode, append;
/// retry transient errors with bounded attempts and exponential backoff.
async fn run_fetch_loop(
    shared: Arc<ClientShared>,
    transport: Arc<dyn ExchangeTransport>,
    schema: Arc<Vec<ColumnType>>,
    location: Url,
    mut shutdown: watch::Receiver<bool>,
) {
    let options = shared.options;
    let mut sequence: i64 = 0;
    let mut attempts: u32 = 0;
    loop {
        if !wait_for_buffer_space(&shared, &mut shutdown).await {
            return;
        }

        let outcome = tokio::select! {
            res = transport.fetch(&location, sequence) => res,
            _ = shutdown.wait_for(|closed| *closed) => return,
        };

        match outcome {
            Ok(result) => {
                attempts = 0;
                if result.payload.is_empty() {
                    if !shared.append_pages(&location, Vec::new(), 0) {
                        return;
                    }
                } else {
                    match decode_pages(result.payload.as_ref(), &schema) {
                        Ok(pages) => {
                            if !shared.append_pages(&location, pages, result.payload.len()) {
                                return;
                            }
                        }
                        Err(err) => {
                            // Corrupt payload or schema mismatch is not
                            // retryable; the producer will keep sending the
                            // same bytes.
                            shared.mark_failed(&location, err);
                            return;
                        }
                    }
                }
                sequence += 1;
                if result.eos {
                    shared.mark_exhausted(&location);
                    return;
                }
            }
            Err(err) => {
                attempts += 1;
                if attempts > options.fetch_retry_max {
                    shared.mark_failed(
                        &location,
                        format!("fetch failed after {attempts} attempts: {err}"),
                    );
                    return;
                }
                let backoff =
                    options.fetch_retry_backoff * (1u32 << (attempts - 1).min(MAX_BACKOFF_SHIFT));
                debug!(
                    "exchange fetch retry: location={} sequence={} attempt={} backoff={:?} error={}",
                    location, sequence, attempts, backoff, err
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.wait_for(|closed| *closed) => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::transport::FetchResult;
    use bytes::Bytes;
    use futures::future::BoxFuture;

    struct NeverTransport;

    impl ExchangeTransport for NeverTransport {
        fn fetch<'a>(
            &'a self,
            _location: &'a Url,
            _sequence: i64,
        ) -> BoxFuture<'a, Result<FetchResult, String>> {
            Box::pin(futures::future::pending())
        }
    }

    struct EmptyEosTransport;

    impl ExchangeTransport for EmptyEosTransport {
        fn fetch<'a>(
            &'a self,
            _location: &'a Url,
            sequence: i64,
        ) -> BoxFuture<'a, Result<FetchResult, String>> {
            Box::pin(async move {
                Ok(FetchResult {
                    sequence,
                    eos: true,
                    payload: Bytes::new(),
                })
            })
        }
    }

    fn test_client(transport: Arc<dyn ExchangeTransport>) -> ExchangeClient {
        ExchangeClient::new(
            vec![ColumnType::BigInt],
            transport,
            ExchangeClientOptions {
                buffer_capacity_bytes: 1024 * 1024,
                fetch_retry_max: 0,
                fetch_retry_backoff: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn zero_locations_drains_immediately() {
        let client = test_client(Arc::new(NeverTransport));
        assert!(!client.is_finished());
        client.no_more_locations();
        assert!(client.is_finished());
        assert!(client.is_blocked().is_ready());
        assert!(client.poll_page().is_none());
        // Draining through poll_page closes the client.
        assert!(client.is_closed());
    }

    #[test]
    fn add_location_after_no_more_locations_is_rejected() {
        let client = test_client(Arc::new(NeverTransport));
        client.no_more_locations();
        let err = client
            .add_location(Url::parse("http://10.0.0.1:8060/task/1").expect("url"))
            .expect_err("late location must be rejected");
        assert!(err.contains("no more locations"), "unexpected error: {err}");
    }

    #[test]
    fn add_location_after_close_is_rejected() {
        let client = test_client(Arc::new(NeverTransport));
        client.close();
        let err = client
            .add_location(Url::parse("http://10.0.0.1:8060/task/1").expect("url"))
            .expect_err("closed client must reject locations");
        assert!(err.contains("closed"), "unexpected error: {err}");
    }

    #[test]
    fn duplicate_location_is_ignored() {
        let client = test_client(Arc::new(EmptyEosTransport));
        let location = Url::parse("http://10.0.0.1:8060/task/1").expect("url");
        client.add_location(location.clone()).expect("add");
        client.add_location(location).expect("duplicate add");
        assert_eq!(client.status().locations.len(), 1);
    }

    #[test]
    fn close_races_with_polling() {
        let client = test_client(Arc::new(EmptyEosTransport));
        client
            .add_location(Url::parse("http://10.0.0.1:8060/task/1").expect("url"))
            .expect("add");
        let closer = {
            let client = client.clone();
            std::thread::spawn(move || {
                for _ in 0..8 {
                    client.close();
                }
            })
        };
        for _ in 0..256 {
            let _ = client.poll_page();
            let _ = client.is_blocked();
            let _ = client.status();
        }
        closer.join().expect("join closer");
        assert!(client.is_closed());
        assert!(client.poll_page().is_none());
    }

    #[test]
    fn close_is_idempotent_and_completes_waiters() {
        let client = test_client(Arc::new(NeverTransport));
        let blocked = client.is_blocked();
        assert!(!blocked.is_ready());
        client.close();
        client.close();
        assert!(blocked.is_ready());
        assert!(client.is_closed());
        assert!(client.poll_page().is_none());
    }
}
