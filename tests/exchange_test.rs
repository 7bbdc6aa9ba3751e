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
//! Integration tests for the exchange subsystem, driven through the public
//! operator API with a scripted transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::future::BoxFuture;
use url::Url;

use pyrite::exec::operators::{ExchangeClientSupplier, ExchangeSourceFactory};
use pyrite::exec::page::{ColumnType, Page, encode_pages, schema_to_arrow};
use pyrite::exec::pipeline::driver_context::DriverContext;
use pyrite::exec::pipeline::operator::{Operator, SourceOperator};
use pyrite::exec::pipeline::operator_factory::SourceOperatorFactory;
use pyrite::exec::pipeline::ready::wait_ready;
use pyrite::exec::split::{FileRangeSplit, RemoteSplit, Split};
use pyrite::runtime::exchange_client::{ExchangeClient, ExchangeClientOptions};
use pyrite::runtime::transport::{ExchangeTransport, FetchResult};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One scripted answer for a location's next fetch.
enum ScriptStep {
    /// Payload of pages, stream continues.
    Pages(Vec<Page>),
    /// End of stream, empty payload.
    Eos,
    /// Transient transport error.
    Error(String),
    /// Never resolves; released only when the client drops the fetch.
    Hang,
}

/// Transport double: scripted per-location answers plus accounting the tests
/// use to observe fetch issuance and resource release.
struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Vec<ScriptStep>>>,
    outstanding: Arc<AtomicUsize>,
    fetches_started: AtomicUsize,
}

struct OutstandingGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            outstanding: Arc::new(AtomicUsize::new(0)),
            fetches_started: AtomicUsize::new(0),
        })
    }

    fn script(&self, location: &Url, steps: Vec<ScriptStep>) {
        let mut guard = self.scripts.lock().expect("scripts lock");
        // Steps are popped front to back.
        let mut steps = steps;
        steps.reverse();
        guard.insert(location.to_string(), steps);
    }

    fn outstanding_fetches(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn fetches_started(&self) -> usize {
        self.fetches_started.load(Ordering::Acquire)
    }

    fn next_step(&self, location: &Url) -> ScriptStep {
        let mut guard = self.scripts.lock().expect("scripts lock");
        guard
            .get_mut(&location.to_string())
            .and_then(|steps| steps.pop())
            .unwrap_or(ScriptStep::Eos)
    }
}

impl ExchangeTransport for ScriptedTransport {
    fn fetch<'a>(
        &'a self,
        location: &'a Url,
        sequence: i64,
    ) -> BoxFuture<'a, Result<FetchResult, String>> {
        Box::pin(async move {
            self.fetches_started.fetch_add(1, Ordering::AcqRel);
            self.outstanding.fetch_add(1, Ordering::AcqRel);
            let _guard = OutstandingGuard {
                counter: Arc::clone(&self.outstanding),
            };
            match self.next_step(location) {
                ScriptStep::Pages(pages) => Ok(FetchResult {
                    sequence,
                    eos: false,
                    payload: Bytes::from(encode_pages(&pages)?),
                }),
                ScriptStep::Eos => Ok(FetchResult {
                    sequence,
                    eos: true,
                    payload: Bytes::new(),
                }),
                ScriptStep::Error(message) => Err(message),
                ScriptStep::Hang => {
                    futures::future::pending::<()>().await;
                    unreachable!("hung fetch never resolves")
                }
            }
        })
    }
}

fn bigint_page(values: &[i64]) -> Page {
    let schema = schema_to_arrow(&[ColumnType::BigInt]);
    let array = Arc::new(Int64Array::from(values.to_vec())) as ArrayRef;
    let batch = RecordBatch::try_new(schema, vec![array]).expect("build test batch");
    Page::new(batch)
}

fn first_value(page: &Page) -> i64 {
    let column = page
        .batch()
        .column(0)
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("bigint column");
    column.value(0)
}

fn location(index: u32) -> Url {
    Url::parse(&format!("http://10.0.0.{index}:8060/v1/task/{index}/results"))
        .expect("test location url")
}

fn test_options() -> ExchangeClientOptions {
    ExchangeClientOptions {
        buffer_capacity_bytes: 32 * 1024 * 1024,
        fetch_retry_max: 1,
        fetch_retry_backoff: Duration::from_millis(1),
    }
}

fn test_factory(
    transport: &Arc<ScriptedTransport>,
    options: ExchangeClientOptions,
) -> ExchangeSourceFactory {
    pyrite::pyrite_logging::init_with_level("info");
    let transport = Arc::clone(transport) as Arc<dyn ExchangeTransport>;
    let supplier: ExchangeClientSupplier = Arc::new(move || {
        ExchangeClient::new(vec![ColumnType::BigInt], Arc::clone(&transport), options)
    });
    ExchangeSourceFactory::new(0, pyrite::PlanNodeId::new(4), vec![ColumnType::BigInt], supplier)
}

/// Pump the operator like a driver would: poll output, park on the readiness
/// token when nothing is ready, stop once finished.
fn drain_operator(operator: &mut Box<dyn SourceOperator>) -> Vec<Page> {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    let mut pages = Vec::new();
    while !operator.is_finished() {
        assert!(Instant::now() < deadline, "drain timed out");
        match operator.get_output().expect("get_output") {
            Some(page) => pages.push(page),
            None => {
                let blocked = operator.is_blocked();
                wait_ready(&blocked, Duration::from_millis(200));
            }
        }
    }
    pages
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn zero_locations_finishes_immediately() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(0);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    assert!(!operator.is_finished());
    operator.no_more_splits().expect("no more splits");
    assert!(operator.is_blocked().is_ready());
    assert!(operator.get_output().expect("get_output").is_none());
    assert!(operator.is_finished());
    assert_eq!(operator.operator_context().output_rows(), 0);
    assert_eq!(transport.fetches_started(), 0);
}

#[test]
fn single_location_delivers_pages_in_order_and_accounts_rows() {
    let transport = ScriptedTransport::new();
    let loc = location(1);
    transport.script(
        &loc,
        vec![
            ScriptStep::Pages(vec![bigint_page(&[0; 10])]),
            ScriptStep::Pages(vec![bigint_page(&[1; 5])]),
            ScriptStep::Eos,
        ],
    );
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(1);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    operator
        .add_split(Split::Remote(RemoteSplit::new(loc)))
        .expect("add split");
    operator.no_more_splits().expect("no more splits");

    let pages = drain_operator(&mut operator);
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].position_count(), 10);
    assert_eq!(pages[1].position_count(), 5);
    assert_eq!(operator.operator_context().output_rows(), 15);
    assert!(operator.operator_context().output_bytes() > 0);

    // Monotonic drain: finished stays finished.
    assert!(operator.is_finished());
    assert!(operator.get_output().expect("get_output").is_none());
    assert!(operator.is_finished());
}

#[test]
fn pages_preserve_per_location_order_across_interleaving() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(2);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    let location_count = 4u32;
    let pages_per_location = 6i64;
    for i in 0..location_count {
        let loc = location(i + 1);
        let steps = (0..pages_per_location)
            .map(|seq| ScriptStep::Pages(vec![bigint_page(&[i as i64 * 1000 + seq])]))
            .chain(std::iter::once(ScriptStep::Eos))
            .collect();
        transport.script(&loc, steps);
        operator
            .add_split(Split::Remote(RemoteSplit::new(loc)))
            .expect("add split");
    }
    operator.no_more_splits().expect("no more splits");

    let pages = drain_operator(&mut operator);
    assert_eq!(pages.len(), (location_count as i64 * pages_per_location) as usize);

    let mut last_seen: HashMap<i64, i64> = HashMap::new();
    for page in &pages {
        let value = first_value(page);
        let (loc_id, seq) = (value / 1000, value % 1000);
        let previous = last_seen.insert(loc_id, seq);
        if let Some(previous) = previous {
            assert!(
                seq > previous,
                "location {loc_id} delivered page {seq} after {previous}"
            );
        }
    }
    assert_eq!(last_seen.len(), location_count as usize);
}

#[test]
fn failed_location_is_reported_and_does_not_hang_the_drain() {
    let transport = ScriptedTransport::new();
    let bad = location(1);
    let good = location(2);
    // fetch_retry_max = 1: the first error is retried once, the second is
    // terminal.
    transport.script(
        &bad,
        vec![
            ScriptStep::Error("connection refused".to_string()),
            ScriptStep::Error("connection refused".to_string()),
        ],
    );
    transport.script(
        &good,
        vec![ScriptStep::Pages(vec![bigint_page(&[7; 3])]), ScriptStep::Eos],
    );
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(3);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    operator
        .add_split(Split::Remote(RemoteSplit::new(bad.clone())))
        .expect("add split");
    operator
        .add_split(Split::Remote(RemoteSplit::new(good)))
        .expect("add split");
    operator.no_more_splits().expect("no more splits");

    let pages = drain_operator(&mut operator);
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].position_count(), 3);

    let status = operator.operator_context().info();
    assert_eq!(status["failed"], true);
    assert_eq!(status["finished"], true);
    let locations = status["locations"].as_array().expect("locations array");
    assert_eq!(locations.len(), 2);
    let bad_status = locations
        .iter()
        .find(|l| l["location"] == bad.to_string())
        .expect("failed location in status");
    assert_eq!(bad_status["phase"], "failed");
    assert_eq!(bad_status["pages_received"], 0);
    assert!(
        bad_status["error"]
            .as_str()
            .expect("error string")
            .contains("connection refused")
    );
}

#[test]
fn finish_midstream_releases_all_fetch_resources() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(4);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    for i in 0..3u32 {
        let loc = location(i + 1);
        transport.script(&loc, vec![ScriptStep::Hang]);
        operator
            .add_split(Split::Remote(RemoteSplit::new(loc)))
            .expect("add split");
    }

    assert!(wait_until(Duration::from_secs(5), || {
        transport.outstanding_fetches() == 3
    }));

    operator.finish().expect("finish");
    operator.finish().expect("finish is idempotent");
    assert!(operator.is_finished());
    assert!(operator.get_output().expect("get_output").is_none());

    // Cancellation drops the in-flight fetch futures.
    assert!(
        wait_until(Duration::from_secs(5), || {
            transport.outstanding_fetches() == 0
        }),
        "fetch resources still open after finish"
    );
}

#[test]
fn get_output_never_blocks_on_the_network() {
    let transport = ScriptedTransport::new();
    let loc = location(1);
    transport.script(&loc, vec![ScriptStep::Hang]);
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(5);
    let mut operator = factory.create_operator(&driver).expect("create operator");
    operator
        .add_split(Split::Remote(RemoteSplit::new(loc)))
        .expect("add split");

    let start = Instant::now();
    for _ in 0..100 {
        assert!(operator.get_output().expect("get_output").is_none());
    }
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "poll took {:?}",
        start.elapsed()
    );
    assert!(!operator.is_blocked().is_ready());
    operator.finish().expect("finish");
}

#[test]
fn buffer_budget_stalls_fetching_until_the_consumer_drains() {
    let transport = ScriptedTransport::new();
    let loc = location(1);
    transport.script(
        &loc,
        vec![
            ScriptStep::Pages(vec![bigint_page(&[1])]),
            ScriptStep::Pages(vec![bigint_page(&[2])]),
            ScriptStep::Pages(vec![bigint_page(&[3])]),
            ScriptStep::Eos,
        ],
    );
    let mut options = test_options();
    // Any buffered page saturates the budget.
    options.buffer_capacity_bytes = 1;
    let factory = test_factory(&transport, options);
    let driver = DriverContext::new(6);
    let mut operator = factory.create_operator(&driver).expect("create operator");
    operator
        .add_split(Split::Remote(RemoteSplit::new(loc)))
        .expect("add split");
    operator.no_more_splits().expect("no more splits");

    // The first fetch is issued, its page saturates the budget, and the loop
    // must not issue the second fetch until we drain.
    assert!(wait_until(Duration::from_secs(5), || {
        transport.fetches_started() == 1
    }));
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(transport.fetches_started(), 1, "fetch issued past the budget");

    let pages = drain_operator(&mut operator);
    assert_eq!(pages.len(), 3);
    assert_eq!(
        pages.iter().map(first_value).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    // 3 page fetches + the eos answer.
    assert_eq!(transport.fetches_started(), 4);
}

#[test]
fn split_contract_violations_fail_loudly() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(7);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    let err = operator
        .add_split(Split::FileRange(FileRangeSplit {
            path: "/data/part-0".to_string(),
            offset: 0,
            length: 64,
        }))
        .expect_err("non-remote split must fail");
    assert!(err.contains("remote split"), "unexpected error: {err}");

    // The set of producers must be final before completion can be declared;
    // late locations are contract violations too.
    operator.no_more_splits().expect("no more splits");
    let err = operator
        .add_split(Split::Remote(RemoteSplit::new(location(1))))
        .expect_err("split after no_more_splits must fail");
    assert!(err.contains("no more locations"), "unexpected error: {err}");
}

#[test]
fn closed_factory_never_returns_an_operator() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(8);
    factory.close();
    factory.close();
    for _ in 0..3 {
        let err = factory
            .create_operator(&driver)
            .err()
            .expect("closed factory must fail");
        assert!(err.contains("already closed"), "unexpected error: {err}");
    }
}

#[test]
fn duplicate_splits_register_one_location() {
    let transport = ScriptedTransport::new();
    let loc = location(1);
    transport.script(
        &loc,
        vec![ScriptStep::Pages(vec![bigint_page(&[5; 2])]), ScriptStep::Eos],
    );
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(9);
    let mut operator = factory.create_operator(&driver).expect("create operator");
    operator
        .add_split(Split::Remote(RemoteSplit::new(loc.clone())))
        .expect("add split");
    operator
        .add_split(Split::Remote(RemoteSplit::new(loc)))
        .expect("duplicate split is ignored");
    operator.no_more_splits().expect("no more splits");

    let pages = drain_operator(&mut operator);
    assert_eq!(pages.len(), 1);
    let status = operator.operator_context().info();
    assert_eq!(status["locations"].as_array().expect("locations").len(), 1);
}

#[test]
fn many_concurrent_locations_drain_completely() {
    let transport = ScriptedTransport::new();
    let factory = test_factory(&transport, test_options());
    let driver = DriverContext::new(10);
    let mut operator = factory.create_operator(&driver).expect("create operator");

    let location_count = 16u32;
    let pages_per_location = 8i64;
    let rows_per_page = 4usize;
    for i in 0..location_count {
        let loc = location(i + 1);
        let steps = (0..pages_per_location)
            .map(|seq| {
                ScriptStep::Pages(vec![bigint_page(
                    &vec![i as i64 * 1000 + seq; rows_per_page],
                )])
            })
            .chain(std::iter::once(ScriptStep::Eos))
            .collect();
        transport.script(&loc, steps);
        operator
            .add_split(Split::Remote(RemoteSplit::new(loc)))
            .expect("add split");
    }
    operator.no_more_splits().expect("no more splits");

    let pages = drain_operator(&mut operator);
    let expected_pages = (location_count as i64 * pages_per_location) as usize;
    assert_eq!(pages.len(), expected_pages);
    assert_eq!(
        operator.operator_context().output_rows(),
        (expected_pages * rows_per_page) as u64
    );
    assert_eq!(transport.outstanding_fetches(), 0);
}
