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
//! Remote transport boundary for the exchange client.
//!
//! The wire protocol lives outside this crate. The exchange client only
//! orchestrates fetch loops around this capability: request the next chunk of
//! bytes from a location, observe end-of-stream, or fail.

use bytes::Bytes;
use futures::future::BoxFuture;
use url::Url;

/// One answered fetch: the raw page payload (possibly empty) and whether the
/// producer has no more data after it.
#[derive(Clone, Debug)]
pub struct FetchResult {
    pub sequence: i64,
    pub eos: bool,
    pub payload: Bytes,
}

/// Black-box capability to pull page payloads from a remote producer.
///
/// `sequence` is the zero-based index of the chunk being requested; the client
/// requests sequences in order per location, so implementations may use it as
/// an acknowledgement cursor. Errors are transient from the client's point of
/// view; the client retries with bounded attempts before declaring the
/// location failed.
pub trait ExchangeTransport: Send + Sync {
    fn fetch<'a>(
        &'a self,
        location: &'a Url,
        sequence: i64,
    ) -> BoxFuture<'a, Result<FetchResult, String>>;
}
