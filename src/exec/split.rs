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
//! Split descriptors assigned to source operators.

use std::fmt;

use url::Url;

/// One upstream producer of exchange pages, addressed by location.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct RemoteSplit {
    pub location: Url,
}

impl RemoteSplit {
    pub fn new(location: Url) -> Self {
        Self { location }
    }
}

/// A local file byte-range consumed by scan operators.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileRangeSplit {
    pub path: String,
    pub offset: u64,
    pub length: u64,
}

/// One unit of input a source operator must consume.
///
/// Closed over the split kinds the engine schedules; each source operator
/// accepts exactly one kind and rejects the others loudly.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Split {
    Remote(RemoteSplit),
    FileRange(FileRangeSplit),
}

impl Split {
    pub fn kind(&self) -> &'static str {
        match self {
            Split::Remote(_) => "remote",
            Split::FileRange(_) => "file_range",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Split::Remote(s) => write!(f, "remote split: {}", s.location),
            Split::FileRange(s) => {
                write!(f, "file range split: {}@{}+{}", s.path, s.offset, s.length)
            }
        }
    }
}
