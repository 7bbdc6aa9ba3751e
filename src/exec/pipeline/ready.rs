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
//! One-shot readiness tokens for blocked-operator detection.
//!
//! Responsibilities:
//! - Models the handle returned by `Operator::is_blocked`: completed at most
//!   once, pollable, and observable by the external driver scheduler.
//! - An already-ready shared singleton serves the fast path when data is
//!   available at the time of the call, with no per-call allocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

use crate::exec::pipeline::observer::{Observable, Observer};

/// Reference-counted handle to one readiness signal.
pub type ReadyHandle = Arc<ReadySignal>;

/// Readiness primitive completed exactly once.
pub struct ReadySignal {
    ready: AtomicBool,
    observable: Arc<Observable>,
}

impl ReadySignal {
    pub fn new() -> ReadyHandle {
        Arc::new(Self {
            ready: AtomicBool::new(false),
            observable: Arc::new(Observable::new()),
        })
    }

    /// Shared pre-completed handle for the "not blocked" fast path.
    pub fn not_blocked() -> ReadyHandle {
        static NOT_BLOCKED: OnceLock<ReadyHandle> = OnceLock::new();
        Arc::clone(NOT_BLOCKED.get_or_init(|| {
            Arc::new(ReadySignal {
                ready: AtomicBool::new(true),
                observable: Arc::new(Observable::new()),
            })
        }))
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Complete the signal. Observers registered before completion fire once;
    /// later completions are no-ops.
    pub fn set_ready(&self) {
        let prev = self.ready.swap(true, Ordering::AcqRel);
        if !prev {
            let notify = self.observable.defer_notify();
            notify.arm();
        }
    }

    /// Register a callback fired when the signal completes. A signal that is
    /// already ready invokes the callback immediately.
    pub fn add_waiter(&self, observer: Observer) {
        if self.is_ready() {
            observer();
            return;
        }
        self.observable.add_observer(observer);
        // The signal may have completed between the check and the registration;
        // re-deliver so the late observer is not lost.
        if self.is_ready() {
            let notify = self.observable.defer_notify();
            notify.arm();
        }
    }
}

/// Block the calling thread until the handle is ready or the timeout elapses.
/// Returns whether the handle became ready. For callers outside the
/// cooperative scheduler (tests, blocking drains); pipeline drivers use
/// `add_waiter` instead.
pub fn wait_ready(handle: &ReadyHandle, timeout: Duration) -> bool {
    if handle.is_ready() {
        return true;
    }
    let pair = Arc::new((Mutex::new(false), Condvar::new()));
    let pair_clone = Arc::clone(&pair);
    handle.add_waiter(Arc::new(move || {
        let (lock, cv) = &*pair_clone;
        let mut ready = lock.lock().expect("ready wait lock");
        *ready = true;
        cv.notify_all();
    }));
    let (lock, cv) = &*pair;
    let deadline = std::time::Instant::now() + timeout;
    let mut ready = lock.lock().expect("ready wait lock");
    while !*ready {
        if handle.is_ready() {
            return true;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return handle.is_ready();
        }
        let (guard, _) = cv
            .wait_timeout(ready, deadline - now)
            .expect("ready wait");
        ready = guard;
    }
    handle.is_ready()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn not_blocked_is_shared_and_ready() {
        let a = ReadySignal::not_blocked();
        let b = ReadySignal::not_blocked();
        assert!(a.is_ready());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn set_ready_fires_waiters_once() {
        let signal = ReadySignal::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = Arc::clone(&fired);
        signal.add_waiter(Arc::new(move || {
            assert!(!fired_clone.swap(true, Ordering::AcqRel), "fired twice");
        }));
        signal.set_ready();
        signal.set_ready();
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn wait_ready_observes_completion_from_another_thread() {
        let signal = ReadySignal::new();
        let signal_clone = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signal_clone.set_ready();
        });
        assert!(wait_ready(&signal, Duration::from_secs(5)));
        handle.join().expect("join setter");
    }

    #[test]
    fn wait_ready_times_out_when_never_completed() {
        let signal = ReadySignal::new();
        assert!(!wait_ready(&signal, Duration::from_millis(20)));
    }
}
