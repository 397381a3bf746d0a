// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! The request correlation table: maps a pending outbound request id to its
//! expected response shape, with write-time expiry and an observable callback.
//!
//! Expiry is measured from registration (write-time), not from last access -
//! a pending request is by definition looked up at most once (the response
//! removes it), so access-time expiry would never fire before the natural
//! match.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ii_async_utils::HaltHandle;
use ii_logging::error;

use crate::dispatch::ResponseShape;
use crate::error::{Error, Result};
use crate::identifier::Identifier;

/// Default window after which an unanswered request is considered abandoned.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(10 * 60);

/// Default interval between sweeps of the correlation table for expired entries.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Invoked once per entry that expired without a matching response. The default
/// implementation logs at error level, matching spec.md's documented default policy.
pub trait ExpiryCallback: Send + Sync {
    fn on_expired(&self, id: &Identifier, shape: &ResponseShape);
}

struct LoggingExpiryCallback;

impl ExpiryCallback for LoggingExpiryCallback {
    fn on_expired(&self, id: &Identifier, shape: &ResponseShape) {
        error!(
            "pending request {} expired awaiting a {} response",
            id,
            shape.type_name()
        );
    }
}

struct Entry {
    shape: ResponseShape,
    registered_at: Instant,
}

/// Concurrent map from pending request id to expected response shape.
///
/// Backed by `DashMap`, matching the concurrent-cache idiom used elsewhere in the
/// wider codebase: sharded locking gives lock-free reads on disjoint ids, which
/// matters here because every in-flight request on a transport inserts/removes
/// concurrently with the reader and writer workers.
pub struct CorrelationTable {
    entries: Arc<DashMap<Identifier, Entry>>,
    expiry: Duration,
    expired_count: Arc<AtomicUsize>,
    callback: Arc<dyn ExpiryCallback>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::with_expiry(DEFAULT_EXPIRY)
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            expiry,
            expired_count: Arc::new(AtomicUsize::new(0)),
            callback: Arc::new(LoggingExpiryCallback),
        }
    }

    pub fn with_callback(mut self, callback: Arc<dyn ExpiryCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Registers a newly pending outbound request. Errors if `id` is already pending -
    /// a given identifier may be pending at most once concurrently.
    pub fn register(&self, id: Identifier, shape: ResponseShape) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(Error::invalid_argument(format!(
                "request id {} is already pending",
                id
            )));
        }
        self.entries.insert(
            id,
            Entry {
                shape,
                registered_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Looks up and removes the entry for `id`, as happens when its response arrives.
    /// Returns `None` for an unsolicited response (no matching pending id).
    pub fn take(&self, id: &Identifier) -> Option<ResponseShape> {
        self.entries.remove(id).map(|(_, entry)| entry.shape)
    }

    pub fn is_pending(&self, id: &Identifier) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn expired_count(&self) -> usize {
        self.expired_count.load(Ordering::SeqCst)
    }

    /// Removes and reports every entry whose registration is older than the expiry
    /// window. Called by the background sweep task, but exposed directly so tests can
    /// drive it without waiting on the real clock.
    pub fn sweep(&self) {
        let expiry = self.expiry;
        let now = Instant::now();
        let expired: Vec<Identifier> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.value().registered_at) >= expiry)
            .map(|entry| entry.key().clone())
            .collect();

        for id in expired {
            if let Some((id, entry)) = self.entries.remove(&id) {
                self.expired_count.fetch_add(1, Ordering::SeqCst);
                self.callback.on_expired(&id, &entry.shape);
            }
        }
    }

    /// Spawns a background task that calls `sweep()` at `sweep_interval` until the
    /// halt handle's tripwire fires. The table stays usable independently of this task
    /// (e.g. `sweep()` may also be called directly in tests with a virtual clock).
    pub fn spawn_sweeper(self: &Arc<Self>, halt: &HaltHandle, sweep_interval: Duration) {
        let table = self.clone();
        halt.spawn(move |tripwire| async move {
            let mut interval = tokio::time::interval(sweep_interval);
            let mut tripwire = tripwire;
            loop {
                tokio::select! {
                    _ = interval.tick() => table.sweep(),
                    _ = &mut tripwire => break,
                }
            }
        });
    }

    pub fn spawn_default_sweeper(self: &Arc<Self>, halt: &HaltHandle) {
        self.spawn_sweeper(halt, DEFAULT_SWEEP_INTERVAL)
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
