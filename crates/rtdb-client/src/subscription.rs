// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Subscription bookkeeping for one session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  SubscriptionManager                     │
//! │   by_handle: SubscriptionHandle -> SubscriptionEntry     │
//! │   routes:    server handle      -> SubscriptionHandle    │
//! └──────────────────────────────────────────────────────────┘
//!          │                                   ▲
//!          ▼                                   │ route()
//! ┌──────────────────┐                ┌──────────────────┐
//! │ delivery queue   │ ◄── push() ─── │ pipeline router  │
//! │ (per entry)      │                └──────────────────┘
//! └──────────────────┘
//! ```
//!
//! Subscription handles are allocated locally and never change. The server
//! handle behind a subscription is replaced when a reconnect re-creates it,
//! via [`SubscriptionManager::rebind`].
//!
//! The server may push the first batch for a subscription before the
//! subscribe reply has been processed. While a subscribe is in flight,
//! batches for unknown server handles are parked and replayed into the new
//! entry's queue when it is registered, ahead of anything routed later.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ProtocolError, RtdbError, RtdbResult};
use crate::pipeline::{Delivery, DeliveryQueue};
use crate::types::{ConnectionHandle, SubscribeWhat, SubscriptionHandle, TagId};

// =============================================================================
// Delivery counters
// =============================================================================

/// Counters shared between a subscription entry and its delivery task.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    pub(crate) queued: AtomicU64,
    pub(crate) delivered: AtomicU64,
    pub(crate) errors: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

impl DeliveryCounters {
    /// Items pushed but not yet handed to the sink.
    pub fn backlog(&self) -> u64 {
        let queued = self.queued.load(Ordering::Relaxed);
        let done = self.delivered.load(Ordering::Relaxed)
            + self.errors.load(Ordering::Relaxed)
            + self.discarded.load(Ordering::Relaxed);
        queued.saturating_sub(done)
    }

    /// Batches handed to the sink.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

/// Snapshot of one subscription's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    /// Local handle.
    pub handle: SubscriptionHandle,
    /// Current server handle.
    pub server_handle: u32,
    /// Number of tag ids requested.
    pub tag_count: usize,
    /// Selector bits.
    pub what: u32,
    /// Batches delivered to the sink.
    pub delivered: u64,
    /// Errors delivered to the sink.
    pub errors: u64,
}

// =============================================================================
// SubscriptionEntry
// =============================================================================

/// One active subscription.
pub struct SubscriptionEntry {
    handle: SubscriptionHandle,
    session: ConnectionHandle,
    tag_ids: Arc<[TagId]>,
    what: SubscribeWhat,
    server_handle: AtomicU32,
    positions: HashMap<TagId, Vec<usize>>,
    queue: Mutex<Option<DeliveryQueue>>,
    counters: Arc<DeliveryCounters>,
}

impl SubscriptionEntry {
    /// Creates an entry. The queue feeds the subscription's delivery task.
    pub fn new(
        handle: SubscriptionHandle,
        session: ConnectionHandle,
        tag_ids: &[TagId],
        what: SubscribeWhat,
        server_handle: u32,
        queue: DeliveryQueue,
        counters: Arc<DeliveryCounters>,
    ) -> Self {
        let mut positions: HashMap<TagId, Vec<usize>> = HashMap::new();
        for (index, id) in tag_ids.iter().enumerate() {
            positions.entry(*id).or_default().push(index);
        }

        Self {
            handle,
            session,
            tag_ids: tag_ids.into(),
            what,
            server_handle: AtomicU32::new(server_handle),
            positions,
            queue: Mutex::new(Some(queue)),
            counters,
        }
    }

    /// Returns the local handle.
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Returns the owning session.
    pub fn session(&self) -> ConnectionHandle {
        self.session
    }

    /// Returns the tag ids in caller order.
    pub fn tag_ids(&self) -> &[TagId] {
        &self.tag_ids
    }

    /// Returns the selector.
    pub fn what(&self) -> SubscribeWhat {
        self.what
    }

    /// Returns the current server handle.
    pub fn server_handle(&self) -> u32 {
        self.server_handle.load(Ordering::Acquire)
    }

    /// Returns the delivery counters.
    pub fn counters(&self) -> &Arc<DeliveryCounters> {
        &self.counters
    }

    /// Maps each id of a batch to its index in the caller's list.
    ///
    /// The n-th occurrence of an id in the batch maps to the n-th occurrence
    /// of that id in the caller's list. Ids the caller never asked for, or
    /// extra occurrences, map to `None`.
    pub fn correlate(&self, batch_ids: &[TagId]) -> Vec<Option<usize>> {
        let mut seen: HashMap<TagId, usize> = HashMap::new();
        batch_ids
            .iter()
            .map(|id| {
                let nth = seen.entry(*id).or_insert(0);
                let position = self
                    .positions
                    .get(id)
                    .and_then(|indices| indices.get(*nth).copied());
                *nth += 1;
                position
            })
            .collect()
    }

    /// Queues an item for the sink. Returns `false` once the entry is closed.
    pub fn push(&self, item: Delivery) -> bool {
        let queue = self.queue.lock();
        match queue.as_ref() {
            Some(queue) => {
                if queue.send(item) {
                    self.counters.queued.fetch_add(1, Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Closes the delivery queue. Queued items are discarded; a batch the
    /// sink is already handling completes before `on_closed`.
    pub fn close(&self) {
        if let Some(queue) = self.queue.lock().take() {
            queue.close();
        }
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_none()
    }

    /// Returns a snapshot of this entry.
    pub fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            handle: self.handle,
            server_handle: self.server_handle(),
            tag_count: self.tag_ids.len(),
            what: self.what.bits(),
            delivered: self.counters.delivered(),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn set_server_handle(&self, server_handle: u32) {
        self.server_handle.store(server_handle, Ordering::Release);
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("handle", &self.handle)
            .field("session", &self.session)
            .field("server_handle", &self.server_handle())
            .field("tags", &self.tag_ids.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// =============================================================================
// SubscriptionManager
// =============================================================================

/// Maximum number of batches parked while subscribes are in flight.
const MAX_PARKED: usize = 256;

/// Outcome of routing a batch by server handle.
#[derive(Debug)]
pub enum RouteResult {
    /// The batch belongs to this entry.
    Routed(Arc<SubscriptionEntry>),
    /// Held until an in-flight subscribe registers its handle.
    Parked,
    /// No subscription matches.
    Unrouted,
}

#[derive(Default)]
struct Tables {
    by_handle: HashMap<SubscriptionHandle, Arc<SubscriptionEntry>>,
    routes: HashMap<u32, SubscriptionHandle>,
    parked: Vec<(u32, Bytes)>,
}

/// Tracks the subscriptions of one session.
pub struct SubscriptionManager {
    tables: RwLock<Tables>,
    next_handle: AtomicU32,
    in_flight: AtomicUsize,
}

/// Marks a subscribe request as in flight until dropped.
pub struct InFlightGuard<'a> {
    manager: &'a SubscriptionManager,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.manager.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let mut tables = self.manager.tables.write();
            if self.manager.in_flight.load(Ordering::Acquire) == 0 && !tables.parked.is_empty() {
                debug!(dropped = tables.parked.len(), "Discarding unclaimed parked batches");
                tables.parked.clear();
            }
        }
    }
}

impl SubscriptionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            next_handle: AtomicU32::new(1),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Marks a subscribe as in flight so early batches are parked.
    pub fn begin_subscribe(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { manager: self }
    }

    /// Routes a batch, parking it if a subscribe might still claim it.
    pub fn route_or_park(&self, server_handle: u32, payload: &Bytes) -> RouteResult {
        if let Some(entry) = self.route(server_handle) {
            return RouteResult::Routed(entry);
        }
        if self.in_flight.load(Ordering::Acquire) == 0 {
            return RouteResult::Unrouted;
        }

        let mut tables = self.tables.write();
        if let Some(entry) = tables
            .routes
            .get(&server_handle)
            .and_then(|handle| tables.by_handle.get(handle))
        {
            return RouteResult::Routed(entry.clone());
        }
        if tables.parked.len() >= MAX_PARKED {
            warn!(server_handle, "Parked batch limit reached, dropping batch");
            return RouteResult::Unrouted;
        }
        tables.parked.push((server_handle, payload.clone()));
        RouteResult::Parked
    }

    /// Allocates a handle unique within this manager.
    pub fn allocate_handle(&self) -> SubscriptionHandle {
        loop {
            let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
            let handle = SubscriptionHandle(raw);
            if raw != 0 && !self.tables.read().by_handle.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Registers an entry under its handle and server handle.
    pub fn register(&self, entry: Arc<SubscriptionEntry>) -> RtdbResult<()> {
        self.register_with(entry, |_, _| {})
    }

    /// Registers an entry, first handing parked batches for its server
    /// handle to `replay` while routing is blocked.
    pub fn register_with(
        &self,
        entry: Arc<SubscriptionEntry>,
        replay: impl FnOnce(&SubscriptionEntry, Vec<Bytes>),
    ) -> RtdbResult<()> {
        let mut tables = self.tables.write();
        let server_handle = entry.server_handle();
        if tables.routes.contains_key(&server_handle) {
            return Err(ProtocolError::DuplicateSubscription {
                handle: server_handle,
            }
            .into());
        }
        if tables.by_handle.contains_key(&entry.handle()) {
            return Err(RtdbError::invalid_parameter(
                "handle",
                format!("{} already registered", entry.handle()),
            ));
        }

        debug!(
            session = %entry.session(),
            subscription = %entry.handle(),
            server_handle,
            tags = entry.tag_ids().len(),
            "Subscription registered"
        );
        let parked = take_parked(&mut tables.parked, server_handle);
        replay(&*entry, parked);
        tables.routes.insert(server_handle, entry.handle());
        tables.by_handle.insert(entry.handle(), entry);
        Ok(())
    }

    /// Removes and closes a subscription.
    pub fn remove(&self, handle: SubscriptionHandle) -> RtdbResult<Arc<SubscriptionEntry>> {
        let entry = {
            let mut tables = self.tables.write();
            let entry = tables
                .by_handle
                .remove(&handle)
                .ok_or_else(|| RtdbError::not_found("subscription", handle.get()))?;
            let server_handle = entry.server_handle();
            if tables.routes.get(&server_handle) == Some(&handle) {
                tables.routes.remove(&server_handle);
            }
            entry
        };
        entry.close();
        Ok(entry)
    }

    /// Looks up the entry for a server handle.
    pub fn route(&self, server_handle: u32) -> Option<Arc<SubscriptionEntry>> {
        let tables = self.tables.read();
        tables
            .routes
            .get(&server_handle)
            .and_then(|handle| tables.by_handle.get(handle))
            .cloned()
    }

    /// Looks up an entry by local handle.
    pub fn get(&self, handle: SubscriptionHandle) -> Option<Arc<SubscriptionEntry>> {
        self.tables.read().by_handle.get(&handle).cloned()
    }

    /// Drops every server-handle route. Entries stay registered.
    pub fn detach_routes(&self) {
        self.tables.write().routes.clear();
    }

    /// Points a subscription at a new server handle.
    pub fn rebind(&self, handle: SubscriptionHandle, server_handle: u32) -> RtdbResult<()> {
        self.rebind_with(handle, server_handle, |_, _| {})
    }

    /// Rebinds a subscription, replaying parked batches like
    /// [`register_with`](Self::register_with).
    pub fn rebind_with(
        &self,
        handle: SubscriptionHandle,
        server_handle: u32,
        replay: impl FnOnce(&SubscriptionEntry, Vec<Bytes>),
    ) -> RtdbResult<()> {
        let mut tables = self.tables.write();
        let entry = tables
            .by_handle
            .get(&handle)
            .cloned()
            .ok_or_else(|| RtdbError::not_found("subscription", handle.get()))?;

        if let Some(existing) = tables.routes.get(&server_handle) {
            if *existing != handle {
                return Err(ProtocolError::DuplicateSubscription {
                    handle: server_handle,
                }
                .into());
            }
        }

        let old = entry.server_handle();
        if tables.routes.get(&old) == Some(&handle) {
            tables.routes.remove(&old);
        }
        let parked = take_parked(&mut tables.parked, server_handle);
        replay(&*entry, parked);
        tables.routes.insert(server_handle, handle);
        entry.set_server_handle(server_handle);
        debug!(subscription = %handle, old, new = server_handle, "Subscription rebound");
        Ok(())
    }

    /// Returns every registered entry, ordered by handle.
    pub fn snapshot(&self) -> Vec<Arc<SubscriptionEntry>> {
        let mut entries: Vec<_> = self.tables.read().by_handle.values().cloned().collect();
        entries.sort_by_key(|entry| entry.handle());
        entries
    }

    /// Removes and closes every subscription, returning them.
    pub fn close_all(&self) -> Vec<Arc<SubscriptionEntry>> {
        let entries: Vec<_> = {
            let mut tables = self.tables.write();
            tables.routes.clear();
            tables.parked.clear();
            tables.by_handle.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            entry.close();
        }
        entries
    }

    /// Returns the number of subscriptions.
    pub fn len(&self) -> usize {
        self.tables.read().by_handle.len()
    }

    /// Returns `true` if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn take_parked(parked: &mut Vec<(u32, Bytes)>, server_handle: u32) -> Vec<Bytes> {
    let mut taken = Vec::new();
    parked.retain(|(handle, payload)| {
        if *handle == server_handle {
            taken.push(payload.clone());
            false
        } else {
            true
        }
    });
    taken
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &tables.by_handle.len())
            .field("routes", &tables.routes.len())
            .finish()
    }
}
