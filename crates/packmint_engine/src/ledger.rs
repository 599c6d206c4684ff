//! # Pack Request Ledger
//!
//! **In-flight pack requests, fulfilled exactly once**
//!
//! ```text
//!            open()                      fulfill() ok
//!   ──────────────────> Pending ─────────────────────────> Fulfilled
//!                          │  ▲
//!              fulfill()   │  │ resolution or mint failed
//!              claims it   ▼  │
//!                       [in flight]
//!
//!   Pending ──expire_stale()──> Expired     (only with a configured TTL)
//! ```
//!
//! A claimed request is invisible to other callbacks until the claiming
//! callback either completes it or gives it back. Duplicate callbacks get
//! `AlreadyFulfilled` (or `FulfillmentInProgress` while the first one is
//! still running) and change nothing.

use alloy_primitives::{Address, U256};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::catalog::ItemId;
use crate::error::{DistributionError, DistributionResult};
use crate::gateway::RandomnessCoordinator;

/// Opaque request identifier issued by the randomness coordinator.
pub type RequestId = U256;

/// Lifecycle state of a pack request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    /// Waiting for the randomness callback.
    Pending,
    /// Resolved and minted. Terminal.
    Fulfilled,
    /// Timed out and refunded. Terminal.
    Expired,
}

/// A pack request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackRequest {
    /// Coordinator-issued id.
    pub id: RequestId,
    /// Who receives the pack.
    pub requester: Address,
    /// Number of slots.
    pub bundle_size: u32,
    /// Lifecycle state.
    pub status: RequestStatus,
    /// Unix seconds at open.
    pub created_at: u64,
    /// Unix seconds at fulfillment or expiry.
    pub closed_at: Option<u64>,
    /// Items minted, one per slot, once fulfilled.
    pub items: Vec<ItemId>,
}

#[derive(Debug)]
struct Entry {
    request: PackRequest,
    in_flight: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    entries: HashMap<RequestId, Entry>,
    pending: usize,
}

/// Tracks pack requests from open to fulfillment.
#[derive(Debug, Default)]
pub struct PackRequestLedger {
    state: Mutex<LedgerState>,
}

impl PackRequestLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the coordinator for `bundle_size` words and records the request
    /// as Pending.
    ///
    /// The caller must already hold an emission reservation for this pack.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::RandomnessUnavailable`] if the
    /// coordinator refuses, or [`DistributionError::DuplicateRequestId`] if it
    /// hands back an id already tracked. Nothing is recorded in either case.
    pub fn open<C: RandomnessCoordinator + ?Sized>(
        &self,
        coordinator: &C,
        requester: Address,
        bundle_size: u32,
        now: u64,
    ) -> DistributionResult<RequestId> {
        let id = coordinator
            .request_randomness(bundle_size)
            .map_err(|e| DistributionError::RandomnessUnavailable(e.reason))?;
        self.register(id, requester, bundle_size, now)?;
        Ok(id)
    }

    /// Records a Pending request under a coordinator-issued id.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::DuplicateRequestId`] if the id is known.
    pub fn register(
        &self,
        id: RequestId,
        requester: Address,
        bundle_size: u32,
        now: u64,
    ) -> DistributionResult<()> {
        let mut state = self.state.lock();
        if state.entries.contains_key(&id) {
            return Err(DistributionError::DuplicateRequestId(id));
        }
        state.entries.insert(
            id,
            Entry {
                request: PackRequest {
                    id,
                    requester,
                    bundle_size,
                    status: RequestStatus::Pending,
                    created_at: now,
                    closed_at: None,
                    items: Vec::new(),
                },
                in_flight: false,
            },
        );
        state.pending += 1;
        Ok(())
    }

    /// Fulfills a Pending request exactly once.
    ///
    /// `resolve` runs with the request claimed and must either resolve and
    /// mint every slot, returning the minted items, or fail having undone
    /// its own effects. On success the request becomes Fulfilled; on failure
    /// it goes back to Pending.
    ///
    /// # Errors
    ///
    /// Returns [`DistributionError::UnknownRequest`],
    /// [`DistributionError::AlreadyFulfilled`],
    /// [`DistributionError::RequestExpired`] or
    /// [`DistributionError::FulfillmentInProgress`] without calling
    /// `resolve`, or whatever `resolve` returned.
    pub fn fulfill<F>(&self, id: RequestId, now: u64, resolve: F) -> DistributionResult<PackRequest>
    where
        F: FnOnce(&PackRequest) -> DistributionResult<Vec<ItemId>>,
    {
        let request = self.claim(id)?;
        match resolve(&request) {
            Ok(items) => self.complete(id, items, now),
            Err(e) => {
                self.unclaim(id);
                Err(e)
            }
        }
    }

    fn claim(&self, id: RequestId) -> DistributionResult<PackRequest> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(DistributionError::UnknownRequest(id))?;
        match entry.request.status {
            RequestStatus::Fulfilled => return Err(DistributionError::AlreadyFulfilled(id)),
            RequestStatus::Expired => return Err(DistributionError::RequestExpired(id)),
            RequestStatus::Pending => {}
        }
        if entry.in_flight {
            return Err(DistributionError::FulfillmentInProgress(id));
        }
        entry.in_flight = true;
        Ok(entry.request.clone())
    }

    fn unclaim(&self, id: RequestId) {
        if let Some(entry) = self.state.lock().entries.get_mut(&id) {
            entry.in_flight = false;
        }
    }

    fn complete(
        &self,
        id: RequestId,
        items: Vec<ItemId>,
        now: u64,
    ) -> DistributionResult<PackRequest> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(&id)
            .ok_or(DistributionError::UnknownRequest(id))?;
        entry.in_flight = false;
        entry.request.status = RequestStatus::Fulfilled;
        entry.request.closed_at = Some(now);
        entry.request.items = items;
        let request = entry.request.clone();
        state.pending -= 1;
        Ok(request)
    }

    /// Expires Pending requests opened at least `ttl_secs` before `now`.
    ///
    /// Requests with a callback in flight are left alone. Returns the
    /// expired ids; the caller refunds their emission.
    pub fn expire_stale(&self, now: u64, ttl_secs: u64) -> Vec<RequestId> {
        let mut state = self.state.lock();
        let mut expired = Vec::new();
        for entry in state.entries.values_mut() {
            let stale = entry.request.created_at.saturating_add(ttl_secs) <= now;
            if entry.request.status == RequestStatus::Pending && !entry.in_flight && stale {
                entry.request.status = RequestStatus::Expired;
                entry.request.closed_at = Some(now);
                expired.push(entry.request.id);
            }
        }
        state.pending -= expired.len();
        expired
    }

    /// Snapshot of one request.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<PackRequest> {
        self.state
            .lock()
            .entries
            .get(&id)
            .map(|entry| entry.request.clone())
    }

    /// All requests opened by one requester, oldest first.
    #[must_use]
    pub fn requests_of(&self, requester: Address) -> Vec<PackRequest> {
        let mut requests: Vec<_> = self
            .state
            .lock()
            .entries
            .values()
            .filter(|entry| entry.request.requester == requester)
            .map(|entry| entry.request.clone())
            .collect();
        requests.sort_by_key(|request| (request.created_at, request.id));
        requests
    }

    /// Requests still waiting for randomness.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending
    }

    /// Total requests ever opened.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if no request was ever opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}
