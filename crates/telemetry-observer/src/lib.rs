//! Live-subscription broker: relays newly stored records to clients that
//! previously sent an `OBSERVE` request.

use std::collections::HashMap;

use flux_utils::safe_assert;
use telemetry_protocol::Record;

/// Handle -> subscription-reference mapping. Never blocks, never allocates
/// per-record outside insertion, holds no file handles.
#[derive(Default)]
pub struct Observer {
    subscriptions: HashMap<u64, Record>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the reference record under `handle`. Idempotent
    /// for the same handle.
    pub fn attach(&mut self, reference: Record, handle: u64) {
        self.subscriptions.insert(handle, reference);
    }

    /// Removes the subscription for `handle`.
    ///
    /// Callers must only invoke this for a handle that was previously
    /// `attach`ed (the TCP front-end tracks this per-connection via an
    /// `observerConnected` flag). Detaching an absent handle indicates a
    /// front-end bug, not peer misbehavior.
    pub fn detach(&mut self, handle: u64) {
        let removed = self.subscriptions.remove(&handle);
        safe_assert!(removed.is_some(), "detach of handle {handle} with no subscription");
    }

    /// Tests `stored` against every subscription's reference and invokes
    /// `send(stored, handle)` for each match. All subscriptions are tried
    /// regardless of earlier send failures. Returns the total subscription
    /// count, not the match count.
    pub fn relay(&self, stored: &Record, mut send: impl FnMut(Record, u64) -> i32) -> usize {
        for (&handle, reference) in &self.subscriptions {
            if stored.matches(reference) {
                send(stored.clone(), handle);
            }
        }
        self.subscriptions.len()
    }

    /// Current subscription count, used by tests and diagnostics.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
