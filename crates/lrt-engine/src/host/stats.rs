use std::collections::HashMap;

use crate::types::ResourceKind;

/// Lifecycle bookkeeping kept by the host engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    created: HashMap<ResourceKind, usize>,
    destroyed: HashMap<ResourceKind, usize>,
    /// Destroy calls on a handle that was not alive.
    pub double_destroys: usize,
    /// Parents destroyed while a child that depends on them was alive.
    pub ordering_violations: usize,
    /// Buffers destroyed while the asynchronous run writing them was unfinished.
    pub in_flight_destroys: usize,
    pub locks: usize,
    pub unlocks: usize,
    pub runs: usize,
    pub cancelled_runs: usize,
}

impl HostStats {
    pub(crate) fn record_create(&mut self, kind: ResourceKind) {
        *self.created.entry(kind).or_default() += 1;
    }

    pub(crate) fn record_destroy(&mut self, kind: ResourceKind) {
        *self.destroyed.entry(kind).or_default() += 1;
    }

    pub fn created(&self, kind: ResourceKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: ResourceKind) -> usize {
        self.destroyed.get(&kind).copied().unwrap_or(0)
    }

    /// Resources of `kind` created and not yet destroyed.
    pub fn live(&self, kind: ResourceKind) -> usize {
        self.created(kind).saturating_sub(self.destroyed(kind))
    }

    /// Every resource was destroyed exactly once, in a valid order.
    pub fn is_clean(&self) -> bool {
        ResourceKind::ALL.iter().all(|&k| self.live(k) == 0)
            && self.double_destroys == 0
            && self.ordering_violations == 0
            && self.in_flight_destroys == 0
            && self.locks == self.unlocks
    }
}
