use std::collections::BTreeMap;

/// A call emitted before its target routine had an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    /// Index of the placeholder in the instruction stream.
    pub index: usize,
    /// Start address of the placeholder.
    pub origin: usize,
}

/// Unresolved call sites, queued per routine name in emission order.
#[derive(Debug, Default)]
pub struct PatchTable {
    pending: BTreeMap<String, Vec<PendingCall>>,
}

impl PatchTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, routine: &str, call: PendingCall) {
        self.pending
            .entry(routine.to_string())
            .or_default()
            .push(call);
    }

    /// Removes and returns every call site waiting on `routine`.
    pub fn take(&mut self, routine: &str) -> Vec<PendingCall> {
        self.pending.remove(routine).unwrap_or_default()
    }

    /// Routine names that still have waiting call sites.
    pub fn routines(&self) -> impl Iterator<Item = (&str, &[PendingCall])> {
        self.pending
            .iter()
            .map(|(name, calls)| (name.as_str(), calls.as_slice()))
    }
}
