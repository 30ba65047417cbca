use airlink_setting::SetOutcome;

/// Dirty flag an owner accumulates while applying a batch of setting changes.
/// Settings never hold it; they report outcomes and the owner records them.
#[derive(Debug, Default)]
pub struct ChangeSet {
    changed: bool,
}

impl ChangeSet {
    pub fn mark(&mut self) {
        self.changed = true;
    }

    pub fn mark_if(&mut self, changed: bool) {
        self.changed |= changed;
    }

    pub fn record(&mut self, outcome: SetOutcome) {
        self.changed |= outcome.changed();
    }

    pub fn is_marked(&self) -> bool {
        self.changed
    }

    /// Returns whether anything changed and clears the flag.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}
