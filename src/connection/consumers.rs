//! Reference counting of consumers sharing a connection.

use std::collections::BTreeSet;

use crate::types::ConsumerId;

/// What a registration change means for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The set went from empty to non-empty.
    First,
    /// The set went from non-empty to empty.
    Last,
    /// Nothing that affects the connection.
    Unchanged,
}

/// The set of consumers currently depending on a connection.
#[derive(Debug, Default)]
pub(crate) struct ConsumerSet {
    members: BTreeSet<ConsumerId>,
}

impl ConsumerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    /// Add a consumer. Registering twice is a no-op.
    pub(crate) fn register(&mut self, id: ConsumerId) -> Transition {
        let was_empty = self.members.is_empty();
        if self.members.insert(id) && was_empty {
            Transition::First
        } else {
            Transition::Unchanged
        }
    }

    /// Remove a consumer. Removing an unknown consumer is a no-op.
    pub(crate) fn deregister(&mut self, id: &ConsumerId) -> Transition {
        if self.members.remove(id) && self.members.is_empty() {
            Transition::Last
        } else {
            Transition::Unchanged
        }
    }
}
