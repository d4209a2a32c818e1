//! Status fan-out to subscribed listeners.

use std::fmt;

use tokio::sync::mpsc;

use super::state::StatusUpdate;

/// Identifies one status subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An event broadcast by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    Status(StatusUpdate),
    /// The transport was established. Follows the matching status event.
    Connected,
    /// An established transport went away. Follows the matching status event.
    Disconnected,
}

/// Listeners in subscription order.
#[derive(Default)]
pub(crate) struct Listeners {
    entries: Vec<(SubscriptionId, mpsc::UnboundedSender<ConnectionEvent>)>,
}

impl Listeners {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn add(&mut self, id: SubscriptionId, tx: mpsc::UnboundedSender<ConnectionEvent>) {
        self.entries.push((id, tx));
    }

    /// Remove a listener. Returns false if it was not subscribed.
    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    /// Deliver an event to every listener in subscription order.
    ///
    /// Listeners whose receiver has been dropped are pruned.
    pub(crate) fn publish(&mut self, event: ConnectionEvent) {
        self.entries.retain(|(_, tx)| tx.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::state::ConnectionState;

    #[test]
    fn test_publish_in_subscription_order() {
        let mut listeners = Listeners::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        listeners.add(SubscriptionId(1), tx_a);
        listeners.add(SubscriptionId(2), tx_b);

        let status = ConnectionEvent::Status(ConnectionState::Connected.into());
        listeners.publish(status);
        listeners.publish(ConnectionEvent::Connected);

        assert_eq!(rx_a.try_recv().unwrap(), status);
        assert_eq!(rx_a.try_recv().unwrap(), ConnectionEvent::Connected);
        assert_eq!(rx_b.try_recv().unwrap(), status);
        assert_eq!(rx_b.try_recv().unwrap(), ConnectionEvent::Connected);
    }

    #[test]
    fn test_remove_and_prune() {
        let mut listeners = Listeners::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        listeners.add(SubscriptionId(1), tx_a);
        listeners.add(SubscriptionId(2), tx_b);

        assert!(listeners.remove(SubscriptionId(1)));
        assert!(!listeners.remove(SubscriptionId(1)));

        drop(rx_b);
        listeners.publish(ConnectionEvent::Disconnected);
        assert_eq!(listeners.len(), 0);
        assert!(rx_a.try_recv().is_err());
    }
}
