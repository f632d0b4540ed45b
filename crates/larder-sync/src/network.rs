//! # Network Reachability Monitor
//!
//! Holds the current connectivity state and broadcasts transitions.
//!
//! Platform glue (or a test) feeds observations in with
//! [`NetworkMonitor::set_state`]; the request client and the coordinator read
//! [`NetworkMonitor::current_state`] and subscribe to transitions.
//!
//! ## Transition Events
//! ```text
//! set_state(offline) ──► NetworkEvent { previous: online,  current: offline }
//! set_state(offline) ──► (no event, state unchanged)
//! set_state(online)  ──► NetworkEvent { previous: offline, current: online }
//!                                        └── is_reconnect() == true
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Transition channel capacity. Slow subscribers lag rather than block.
const EVENT_CAPACITY: usize = 16;

// =============================================================================
// Network State
// =============================================================================

/// How the device reaches the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    #[default]
    Unknown,
    None,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Cellular => write!(f, "cellular"),
            ConnectionType::Ethernet => write!(f, "ethernet"),
            ConnectionType::Unknown => write!(f, "unknown"),
            ConnectionType::None => write!(f, "none"),
        }
    }
}

/// Snapshot of connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub connected: bool,
    pub transport: ConnectionType,
}

impl NetworkState {
    pub fn online(transport: ConnectionType) -> Self {
        NetworkState {
            connected: true,
            transport,
        }
    }

    pub fn offline() -> Self {
        NetworkState {
            connected: false,
            transport: ConnectionType::None,
        }
    }
}

/// A connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkEvent {
    pub previous: NetworkState,
    pub current: NetworkState,
}

impl NetworkEvent {
    /// Returns true for a disconnected → connected transition.
    pub fn is_reconnect(&self) -> bool {
        !self.previous.connected && self.current.connected
    }

    /// Returns true for a connected → disconnected transition.
    pub fn is_disconnect(&self) -> bool {
        self.previous.connected && !self.current.connected
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Shared connectivity monitor. Cheap to clone.
#[derive(Clone)]
pub struct NetworkMonitor {
    state_tx: Arc<watch::Sender<NetworkState>>,
    events_tx: broadcast::Sender<NetworkEvent>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkState) -> Self {
        let (state_tx, _) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        NetworkMonitor {
            state_tx: Arc::new(state_tx),
            events_tx,
        }
    }

    /// Monitor that starts connected over an unknown transport.
    pub fn online() -> Self {
        Self::new(NetworkState::online(ConnectionType::Unknown))
    }

    /// Monitor that starts disconnected.
    pub fn offline() -> Self {
        Self::new(NetworkState::offline())
    }

    pub fn current_state(&self) -> NetworkState {
        *self.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.current_state().connected
    }

    /// Records a new observation. Emits an event only if the state changed.
    pub fn set_state(&self, next: NetworkState) {
        let mut previous = next;
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            previous = *state;
            *state = next;
            true
        });

        if changed {
            info!(
                connected = next.connected,
                transport = %next.transport,
                "Network state changed"
            );
            // No subscribers is fine.
            let _ = self.events_tx.send(NetworkEvent {
                previous,
                current: next,
            });
        }
    }

    pub fn set_connected(&self, connected: bool) {
        if connected {
            let transport = match self.current_state().transport {
                ConnectionType::None => ConnectionType::Unknown,
                other => other,
            };
            self.set_state(NetworkState::online(transport));
        } else {
            self.set_state(NetworkState::offline());
        }
    }

    /// Subscribes to transitions that happen after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events_tx.subscribe()
    }

    /// Watches the latest state without transition history.
    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state_tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transitions_are_broadcast_once() {
        let monitor = NetworkMonitor::online();
        let mut events = monitor.subscribe();

        monitor.set_connected(false);
        monitor.set_connected(false);
        monitor.set_state(NetworkState::online(ConnectionType::Wifi));

        let first = events.recv().await.unwrap();
        assert!(first.is_disconnect());

        let second = events.recv().await.unwrap();
        assert!(second.is_reconnect());
        assert_eq!(second.current.transport, ConnectionType::Wifi);

        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_current_state() {
        let monitor = NetworkMonitor::offline();
        assert!(!monitor.is_connected());
        assert_eq!(monitor.current_state().transport, ConnectionType::None);

        monitor.set_connected(true);
        assert!(monitor.is_connected());
        assert_eq!(monitor.current_state().transport, ConnectionType::Unknown);
    }

    #[test]
    fn test_transport_change_while_online_is_not_reconnect() {
        let monitor = NetworkMonitor::new(NetworkState::online(ConnectionType::Wifi));
        let mut events = monitor.subscribe();

        monitor.set_state(NetworkState::online(ConnectionType::Cellular));
        let event = events.try_recv().unwrap();
        assert!(!event.is_reconnect());
        assert!(!event.is_disconnect());
    }
}
