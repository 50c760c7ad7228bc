//! Domain events emitted by the connectivity checkers and the runner.
//!
//! The core never talks to a UI directly; it pushes events through an
//! injected sink so callers decide what to do with them (log them, forward
//! them over a channel, collect them in tests).

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::core::models::{ConnectivityStatus, ReachabilityStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// Result of one object storage reachability check. Fired on every
    /// check, including repeats that confirm the current status.
    ConnectionCheck {
        destination_id: String,
        status: ReachabilityStatus,
    },
    /// A remote server's connectivity status actually changed. Suppressed
    /// when a check confirms the existing status.
    ConnectivityStatusChanged {
        server_id: String,
        old: ConnectivityStatus,
        new: ConnectivityStatus,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}

/// Forwards events onto an unbounded channel, the daemon's wiring.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DomainEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<DomainEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: DomainEvent) {
        // Receiver gone means the daemon is shutting down; nothing to do.
        let _ = self.tx.send(event);
    }
}

/// Buffers events in memory. Used by the one-shot CLI commands and tests.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<DomainEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: DomainEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_takes_in_order() {
        let sink = CollectingSink::new();
        sink.emit(DomainEvent::ConnectionCheck {
            destination_id: "d1".into(),
            status: ReachabilityStatus::Reachable,
        });
        sink.emit(DomainEvent::ConnectionCheck {
            destination_id: "d2".into(),
            status: ReachabilityStatus::Unreachable,
        });

        let events = sink.take();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            DomainEvent::ConnectionCheck { destination_id, .. } if destination_id == "d1"
        ));
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelSink::new(tx);
        sink.emit(DomainEvent::ConnectivityStatusChanged {
            server_id: "srv".into(),
            old: ConnectivityStatus::Online,
            new: ConnectivityStatus::Offline,
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DomainEvent::ConnectivityStatusChanged { .. }));
    }
}
