//! Connectivity checkers for remote servers and backup destinations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::core::events::{DomainEvent, EventSink};
use crate::core::keys::SshKeypair;
use crate::core::models::{ConnectivityStatus, ReachabilityStatus};
use crate::core::ssh::RemoteShell;
use crate::core::storage::StoreFactory;
use crate::db;

/// Verifies that an S3-compatible destination answers a list-buckets call
/// and keeps its advisory status current.
pub struct DestinationChecker {
    db: Connection,
    stores: Arc<dyn StoreFactory>,
    events: Arc<dyn EventSink>,
}

impl DestinationChecker {
    pub fn new(db: Connection, stores: Arc<dyn StoreFactory>, events: Arc<dyn EventSink>) -> Self {
        Self { db, stores, events }
    }

    /// Returns true iff the destination answered. Non-S3 destinations are a
    /// no-op returning false: no status write, no event. Safe to call
    /// repeatedly; every real check emits its event even when the status is
    /// unchanged.
    pub async fn check(&self, destination_id: &str) -> Result<bool> {
        let destination = db::destinations::get(&self.db, destination_id.to_string()).await?;

        if !destination.kind.is_s3_compatible() {
            debug!(
                destination_id = %destination.id,
                kind = destination.kind.as_str(),
                "skipping reachability check for non-S3 destination"
            );
            return Ok(false);
        }

        db::destinations::update_status(
            &self.db,
            destination.id.clone(),
            ReachabilityStatus::Checking,
        )
        .await?;

        let result = match self.stores.store_for(&destination) {
            Ok(store) => store.check().await,
            Err(e) => Err(e),
        };

        let status = match result {
            Ok(()) => ReachabilityStatus::Reachable,
            Err(e) => {
                error!(
                    destination_id = %destination.id,
                    error = %e,
                    "destination reachability check failed"
                );
                ReachabilityStatus::Unreachable
            }
        };

        db::destinations::update_status(&self.db, destination.id.clone(), status).await?;
        self.events.emit(DomainEvent::ConnectionCheck {
            destination_id: destination.id,
            status,
        });

        Ok(status == ReachabilityStatus::Reachable)
    }
}

/// Probes a remote server with a lightweight SSH connect and records the
/// result. Emits a status-change event only when the status actually moved,
/// so repeated checks of a stable host stay quiet.
pub struct ServerChecker {
    db: Connection,
    shell: Arc<dyn RemoteShell>,
    keypair: SshKeypair,
    connect_timeout: Duration,
    events: Arc<dyn EventSink>,
}

impl ServerChecker {
    pub fn new(
        db: Connection,
        shell: Arc<dyn RemoteShell>,
        keypair: SshKeypair,
        connect_timeout: Duration,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            db,
            shell,
            keypair,
            connect_timeout,
            events,
        }
    }

    pub async fn check(&self, server_id: &str) -> Result<ConnectivityStatus> {
        let server = db::servers::get(&self.db, server_id.to_string()).await?;
        let old = server.connectivity_status;

        let target = self.keypair.target_for(&server, self.connect_timeout);
        let new = match self.shell.connect(&target).await {
            Ok(mut session) => {
                if let Err(e) = session.close().await {
                    warn!(server_id = %server.id, error = %e, "failed to close probe session");
                }
                ConnectivityStatus::Online
            }
            Err(e) => {
                warn!(server_id = %server.id, error = %e, "server connectivity check failed");
                ConnectivityStatus::Offline
            }
        };

        apply_server_status(&self.db, self.events.as_ref(), &server.id, old, new).await?;
        Ok(new)
    }
}

/// Shared by the checker and the runner (which flips server status on
/// connect/disconnect). Writes the status and emits the change event only
/// when old != new.
pub async fn apply_server_status(
    db: &Connection,
    events: &dyn EventSink,
    server_id: &str,
    old: ConnectivityStatus,
    new: ConnectivityStatus,
) -> Result<()> {
    db::servers::update_status(db, server_id.to_string(), new).await?;
    if old != new {
        events.emit(DomainEvent::ConnectivityStatusChanged {
            server_id: server_id.to_string(),
            old,
            new,
        });
    }
    Ok(())
}
