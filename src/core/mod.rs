pub mod checks;
pub mod events;
pub mod keys;
pub mod models;
pub mod notifications;
pub mod retry;
pub mod runner;
pub mod schedule;
pub mod ssh;
pub mod storage;
pub mod strategy;

pub use checks::{DestinationChecker, ServerChecker};
pub use events::{ChannelSink, CollectingSink, DomainEvent, EventSink};
pub use keys::{SshKeyService, SshKeypair};
pub use models::{BackupDestination, BackupTask, BackupTaskLog, RemoteServer};
pub use retry::RetryPolicy;
pub use runner::{RunReport, RunState, TaskRunner};
