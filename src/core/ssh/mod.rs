//! SSH connectivity layer.
//!
//! The runner and the server checker only ever see the [`RemoteShell`] /
//! [`RemoteSession`] traits; the real transport lives in `russh_shell` and a
//! scripted stand-in in `simulated` for tests and `--simulation` mode.

mod russh_shell;
mod simulated;

pub use russh_shell::RusshShell;
pub use simulated::SimulatedShell;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Chunked remote file contents. Mid-stream failures (a dying session, a
/// non-zero `cat` exit) surface as item errors.
pub type ByteStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

#[derive(Debug, Error)]
pub enum SshError {
    /// Any connect-phase failure: refused, timed out, bad key, auth
    /// rejected. The caller decides whether to retry.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// A command was issued without an established session.
    #[error("not connected")]
    NotConnected,
    /// The session dropped mid-command.
    #[error("ssh transport error: {0}")]
    Transport(String),
}

/// Where and how to connect. Credentials are passed explicitly; the layer
/// never reads key files behind the caller's back.
#[derive(Debug, Clone)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_path: PathBuf,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn ok() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }
}

#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open an authenticated session. Must fail within the target's connect
    /// timeout rather than hang.
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError>;
}

#[async_trait]
pub trait RemoteSession: Send + Sync {
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Read a remote file's raw bytes. For small control reads; artifacts
    /// go through [`RemoteSession::stream_file`].
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError>;

    /// Stream a remote file's bytes without buffering it whole. The stream
    /// owns its channel and stays valid until the session closes.
    async fn stream_file(&self, path: &str) -> Result<ByteStream, SshError>;

    /// Close the session. Further calls return [`SshError::NotConnected`].
    async fn close(&mut self) -> Result<(), SshError>;
}

/// Pick the transport for the configured mode, mirroring how adapters are
/// selected elsewhere in the daemon.
pub fn shell_for(simulation: bool) -> Arc<dyn RemoteShell> {
    if simulation {
        Arc::new(SimulatedShell::permissive())
    } else {
        Arc::new(RusshShell)
    }
}

/// Quote a value for inclusion in a remote `sh` command line.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
