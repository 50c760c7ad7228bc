//! Scripted in-memory shell for tests and `--simulation` mode.
//!
//! The shell doubles as its own controller: tests clone it, script command
//! responses and remote file contents up front, then inspect what the code
//! under test executed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{ByteStream, CommandOutput, RemoteSession, RemoteShell, SshError, SshTarget};

#[derive(Default)]
struct Inner {
    refuse_connect: Mutex<Option<String>>,
    /// Substring-matched scripts, first match wins.
    scripts: Mutex<Vec<(String, CommandOutput)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Bytes served for unscripted `read_file` paths; None makes reads fail.
    default_file: Mutex<Option<Vec<u8>>>,
    connects: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
}

#[derive(Clone)]
pub struct SimulatedShell {
    inner: Arc<Inner>,
}

impl SimulatedShell {
    /// A shell where every connect and every command succeeds.
    pub fn permissive() -> Self {
        let shell = Self {
            inner: Arc::new(Inner::default()),
        };
        *shell.inner.default_file.lock().unwrap() = Some(b"simulated artifact".to_vec());
        shell
    }

    /// Make all connection attempts fail with the given message.
    pub fn refuse_connections(&self, message: &str) {
        *self.inner.refuse_connect.lock().unwrap() = Some(message.to_string());
    }

    /// Script the response for any command containing `needle`.
    pub fn on_command(&self, needle: &str, output: CommandOutput) {
        self.inner
            .scripts
            .lock()
            .unwrap()
            .push((needle.to_string(), output));
    }

    /// Script a non-zero exit for any command containing `needle`.
    pub fn fail_command(&self, needle: &str, stderr: &str) {
        self.on_command(
            needle,
            CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: Some(1),
            },
        );
    }

    pub fn put_remote_file(&self, path: &str, bytes: &[u8]) {
        self.inner
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), bytes.to_vec());
    }

    /// Make reads of unscripted paths fail.
    pub fn fail_unknown_reads(&self) {
        *self.inner.default_file.lock().unwrap() = None;
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.connects.lock().unwrap().len()
    }

    pub fn executed_commands(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteShell for SimulatedShell {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError> {
        self.inner
            .connects
            .lock()
            .unwrap()
            .push(format!("{}@{}:{}", target.username, target.host, target.port));

        if let Some(message) = self.inner.refuse_connect.lock().unwrap().clone() {
            return Err(SshError::ConnectionFailed(message));
        }

        Ok(Box::new(SimulatedSession {
            shell: self.clone(),
            closed: false,
        }))
    }
}

struct SimulatedSession {
    shell: SimulatedShell,
    closed: bool,
}

#[async_trait]
impl RemoteSession for SimulatedSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        if self.closed {
            return Err(SshError::NotConnected);
        }

        self.shell
            .inner
            .executed
            .lock()
            .unwrap()
            .push(command.to_string());

        let scripts = self.shell.inner.scripts.lock().unwrap();
        for (needle, output) in scripts.iter() {
            if command.contains(needle.as_str()) {
                return Ok(output.clone());
            }
        }
        Ok(CommandOutput::ok())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        if self.closed {
            return Err(SshError::NotConnected);
        }

        if let Some(bytes) = self.shell.inner.files.lock().unwrap().get(path) {
            return Ok(bytes.clone());
        }
        match self.shell.inner.default_file.lock().unwrap().clone() {
            Some(bytes) => Ok(bytes),
            None => Err(SshError::Transport(format!("no such file: {path}"))),
        }
    }

    async fn stream_file(&self, path: &str) -> Result<ByteStream, SshError> {
        // Scripted contents arrive as a short chunk sequence so consumers
        // exercise their reassembly path.
        let bytes = self.read_file(path).await?;
        let chunks: Vec<std::io::Result<Vec<u8>>> = bytes
            .chunks(8)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn close(&mut self) -> Result<(), SshError> {
        self.closed = true;
        Ok(())
    }
}
