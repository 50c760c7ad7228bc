//! russh-backed transport for the SSH connectivity layer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use tokio::net::TcpStream;
use tracing::debug;

use super::{ByteStream, CommandOutput, RemoteSession, RemoteShell, SshError, SshTarget};

pub struct RusshShell;

struct Handler;

#[async_trait]
impl client::Handler for Handler {
    type Error = russh::Error;

    // russh 0.42 hands the handler back by value.
    async fn check_server_key(
        self,
        _server_public_key: &key::PublicKey,
    ) -> Result<(Self, bool), Self::Error> {
        // Host keys are pinned at provisioning time, not here.
        Ok((self, true))
    }
}

#[async_trait]
impl RemoteShell for RusshShell {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(target.connect_timeout),
            ..Default::default()
        });

        let addr = format!("{}:{}", target.host, target.port);
        let stream = tokio::time::timeout(target.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                SshError::ConnectionFailed(format!(
                    "timed out connecting to {} after {}s",
                    addr,
                    target.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| SshError::ConnectionFailed(format!("{addr}: {e}")))?;

        let mut handle = client::connect_stream(config, stream, Handler)
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        let keypair = load_private_key(&target.private_key_path).await?;
        let authenticated = handle
            .authenticate_publickey(&target.username, Arc::new(keypair))
            .await
            .map_err(|e| SshError::ConnectionFailed(e.to_string()))?;

        if !authenticated {
            return Err(SshError::ConnectionFailed(format!(
                "authentication failed for user '{}' on {}",
                target.username, target.host
            )));
        }

        debug!(host = %target.host, port = target.port, "ssh session established");

        Ok(Box::new(RusshSession {
            handle: Some(handle),
            host: target.host.clone(),
        }))
    }
}

struct RusshSession {
    /// None once the session has been closed.
    handle: Option<client::Handle<Handler>>,
    host: String,
}

impl RusshSession {
    async fn exec_raw(&self, command: &str) -> Result<(Vec<u8>, Vec<u8>, Option<u32>), SshError> {
        let handle = self.handle.as_ref().ok_or(SshError::NotConnected)?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => {
                    stdout.extend_from_slice(&data);
                }
                Some(russh::ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status);
                }
                Some(russh::ChannelMsg::Eof) => {}
                Some(russh::ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok((stdout, stderr, exit_code))
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let (stdout, stderr, exit_code) = self.exec_raw(command).await?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SshError> {
        let command = format!("cat {}", super::shell_quote(path));
        let (stdout, stderr, exit_code) = self.exec_raw(&command).await?;
        if exit_code == Some(0) {
            Ok(stdout)
        } else {
            Err(SshError::Transport(format!(
                "failed to read {} on {}: {}",
                path,
                self.host,
                String::from_utf8_lossy(&stderr).trim()
            )))
        }
    }

    async fn stream_file(&self, path: &str) -> Result<ByteStream, SshError> {
        let handle = self.handle.as_ref().ok_or(SshError::NotConnected)?;

        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?;
        let command = format!("cat {}", super::shell_quote(path));
        channel
            .exec(true, command.as_str())
            .await
            .map_err(|e| SshError::Transport(e.to_string()))?;

        // A drain task owns the channel; chunks flow to the consumer over a
        // bounded queue so a slow upload backpressures the read.
        let (tx, rx) = tokio::sync::mpsc::channel::<std::io::Result<Vec<u8>>>(16);
        let path = path.to_string();
        let host = self.host.clone();
        tokio::spawn(async move {
            let mut stderr = Vec::new();
            let mut exit_code = None;
            loop {
                match channel.wait().await {
                    Some(russh::ChannelMsg::Data { data }) => {
                        if tx.send(Ok(data.to_vec())).await.is_err() {
                            return;
                        }
                    }
                    Some(russh::ChannelMsg::ExtendedData { data, ext }) => {
                        if ext == 1 {
                            stderr.extend_from_slice(&data);
                        }
                    }
                    Some(russh::ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(russh::ChannelMsg::Eof) => {}
                    Some(russh::ChannelMsg::Close) | None => break,
                    _ => {}
                }
            }
            if exit_code != Some(0) {
                let error = SshError::Transport(format!(
                    "failed to read {} on {}: {}",
                    path,
                    host,
                    String::from_utf8_lossy(&stderr).trim()
                ));
                let _ = tx.send(Err(std::io::Error::other(error))).await;
            }
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })))
    }

    async fn close(&mut self) -> Result<(), SshError> {
        if let Some(handle) = self.handle.take() {
            handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await
                .map_err(|e| SshError::Transport(e.to_string()))?;
            debug!(host = %self.host, "ssh session closed");
        }
        Ok(())
    }
}

async fn load_private_key(path: &Path) -> Result<key::KeyPair, SshError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        SshError::ConnectionFailed(format!("failed to read key file {}: {e}", path.display()))
    })?;

    russh_keys::decode_secret_key(&content, None).map_err(|e| {
        SshError::ConnectionFailed(format!("failed to decode private key {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    #[tokio::test]
    async fn refused_tcp_connection_maps_to_connection_failed() {
        // Bind then drop a listener to find a port with nothing behind it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let target = SshTarget {
            host: "127.0.0.1".into(),
            port,
            username: "backup".into(),
            private_key_path: PathBuf::from("/nonexistent/id_ed25519"),
            connect_timeout: Duration::from_secs(1),
        };

        let err = RusshShell.connect(&target).await.err().unwrap();
        assert!(matches!(err, SshError::ConnectionFailed(_)));
    }
}
