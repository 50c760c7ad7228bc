//! Process-wide SSH keypair handling.
//!
//! The keypair is loaded from explicit, configured paths and passed into
//! the connectivity layer; nothing reads key files ambiently. The key
//! service installs the public key on new servers and strips it from each
//! server's authorized_keys when the pair is rotated or deleted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::core::models::RemoteServer;
use crate::core::ssh::{shell_quote, RemoteShell, SshTarget};

#[derive(Debug, Clone)]
pub struct SshKeypair {
    pub private_key_path: PathBuf,
    pub public_key_path: PathBuf,
}

impl SshKeypair {
    pub fn new(private_key_path: PathBuf, public_key_path: PathBuf) -> Self {
        Self {
            private_key_path,
            public_key_path,
        }
    }

    /// The public key line as it appears in authorized_keys.
    pub async fn public_key(&self) -> Result<String> {
        let raw = tokio::fs::read_to_string(&self.public_key_path)
            .await
            .with_context(|| {
                format!("Failed to read public key {}", self.public_key_path.display())
            })?;
        let key = raw.trim();
        if key.is_empty() {
            bail!("public key file {} is empty", self.public_key_path.display());
        }
        Ok(key.to_string())
    }

    pub fn target_for(&self, server: &RemoteServer, connect_timeout: Duration) -> SshTarget {
        SshTarget {
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
            private_key_path: self.private_key_path.clone(),
            connect_timeout,
        }
    }
}

/// Installs and removes our public key in remote authorized_keys files.
pub struct SshKeyService {
    shell: Arc<dyn RemoteShell>,
    keypair: SshKeypair,
    connect_timeout: Duration,
}

impl SshKeyService {
    pub fn new(shell: Arc<dyn RemoteShell>, keypair: SshKeypair, connect_timeout: Duration) -> Self {
        Self {
            shell,
            keypair,
            connect_timeout,
        }
    }

    /// Append the public key to the server's authorized_keys. Idempotent;
    /// a key that is already present is left alone.
    pub async fn provision_on(&self, server: &RemoteServer) -> Result<()> {
        let public_key = self.keypair.public_key().await?;
        let target = self.keypair.target_for(server, self.connect_timeout);
        let mut session = self
            .shell
            .connect(&target)
            .await
            .with_context(|| format!("Failed to connect to {}", server.label))?;

        let quoted_key = shell_quote(&public_key);
        let command = format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh \
             && (grep -qF {quoted_key} ~/.ssh/authorized_keys 2>/dev/null \
                 || echo {quoted_key} >> ~/.ssh/authorized_keys)"
        );
        let output = session.exec(&command).await?;
        if let Err(e) = session.close().await {
            warn!(server_id = %server.id, error = %e, "failed to close session after provisioning");
        }

        if !output.success() {
            bail!(
                "authorized_keys provisioning failed on {}: {}",
                server.label,
                output.stderr.trim()
            );
        }

        info!(server_id = %server.id, "installed public key in authorized_keys");
        Ok(())
    }

    pub async fn remove_from(&self, server: &RemoteServer) -> Result<()> {
        let public_key = self.keypair.public_key().await?;
        let target = self.keypair.target_for(server, self.connect_timeout);
        let mut session = self
            .shell
            .connect(&target)
            .await
            .with_context(|| format!("Failed to connect to {}", server.label))?;

        let command = format!(
            "grep -vF {} ~/.ssh/authorized_keys > ~/.ssh/.authorized_keys.bktd \
             && mv ~/.ssh/.authorized_keys.bktd ~/.ssh/authorized_keys",
            shell_quote(&public_key)
        );
        let output = session.exec(&command).await?;
        let close_result = session.close().await;
        if let Err(e) = close_result {
            warn!(server_id = %server.id, error = %e, "failed to close session after key removal");
        }

        if !output.success() {
            bail!(
                "authorized_keys cleanup failed on {}: {}",
                server.label,
                output.stderr.trim()
            );
        }

        info!(server_id = %server.id, "removed public key from authorized_keys");
        Ok(())
    }

    /// Best-effort removal across all servers; returns how many succeeded.
    pub async fn remove_from_all(&self, servers: &[RemoteServer]) -> usize {
        let mut removed = 0;
        for server in servers {
            match self.remove_from(server).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(server_id = %server.id, error = %e, "key removal failed, continuing");
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ConnectivityStatus;
    use crate::core::ssh::SimulatedShell;

    fn server() -> RemoteServer {
        RemoteServer {
            id: "srv".into(),
            owner: "o@example.com".into(),
            label: "web-1".into(),
            host: "192.0.2.1".into(),
            port: 2222,
            username: "backup".into(),
            database_password: None,
            connectivity_status: ConnectivityStatus::Online,
        }
    }

    #[tokio::test]
    async fn public_key_is_trimmed_and_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("id_ed25519.pub");
        tokio::fs::write(&pub_path, "ssh-ed25519 AAAA bktd\n")
            .await
            .unwrap();

        let keypair = SshKeypair::new(dir.path().join("id_ed25519"), pub_path.clone());
        assert_eq!(keypair.public_key().await.unwrap(), "ssh-ed25519 AAAA bktd");

        tokio::fs::write(&pub_path, "  \n").await.unwrap();
        assert!(keypair.public_key().await.is_err());
    }

    #[tokio::test]
    async fn removal_runs_the_cleanup_command() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("id_ed25519.pub");
        tokio::fs::write(&pub_path, "ssh-ed25519 AAAA bktd\n")
            .await
            .unwrap();
        let keypair = SshKeypair::new(dir.path().join("id_ed25519"), pub_path);

        let shell = SimulatedShell::permissive();
        let service = SshKeyService::new(
            Arc::new(shell.clone()),
            keypair,
            Duration::from_secs(5),
        );

        let removed = service.remove_from_all(&[server()]).await;
        assert_eq!(removed, 1);

        let commands = shell.executed_commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("authorized_keys"));
        assert!(commands[0].contains("ssh-ed25519 AAAA bktd"));
    }

    #[tokio::test]
    async fn provisioning_appends_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("id_ed25519.pub");
        tokio::fs::write(&pub_path, "ssh-ed25519 AAAA bktd\n")
            .await
            .unwrap();
        let keypair = SshKeypair::new(dir.path().join("id_ed25519"), pub_path);

        let shell = SimulatedShell::permissive();
        let service = SshKeyService::new(
            Arc::new(shell.clone()),
            keypair,
            Duration::from_secs(5),
        );

        service.provision_on(&server()).await.unwrap();

        let commands = shell.executed_commands();
        assert_eq!(commands.len(), 1);
        // Guarded append, so re-provisioning cannot duplicate the key.
        assert!(commands[0].contains("grep -qF"));
        assert!(commands[0].contains(">> ~/.ssh/authorized_keys"));
    }

    #[tokio::test]
    async fn unreachable_server_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let pub_path = dir.path().join("id_ed25519.pub");
        tokio::fs::write(&pub_path, "ssh-ed25519 AAAA bktd\n")
            .await
            .unwrap();
        let keypair = SshKeypair::new(dir.path().join("id_ed25519"), pub_path);

        let shell = SimulatedShell::permissive();
        shell.refuse_connections("no route to host");
        let service = SshKeyService::new(
            Arc::new(shell),
            keypair,
            Duration::from_secs(5),
        );

        assert_eq!(service.remove_from_all(&[server()]).await, 0);
    }
}
