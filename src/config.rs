//! Layered configuration: defaults, then a TOML file, then `BKTD_`
//! environment variables, then any CLI arguments the caller serialized.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::core::keys::SshKeypair;
use crate::core::retry::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub ssh_private_key_path: PathBuf,
    pub ssh_public_key_path: PathBuf,
    pub connect_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/lib/bktd/bktd.db"),
            ssh_private_key_path: PathBuf::from("/etc/bktd/id_ed25519"),
            ssh_public_key_path: PathBuf::from("/etc/bktd/id_ed25519.pub"),
            connect_timeout_secs: 10,
            poll_interval_secs: 60,
            retry_max_attempts: 3,
            retry_base_delay_secs: 30,
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Build the effective config. `args` are CLI overrides, highest
    /// precedence, serialized so unset flags fall through to lower layers.
    pub fn new<A: Serialize>(args: Option<&A>) -> Result<Self> {
        let config_path =
            std::env::var("BKTD_CONFIG").unwrap_or_else(|_| "/etc/bktd/config.toml".to_string());

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("BKTD_"));

        if let Some(args) = args {
            figment = figment.merge(Serialized::defaults(args));
        }

        Ok(figment.extract()?)
    }

    pub fn keypair(&self) -> SshKeypair {
        SshKeypair::new(
            self.ssh_private_key_path.clone(),
            self.ssh_public_key_path.clone(),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            Duration::from_secs(self.retry_base_delay_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_args_override_defaults() {
        #[derive(Serialize)]
        struct Args {
            #[serde(skip_serializing_if = "Option::is_none")]
            poll_interval_secs: Option<u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            verbose: Option<bool>,
        }

        let args = Args {
            poll_interval_secs: Some(5),
            verbose: None,
        };
        let config = AppConfig::new(Some(&args)).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        // Unset args fall through to the default.
        assert!(!config.verbose);
    }

    #[test]
    fn retry_policy_reflects_config() {
        let config = AppConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(30));
    }
}
