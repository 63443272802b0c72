/// Daemon configuration, loaded from a JSON file with CLI overrides.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerAddr {
    /// Direct TCP endpoint, `host:port`.
    Tcp(String),
    /// Unix-socket proxy endpoint (see `network::relay`).
    Unix(PathBuf),
}

impl std::fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerAddr::Tcp(addr) => write!(f, "{}", addr),
            WorkerAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_master_port")]
    pub port: u16,
    #[serde(default)]
    pub workers: Vec<WorkerAddr>,
    #[serde(default = "default_secret_path")]
    pub secret_path: PathBuf,
    /// Shard store root for `--local` mode.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            bind: default_bind(),
            port: default_master_port(),
            workers: Vec::new(),
            secret_path: default_secret_path(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_bind")]
    pub host: String,
    #[serde(default = "default_worker_port")]
    pub port: u16,
    /// Peer address the master connects from; loopback is always accepted.
    #[serde(default)]
    pub master_addr: Option<IpAddr>,
    #[serde(default = "default_secret_path")]
    pub secret_path: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Map pool size; defaults to the CPU count.
    #[serde(default)]
    pub parallel: Option<usize>,
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            host: default_bind(),
            port: default_worker_port(),
            master_addr: None,
            secret_path: default_secret_path(),
            data_dir: default_data_dir(),
            parallel: None,
            pid_file: default_pid_file(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_master_port() -> u16 {
    8280
}

fn default_worker_port() -> u16 {
    2394
}

fn default_secret_path() -> PathBuf {
    PathBuf::from("secrets/password")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("pid")
}

pub fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path)
        .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EngineError::Config(format!("bad config {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_sparse_config() {
        let cfg: MasterConfig =
            serde_json::from_str(r#"{"workers": [{"tcp": "10.0.0.1:2394"}]}"#).unwrap();
        assert_eq!(cfg.port, 8280);
        assert_eq!(cfg.workers, vec![WorkerAddr::Tcp("10.0.0.1:2394".into())]);
    }

    #[test]
    fn worker_addr_kinds() {
        let cfg: MasterConfig = serde_json::from_str(
            r#"{"workers": [{"tcp": "a:1"}, {"unix": "/run/rakedb/w0.sock"}]}"#,
        )
        .unwrap();
        assert!(matches!(cfg.workers[1], WorkerAddr::Unix(_)));
    }
}
