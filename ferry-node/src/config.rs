//! Load config from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Node configuration. File: ferry.toml in the working directory, or the path
/// passed via --config. Env overrides: FERRY_NODE_ID, FERRY_LISTEN_ADDR,
/// FERRY_STORAGE_DIR, FERRY_PEERS (comma-separated host:port list).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Stable node id; a random one is generated when absent.
    #[serde(default)]
    pub node_id: Option<String>,
    /// TCP listen address (default 0.0.0.0:7400).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory for servable files and in-flight block artifacts.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Peers to dial at startup, as host:port.
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:7400".to_string()
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("ferry-data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: None,
            listen_addr: default_listen_addr(),
            storage_dir: default_storage_dir(),
            peers: Vec::new(),
        }
    }
}

/// Load config: default, then config file (if present), then env vars.
pub fn load(path: Option<&Path>) -> Config {
    let mut c = load_file(path).unwrap_or_default();
    if let Ok(s) = std::env::var("FERRY_NODE_ID") {
        if !s.is_empty() {
            c.node_id = Some(s);
        }
    }
    if let Ok(s) = std::env::var("FERRY_LISTEN_ADDR") {
        if !s.is_empty() {
            c.listen_addr = s;
        }
    }
    if let Ok(s) = std::env::var("FERRY_STORAGE_DIR") {
        if !s.is_empty() {
            c.storage_dir = PathBuf::from(s);
        }
    }
    if let Ok(s) = std::env::var("FERRY_PEERS") {
        c.peers = s
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
    }
    c
}

fn load_file(path: Option<&Path>) -> Option<Config> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("ferry.toml"));
    if !path.exists() {
        return None;
    }
    let s = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            eprintln!("ignoring invalid config {}: {e}", path.display());
            None
        }
    }
}
