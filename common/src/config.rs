use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CResult, Error};

/// Top-level server configuration, loadable from a TOML file or built up
/// with [`ServerConfig::default`] and overridden field by field (as the
/// CLI entry point does with its flags).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub storage: StorageConfig,
    pub limits: LimitsConfig,
    pub response_cache: ResponseCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    pub addr: String,
}

/// Connection parameters for the underlying KV. `cluster_file` and
/// `num_connections` are passed straight through to the KV client and are
/// otherwise opaque to this crate -- the KV itself is an external
/// collaborator (§1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cluster_file: Option<String>,
    pub num_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-connection cap on concurrently-executing workers (§4.7).
    pub max_concurrency: usize,
    /// Heartbeat interval, in seconds, for idle-connection probing (§5).
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: ListenConfig::default(),
            storage: StorageConfig::default(),
            limits: LimitsConfig::default(),
            response_cache: ResponseCacheConfig::default(),
        }
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        ListenConfig {
            addr: "127.0.0.1:9009".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            cluster_file: None,
            num_connections: 1,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_concurrency: 64,
            timeout_secs: 30,
        }
    }
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        ResponseCacheConfig {
            enabled: false,
            ttl_secs: 60,
        }
    }
}

/// Read a TOML config file from disk, falling back to type defaults for
/// any field the file omits.
pub fn read_config<P: AsRef<Path>>(path: P) -> CResult<ServerConfig> {
    let mut file = File::open(path.as_ref()).map_err(|e| Error::internal(e.to_string()))?;
    let mut s = String::new();
    file.read_to_string(&mut s)
        .map_err(|e| Error::internal(e.to_string()))?;
    toml::from_str(&s).map_err(|e| Error::internal(format!("config parse error: {e}")))
}
