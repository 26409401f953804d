use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Upper bound for position and annotation update bodies
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(1024 * 1024) // 1 MB
}

/// Render cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
    /// Idle age after which entries are evicted, also the minimum gap between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: HumanDuration,
    /// Delay before retrying a publish whose destination is locked
    #[serde(default = "default_publish_retry_delay")]
    pub publish_retry_delay: HumanDuration,
    /// Also run the rate-limited sweep from a background timer
    #[serde(default = "default_true")]
    pub periodic_sweep: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
            sweep_interval: default_sweep_interval(),
            publish_retry_delay: default_publish_retry_delay(),
            periodic_sweep: true,
        }
    }
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("data/cache")
}

fn default_sweep_interval() -> HumanDuration {
    HumanDuration(Duration::from_secs(24 * 60 * 60))
}

fn default_publish_retry_delay() -> HumanDuration {
    HumanDuration(Duration::from_secs(1))
}

fn default_true() -> bool {
    true
}

/// Render worker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
        }
    }
}

fn default_worker_count() -> usize {
    2
}

/// Book library configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    #[serde(default = "default_library_root")]
    pub root: PathBuf,
    /// Fixed library identity; generated and stored in the root when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_id: Option<String>,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            library_id: None,
        }
    }
}

fn default_library_root() -> PathBuf {
    PathBuf::from("data/library")
}

/// Viewer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewerConfig {
    /// Formats that can be rendered for viewing (upper case)
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
        }
    }
}

fn default_formats() -> Vec<String> {
    crate::viewer::DEFAULT_FORMATS
        .iter()
        .map(|f| f.to_string())
        .collect()
}
