use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use compute::{SubdivideOptions, DEFAULT_MAX_NODES};
use runtime::NotifyPolicy;

/// Where finished outputs go.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreConfig {
    /// Copy into a local directory tree.
    LocalDir(PathBuf),
    /// `PUT {base}/{key}` over HTTP.
    Http(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RasterConfig {
    pub target_crs: String,
    /// Expected duration of one external step; drives the heartbeat curve.
    pub assumed: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            target_crs: "EPSG:6933".to_string(),
            assumed: Duration::from_secs(30),
            heartbeat_interval: Duration::from_millis(3_000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub addr: SocketAddr,
    pub work_dir: PathBuf,
    pub max_nodes: usize,
    pub batch_size: usize,
    pub store: StoreConfig,
    pub public_base_url: Option<String>,
    pub notify: NotifyPolicy,
    pub default_region: String,
    pub raster: RasterConfig,
    /// Accept `file://` source URLs. Off unless `ALLOW_LOCAL_SOURCES` is set.
    pub allow_local_sources: bool,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, String> {
        let addr = env::var("WORKER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:9200".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| format!("invalid WORKER_ADDR: {e}"))?;
        let work_dir = env::var("WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| env::temp_dir());

        let store = match (env::var("STORE_URL"), env::var("STORE_ROOT")) {
            (Ok(url), _) if !url.is_empty() => StoreConfig::Http(url),
            (_, Ok(root)) if !root.is_empty() => StoreConfig::LocalDir(PathBuf::from(root)),
            _ => StoreConfig::LocalDir(work_dir.join("store")),
        };

        let defaults = RasterConfig::default();
        Ok(Self {
            addr,
            work_dir,
            max_nodes: env_var_usize("MAX_NODES", DEFAULT_MAX_NODES),
            batch_size: SubdivideOptions::from_env().batch_size,
            store,
            public_base_url: env::var("PUBLIC_BASE_URL").ok().filter(|s| !s.is_empty()),
            notify: NotifyPolicy {
                min_interval_ms: env_var_u64("NOTIFY_MIN_INTERVAL_MS", 1_000),
                jump_threshold: env_var_f64("NOTIFY_JUMP_PERCENT", 5.0),
            },
            default_region: env::var("AWS_REGION")
                .or_else(|_| env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| "us-west-2".to_string()),
            raster: RasterConfig {
                target_crs: env::var("RASTER_TARGET_CRS").unwrap_or(defaults.target_crs),
                assumed: Duration::from_secs(env_var_u64("RASTER_ASSUMED_SECS", 30)),
                heartbeat_interval: Duration::from_millis(env_var_u64(
                    "HEARTBEAT_INTERVAL_MS",
                    3_000,
                )),
            },
            allow_local_sources: env_var_bool("ALLOW_LOCAL_SOURCES"),
        })
    }

    /// Subdivision options for one job; a per-request budget wins.
    pub fn subdivide_options(&self, max_nodes: Option<usize>) -> SubdivideOptions {
        SubdivideOptions {
            max_nodes: max_nodes.unwrap_or(self.max_nodes),
            batch_size: self.batch_size,
        }
    }
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_bool(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn test_config(root: &std::path::Path) -> WorkerConfig {
    WorkerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        work_dir: root.join("work"),
        max_nodes: DEFAULT_MAX_NODES,
        batch_size: 100,
        store: StoreConfig::LocalDir(root.join("store")),
        public_base_url: Some("https://tiles.example.com/".to_string()),
        notify: NotifyPolicy::default(),
        default_region: "us-west-2".to_string(),
        raster: RasterConfig::default(),
        allow_local_sources: true,
    }
}
