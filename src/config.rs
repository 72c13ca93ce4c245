use std::path::PathBuf;

/// Configuration for a partition server handler.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the ring group this host serves in.
    pub ring_group: String,

    /// Fixed size of the read worker pool; also bounds peak in-flight reads
    /// (default: 32).
    pub num_concurrent_gets: usize,

    /// Directory holding this host's materialized partitions. Claimed
    /// exclusively for the lifetime of the handler.
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ring_group: "main".to_string(),
            num_concurrent_gets: 32,
            data_dir: PathBuf::from("./basalt"),
        }
    }
}

impl ServerConfig {
    /// Create a new config for the given ring group.
    pub fn new(ring_group: impl Into<String>) -> Self {
        Self {
            ring_group: ring_group.into(),
            ..Default::default()
        }
    }

    /// Set the read worker pool size.
    pub fn num_concurrent_gets(mut self, count: usize) -> Self {
        self.num_concurrent_gets = count;
        self
    }

    /// Set the local data directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}
