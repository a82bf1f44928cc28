//! Server configuration.
//!
//! Bind address and port come from the command line; everything else lives in
//! an optional JSON config file with defaults matching the classic setup
//! (5 second tick, 3-tick idle timeout, 64k connection slots).

use crate::error::{RavelError, RavelResult};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Document root served for plain file targets.
    pub doc_root: PathBuf,
    /// Document name a bare `/` target resolves to.
    pub default_document: String,
    /// Periodic tick interval in seconds; idle timeout is 3 ticks.
    pub tick_secs: u64,
    /// Connection slot pool size (also the live-connection cap).
    pub max_connections: usize,
    /// Bounded task queue capacity.
    pub queue_capacity: usize,
    /// Worker threads executing request processing.
    pub workers: usize,
    /// Credential-store handles.
    pub store_handles: usize,
    /// How long a worker may wait for a store handle before failing the
    /// request with an internal error.
    pub store_acquire_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from("./resources"),
            default_document: "judge.html".to_string(),
            tick_secs: 5,
            max_connections: 65536,
            queue_capacity: 10000,
            workers: num_cpus::get(),
            store_handles: 8,
            store_acquire_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> RavelResult<Self> {
        let file = File::open(path)
            .map_err(|e| RavelError::Config(format!("{}: {}", path.display(), e)))?;
        let config: ServerConfig = serde_json::from_reader(file)
            .map_err(|e| RavelError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> RavelResult<()> {
        if self.tick_secs == 0 {
            return Err(RavelError::Config("tick_secs must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(RavelError::Config("max_connections must be positive".into()));
        }
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(RavelError::Config(
                "workers and queue_capacity must be positive".into(),
            ));
        }
        if self.store_handles == 0 {
            return Err(RavelError::Config("store_handles must be positive".into()));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    /// A connection with no I/O for this long is force-closed by the sweep.
    pub fn idle_timeout(&self) -> Duration {
        3 * self.tick()
    }

    pub fn store_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.store_acquire_timeout_ms)
    }
}
