// src/lib.rs
pub mod buffer;
pub mod config;
pub mod conn;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod reactor;
pub mod slab;
pub mod store;
pub mod syscalls;
pub mod timer;

// Re-exports for users
pub use config::ServerConfig;
pub use error::{RavelError, RavelResult};
pub use reactor::{Reactor, WakeWriter};
