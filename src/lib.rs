//! Conductor is the process-supervision and IPC backbone of a distributed
//! control application. A central supervisor spawns long-running workers,
//! brokers direct channels between them on demand, gates startup on liveness
//! probes, and tears everything down in reverse spawn order on shutdown.

/// Duplex message channels.
pub mod channel;

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Protocol vocabulary and timing defaults.
pub mod constants;

/// Per-worker command dispatch.
pub mod dispatch;

/// Error handling.
pub mod error;

/// Worker runtime loop.
pub mod worker;

/// Supervisor, connection broker, liveness monitor, shutdown cascade.
pub mod supervisor;

/// Concrete workers shipped with the binary.
pub mod workers;

/// Shared helpers for tests.
pub mod test_utils;
