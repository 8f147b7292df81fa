//! Concrete workers shipped with the `condr` binary.
//!
//! These are deliberately thin: the persistence worker owns the settings
//! store, the gateway worker demonstrates the brokered-connection flow. Their
//! full subsystems (storage schema, wire protocol) live outside this crate.

/// Persistence worker.
pub mod storage;

/// Network-gateway worker.
pub mod gateway;

/// Registry name of the persistence worker.
pub const STORAGE: &str = "storage";

/// Registry name of the network-gateway worker.
pub const GATEWAY: &str = "gateway";
