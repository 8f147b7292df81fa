//! Constants and timing defaults for the conductor runtime.
//!
//! This module centralizes the protocol vocabulary and the bounded-wait
//! durations used throughout the supervisor and the worker runtime.

use std::time::Duration;

// ============================================================================
// Protocol vocabulary
// ============================================================================

/// Reserved peer name for the channel every worker holds to its supervisor.
pub const PARENT: &str = "parent";

/// Built-in command: ordered shutdown request.
pub const CMD_QUIT: &str = "quit";

/// Built-in command: tear down one peer channel.
pub const CMD_CLOSE: &str = "close";

/// Built-in command: request or deliver a brokered channel.
pub const CMD_CONNECT: &str = "connect";

/// Built-in command: liveness probe; echoed back by the worker runtime.
pub const CMD_ALIVE: &str = "alive";

/// Lifecycle command sent by the supervisor once after the liveness gate.
pub const CMD_INIT: &str = "init";

/// Positive acknowledgment payload.
pub const REPLY_OK: &str = "ok";

/// Negative acknowledgment payload.
pub const REPLY_ERROR: &str = "error";

// ============================================================================
// Worker runtime timing
// ============================================================================

/// A fresh worker counts as busy for this long, so spawn/init sequences are
/// never slowed by the idle backoff.
pub const STARTUP_GRACE: Duration = Duration::from_secs(60);

/// Default idle threshold before a worker may start sleeping between poll
/// cycles (`idle.threshold_ms`).
pub const IDLE_THRESHOLD_MS: u64 = 1_000;

/// Default sleep per poll cycle once a worker has gone idle
/// (`idle.backoff_ms`).
pub const IDLE_BACKOFF_MS: u64 = 500;

/// Upper bound on a worker's synchronous wait for a connection reply from
/// its parent.
pub const CONNECT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Supervisor timing
// ============================================================================

/// Sleep between serve-loop passes when no worker had pending traffic.
pub const SERVE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on the broker's wait for the target worker's acknowledgment.
pub const BROKER_REPLY_TIMEOUT_MS: u64 = 5_000;

/// Default bound on one liveness probe round-trip.
pub const LIVENESS_TIMEOUT_MS: u64 = 2_000;

/// Default pause between liveness passes under the retry policy.
pub const LIVENESS_BACKOFF_MS: u64 = 500;

/// Default liveness passes attempted under the retry policy.
pub const LIVENESS_ATTEMPTS: u32 = 3;

/// Default bound on the wait for a worker's `quit` acknowledgment during the
/// shutdown cascade.
pub const SHUTDOWN_REPLY_TIMEOUT_MS: u64 = 5_000;
