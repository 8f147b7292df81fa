//! Error handling for conductor.
use thiserror::Error;

/// Transport-level failures on a single channel endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer endpoint was dropped; no further traffic is possible.
    #[error("channel closed by peer")]
    Closed,

    /// A bounded wait elapsed without a message arriving.
    #[error("timed out waiting for a message")]
    TimedOut,
}

/// Failures when a worker addresses one of its named peers.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The worker holds no channel under the given peer name.
    #[error("no channel to peer '{0}'")]
    UnknownPeer(String),

    /// The underlying channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Outcome of a worker's synchronous connection request through its parent.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The supervisor refused the request (unknown or unwilling target).
    #[error("cannot connect '{from}' with '{to}'")]
    Refused {
        /// The requesting worker.
        from: String,
        /// The requested target worker.
        to: String,
    },

    /// The parent channel failed or the bounded wait expired.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The request could not be sent in the first place.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Error raised by an application command handler.
///
/// Handlers never crash the worker: these are caught at the dispatch
/// boundary, logged, and treated as "no reply".
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Free-form handler failure.
    #[error("{0}")]
    Message(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Settings store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A requested peer connection was not established.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A send to a named peer failed.
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Error type for the persistent settings store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error reading or writing the settings file.
    #[error("failed to access settings file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing JSON contents of the settings file.
    #[error("failed to parse settings file: {0}")]
    ParseError(#[from] serde_json::Error),

    /// A payload that cannot be represented in the store (e.g. an endpoint).
    #[error("setting '{0}' has a value that cannot be persisted")]
    UnstorableValue(String),
}

/// Defines all possible errors that can occur in the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Error reading or accessing a configuration file.
    #[error("failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// An environment variable referenced by the configuration is unset.
    #[error("missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Error spawning a worker thread.
    #[error("failed to spawn worker '{worker}': {source}")]
    WorkerSpawnError {
        /// The worker name that failed to spawn.
        worker: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A worker was already registered under the same name.
    #[error("a worker named '{0}' is already registered")]
    DuplicateWorker(String),

    /// A worker failed the startup liveness gate.
    #[error("worker '{0}' is not responding to liveness probes")]
    WorkerUnresponsive(String),

    /// The control channel to a worker failed.
    #[error("control channel to worker '{worker}' failed: {source}")]
    ControlChannel {
        /// The worker whose channel failed.
        worker: String,
        /// The underlying channel error.
        #[source]
        source: ChannelError,
    },

    /// Error for the settings store.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
