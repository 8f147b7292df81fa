//! Per-worker command dispatch.
//!
//! Every worker type declares an explicit table mapping command names to
//! handler functions, built once at worker construction. The table is the
//! only place application handlers are invoked, and the only place their
//! errors are caught: a failing handler is logged and produces no reply, it
//! never takes the worker down.

use std::collections::HashMap;

use tracing::{debug, error, trace, warn};

use crate::{
    channel::Payload,
    error::HandlerError,
    worker::Links,
};

/// An application command handler.
///
/// Returning `Ok(Some(value))` makes the dispatcher reply `(command, value)`
/// to the sender, so most handlers read like synchronous RPCs even though the
/// transport is asynchronous message passing.
pub type Handler<S> = fn(&mut S, &mut Links, &str, Payload) -> Result<Option<Payload>, HandlerError>;

/// Lookup table from command name to handler for one worker type.
pub struct CommandTable<S> {
    handlers: HashMap<&'static str, Handler<S>>,
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> CommandTable<S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under a command name. Names are matched after
    /// lower-casing and trimming, so register lower-case names.
    pub fn register(mut self, command: &'static str, handler: Handler<S>) -> Self {
        self.handlers.insert(command, handler);
        self
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table has no registered commands.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Looks up and runs the handler for `command`, auto-replying to the
    /// sender when the handler returns a value. Unknown commands are ignored;
    /// handler errors are logged and swallowed.
    pub(crate) fn dispatch(
        &self,
        service: &mut S,
        links: &mut Links,
        sender: &str,
        command: &str,
        payload: Payload,
    ) {
        let key = command.trim().to_ascii_lowercase();
        let Some(handler) = self.handlers.get(key.as_str()) else {
            debug!("ignoring unknown command '{key}' from '{sender}'");
            return;
        };

        trace!("dispatching '{key}' from '{sender}' with {payload:?}");
        match handler(service, links, sender, payload) {
            Ok(Some(reply)) => {
                if let Err(err) = links.send(sender, &key, reply) {
                    warn!("failed to reply '{key}' to '{sender}': {err}");
                }
            }
            Ok(None) => {}
            Err(err) => {
                error!("handler for '{key}' from '{sender}' failed: {err}");
            }
        }
    }
}

/// Application-specific half of a worker.
///
/// The worker runtime drives the loop and the built-in commands; a `Service`
/// contributes its command table, an optional per-iteration hook, and a
/// cleanup hook run once during shutdown.
pub trait Service: Sized {
    /// Builds the command table for this worker type.
    fn commands() -> CommandTable<Self>;

    /// Cooperative hook run once per loop iteration after pending messages
    /// have been processed. Errors are logged, never fatal.
    fn tick(&mut self, _links: &mut Links) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Cleanup hook run once when the worker begins stopping (release
    /// sockets, flush files, ...).
    fn cleanup(&mut self, _links: &mut Links) {}
}
