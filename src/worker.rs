//! Worker runtime: the generic loop every worker runs.
//!
//! A worker owns a named set of channel endpoints (always including
//! `"parent"`, its link to the supervisor), polls them cooperatively, applies
//! the built-in command table (`quit`, `close`, `connect`, `alive`) and hands
//! everything else to the worker's own [`CommandTable`]. The loop never
//! blocks on one peer while others have pending work; the single exception is
//! [`Links::request_connection`], which waits on `"parent"` for the
//! supervisor's brokered reply.

use std::{
    collections::{BTreeMap, VecDeque},
    thread,
    time::{Duration, Instant},
};

use strum_macros::AsRefStr;
use tracing::{debug, error, info, warn};

use crate::{
    channel::{Endpoint, Message, Payload},
    constants::{
        CMD_ALIVE, CMD_CLOSE, CMD_CONNECT, CMD_QUIT, CONNECT_REPLY_TIMEOUT, IDLE_BACKOFF_MS,
        IDLE_THRESHOLD_MS, PARENT, REPLY_ERROR, REPLY_OK, STARTUP_GRACE,
    },
    dispatch::Service,
    error::{ChannelError, ConnectError, LinkError},
};

/// Lifecycle states of a worker runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    /// Initializing with the parent channel.
    Starting,
    /// Polling peers and dispatching commands.
    Running,
    /// Cleanup hook running, channels being released.
    Stopping,
    /// Terminal; the runtime loop has returned.
    Stopped,
}

/// The named channel set of one worker, plus the idle bookkeeping that goes
/// with it.
///
/// Handlers receive `&mut Links` and use it to reach peers, request brokered
/// connections, or ask the supervisor to shut the whole system down.
pub struct Links {
    name: String,
    peers: BTreeMap<String, Endpoint>,
    pending: VecDeque<(String, Message)>,
    last_message: Instant,
    sleep: bool,
}

impl Links {
    /// Creates the link set for worker `name`, seeded with the parent
    /// channel.
    pub(crate) fn new(name: &str, parent: Endpoint) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(PARENT.to_string(), parent);
        Self {
            name: name.to_string(),
            peers,
            pending: VecDeque::new(),
            // A fresh worker counts as busy until the startup grace passes.
            last_message: Instant::now() + STARTUP_GRACE,
            sleep: true,
        }
    }

    /// Name of the worker owning this link set.
    pub fn worker_name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current peer names.
    pub fn peer_names(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    /// Whether a channel exists under `peer`.
    pub fn has_peer(&self, peer: &str) -> bool {
        self.peers.contains_key(peer)
    }

    /// Whether the worker holds no channels at all.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Installs `endpoint` under `peer`. A worker holds at most one channel
    /// per peer name, so an existing entry is replaced.
    pub fn install(&mut self, peer: &str, endpoint: Endpoint) {
        if self.peers.insert(peer.to_string(), endpoint).is_some() {
            warn!("replaced existing channel to '{peer}' on '{}'", self.name);
        }
    }

    /// Removes and returns the channel under `peer`. Removing an absent peer
    /// is a no-op.
    pub fn remove(&mut self, peer: &str) -> Option<Endpoint> {
        self.peers.remove(peer)
    }

    /// Drops every remaining channel.
    pub(crate) fn clear(&mut self) {
        self.peers.clear();
    }

    /// Sends `(command, payload)` to the named peer.
    pub fn send(&self, peer: &str, command: &str, payload: Payload) -> Result<(), LinkError> {
        let endpoint = self
            .peers
            .get(peer)
            .ok_or_else(|| LinkError::UnknownPeer(peer.to_string()))?;
        endpoint.send(Message::new(command, payload))?;
        Ok(())
    }

    /// Asks the supervisor for a direct channel to worker `to`, blocking on
    /// the parent channel (bounded) until the brokered reply arrives.
    ///
    /// On success the new channel is installed under `to`. A refusal is
    /// surfaced as [`ConnectError::Refused`]; callers are expected to turn it
    /// into a clear domain failure rather than proceed without the peer.
    pub fn request_connection(&mut self, to: &str) -> Result<(), ConnectError> {
        let from = self.name.clone();
        self.send(
            PARENT,
            CMD_CONNECT,
            Payload::List(vec![Payload::text(from.as_str()), Payload::text(to)]),
        )?;

        let deadline = Instant::now() + CONNECT_REPLY_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectError::Channel(ChannelError::TimedOut));
            }

            let parent = self
                .peers
                .get(PARENT)
                .ok_or(ConnectError::Channel(ChannelError::Closed))?;
            let message = parent.receive_timeout(remaining)?;
            self.mark_received();

            if message.command != CMD_CONNECT {
                // Not the brokered reply; the runtime loop replays it later.
                self.pending.push_back((PARENT.to_string(), message));
                continue;
            }

            match message.payload {
                Payload::Endpoint(endpoint) => {
                    info!("'{from}' connected to '{to}'");
                    self.install(to, endpoint);
                    return Ok(());
                }
                // An inbound connect delivery, not our reply.
                payload @ Payload::List(_) => {
                    self.pending
                        .push_back((PARENT.to_string(), Message::new(CMD_CONNECT, payload)));
                }
                _ => {
                    return Err(ConnectError::Refused {
                        from,
                        to: to.to_string(),
                    });
                }
            }
        }
    }

    /// Asks the supervisor to shut the whole system down, the way a worker
    /// does when a fatal initialization error (e.g. an unbindable socket)
    /// makes continuing pointless.
    pub fn request_shutdown(&self) {
        if let Err(err) = self.send(PARENT, CMD_QUIT, Payload::None) {
            warn!("'{}' could not request shutdown: {err}", self.name);
        }
    }

    /// Controls the idle backoff. Workers doing latency-sensitive polling
    /// clear the flag to keep the loop hot.
    pub fn set_sleep(&mut self, sleep: bool) {
        self.sleep = sleep;
    }

    /// Whether the idle backoff is enabled.
    pub fn sleep(&self) -> bool {
        self.sleep
    }

    pub(crate) fn mark_received(&mut self) {
        self.last_message = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_message)
    }

    pub(crate) fn pop_pending(&mut self) -> Option<(String, Message)> {
        self.pending.pop_front()
    }

    fn try_receive_from(&self, peer: &str) -> Result<Option<Message>, ChannelError> {
        match self.peers.get(peer) {
            Some(endpoint) => endpoint.try_receive(),
            // Removed earlier in the same poll pass.
            None => Ok(None),
        }
    }
}

/// The generic worker loop, parameterized by the application half.
pub struct Runtime<S: Service> {
    name: String,
    links: Links,
    table: crate::dispatch::CommandTable<S>,
    service: S,
    state: WorkerState,
    idle_threshold: Duration,
    idle_backoff: Duration,
}

impl<S: Service> Runtime<S> {
    /// Builds a runtime for worker `name` around its parent endpoint.
    pub fn new(name: &str, parent: Endpoint, service: S) -> Self {
        info!("Starting {name}...");
        Self {
            name: name.to_string(),
            links: Links::new(name, parent),
            table: S::commands(),
            service,
            state: WorkerState::Starting,
            idle_threshold: Duration::from_millis(IDLE_THRESHOLD_MS),
            idle_backoff: Duration::from_millis(IDLE_BACKOFF_MS),
        }
    }

    /// Overrides the idle thresholds (from configuration).
    pub fn with_idle(mut self, threshold: Duration, backoff: Duration) -> Self {
        self.idle_threshold = threshold;
        self.idle_backoff = backoff;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Runs the worker loop to completion. This is the body of the worker
    /// thread; it returns once the worker has reached `stopped`.
    pub fn run(mut self) {
        self.state = WorkerState::Running;

        while self.state == WorkerState::Running {
            self.poll_once();
            if self.state != WorkerState::Running {
                break;
            }

            if let Err(err) = self.service.tick(&mut self.links) {
                error!("tick hook of '{}' failed: {err}", self.name);
            }

            if self.links.sleep() && self.links.idle_for() > self.idle_threshold {
                thread::sleep(self.idle_backoff);
            }
        }

        info!("Shutting down {}...", self.name);
        self.state = WorkerState::Stopping;
        self.service.cleanup(&mut self.links);
        self.links.clear();
        self.state = WorkerState::Stopped;
        debug!("{} reached state '{}'", self.name, self.state.as_ref());
    }

    /// One fair pass over pending replays and every peer channel.
    fn poll_once(&mut self) {
        while let Some((peer, message)) = self.links.pop_pending() {
            self.handle_message(&peer, message);
            if self.state != WorkerState::Running {
                return;
            }
        }

        for peer in self.links.peer_names() {
            match self.links.try_receive_from(&peer) {
                Ok(Some(message)) => {
                    self.links.mark_received();
                    self.handle_message(&peer, message);
                }
                Ok(None) => {}
                Err(ChannelError::Closed) | Err(ChannelError::TimedOut) => {
                    info!(
                        "communication between '{peer}' and '{}' is closed",
                        self.name
                    );
                    self.links.remove(&peer);
                    if self.links.is_empty() {
                        // No channel left means no way to ever receive `quit`.
                        self.state = WorkerState::Stopping;
                    }
                }
            }

            if self.state != WorkerState::Running {
                return;
            }
        }
    }

    /// Applies the built-in command table, falling through to the worker's
    /// own dispatcher.
    fn handle_message(&mut self, peer: &str, message: Message) {
        match message.command.as_str() {
            CMD_QUIT => {
                self.reply(peer, CMD_QUIT, Payload::text(REPLY_OK));
                self.state = WorkerState::Stopping;
            }
            CMD_CLOSE => {
                if self.links.has_peer(peer) {
                    // Acknowledge on the channel being closed, then drop it.
                    self.reply(peer, CMD_CLOSE, Payload::text(REPLY_OK));
                    self.links.remove(peer);
                    if self.links.is_empty() {
                        self.state = WorkerState::Stopping;
                    }
                } else {
                    debug!("close for already absent peer '{peer}' on '{}'", self.name);
                }
            }
            CMD_CONNECT => match message.payload.into_pair() {
                Some((Payload::Text(name), Payload::Endpoint(endpoint))) => {
                    info!("connected '{name}' to '{}'", self.name);
                    self.links.install(&name, endpoint);
                    self.reply(peer, CMD_CONNECT, Payload::text(REPLY_OK));
                }
                _ => {
                    warn!("malformed connect delivery from '{peer}' to '{}'", self.name);
                    self.reply(peer, CMD_CONNECT, Payload::text(REPLY_ERROR));
                }
            },
            CMD_ALIVE => {
                self.reply(peer, CMD_ALIVE, Payload::None);
            }
            _ => {
                self.table.dispatch(
                    &mut self.service,
                    &mut self.links,
                    peer,
                    &message.command,
                    message.payload,
                );
            }
        }
    }

    fn reply(&self, peer: &str, command: &str, payload: Payload) {
        if let Err(err) = self.links.send(peer, command, payload) {
            warn!("'{}' could not acknowledge '{command}' to '{peer}': {err}", self.name);
        }
    }
}
