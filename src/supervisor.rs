//! Supervisor runtime: spawns workers, brokers channels between them, gates
//! startup on liveness, and drives the ordered shutdown cascade.
//!
//! The supervisor's serve loop is single-threaded and processes one inbound
//! message at a time, which is what serializes brokered connects without any
//! locking on the registry. Messages that arrive while the loop is blocked
//! inside a bounded synchronous wait (the broker handshake, a liveness probe,
//! a quit acknowledgment) are stashed in a per-worker backlog and replayed,
//! never dropped.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha512};
use tracing::{debug, error, info, warn};

use crate::{
    channel::{self, Endpoint, Message, Payload},
    config::{Config, LivenessPolicy},
    constants::{CMD_ALIVE, CMD_CONNECT, CMD_INIT, CMD_QUIT, REPLY_ERROR, REPLY_OK, SERVE_POLL_INTERVAL},
    error::{ChannelError, SupervisorError},
    workers::storage::SettingsStore,
};

/// One registry entry: a spawned worker, the supervisor's endpoint to it, and
/// the backlog of messages set aside during bounded waits.
struct WorkerEntry {
    name: String,
    handle: JoinHandle<()>,
    link: Endpoint,
    backlog: VecDeque<Message>,
}

impl WorkerEntry {
    /// Waits (bounded) for a reply whose command equals `command`, checking
    /// the backlog first. Anything else that arrives meanwhile is stashed.
    fn wait_reply(&mut self, command: &str, timeout: Duration) -> Result<Payload, ChannelError> {
        if let Some(pos) = self.backlog.iter().position(|m| m.command == command) {
            // remove() cannot fail: pos comes from position() on this deque.
            return Ok(self.backlog.remove(pos).map(|m| m.payload).unwrap_or_default());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::TimedOut);
            }

            let message = self.link.receive_timeout(remaining)?;
            if message.command == command {
                return Ok(message.payload);
            }
            self.backlog.push_back(message);
        }
    }
}

/// The top-level process: owns the worker registry in spawn order and drives
/// the whole lifecycle from spawn to cascade.
pub struct Supervisor {
    config: Config,
    registry: Vec<WorkerEntry>,
    interrupted: Arc<AtomicBool>,
}

impl Supervisor {
    /// Creates a supervisor with an empty registry.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Vec::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that makes the serve loop begin the shutdown cascade.
    /// Hand this to a SIGINT handler.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Names of the currently registered workers, in spawn order.
    pub fn worker_names(&self) -> Vec<String> {
        self.registry.iter().map(|e| e.name.clone()).collect()
    }

    /// Spawns a worker thread running `entry` with the worker-side endpoint
    /// of a fresh parent channel, and registers it.
    pub fn spawn<F>(&mut self, name: &str, entry: F) -> Result<(), SupervisorError>
    where
        F: FnOnce(Endpoint) + Send + 'static,
    {
        if self.position(name).is_some() {
            return Err(SupervisorError::DuplicateWorker(name.to_string()));
        }

        let (ours, theirs) = channel::channel();
        let handle = thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || entry(theirs))
            .map_err(|source| SupervisorError::WorkerSpawnError {
                worker: name.to_string(),
                source,
            })?;

        info!("Spawned worker '{name}'");
        self.registry.push(WorkerEntry {
            name: name.to_string(),
            handle,
            link: ours,
            backlog: VecDeque::new(),
        });
        Ok(())
    }

    /// Startup sequence: every worker must answer one `alive` probe (per the
    /// configured liveness policy) before `init` is sent to any of them.
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        self.wait_until_alive()?;
        self.init_all()
    }

    /// Steady-state loop: poll every worker fairly, broker connects, and
    /// begin the cascade on interrupt or a worker-initiated `quit`. Always
    /// ends in [`Supervisor::shutdown`].
    pub fn serve(&mut self) -> Result<(), SupervisorError> {
        info!("conductor supervising {} worker(s)", self.registry.len());

        'serve: loop {
            if self.interrupted.load(Ordering::SeqCst) {
                info!("interrupt received");
                break;
            }
            if self.registry.is_empty() {
                warn!("no workers left to supervise");
                break;
            }

            let mut idle = true;
            let mut dead = Vec::new();

            for idx in 0..self.registry.len() {
                let (name, polled) = {
                    let entry = &mut self.registry[idx];
                    if let Some(message) = entry.backlog.pop_front() {
                        (entry.name.clone(), Some(message))
                    } else {
                        match entry.link.try_receive() {
                            Ok(message) => (entry.name.clone(), message),
                            Err(_) => {
                                dead.push(entry.name.clone());
                                (entry.name.clone(), None)
                            }
                        }
                    }
                };

                if let Some(message) = polled {
                    idle = false;
                    if self.handle_message(&name, message) {
                        break 'serve;
                    }
                }
            }

            for name in dead {
                self.reap(&name);
            }

            if idle {
                thread::sleep(SERVE_POLL_INTERVAL);
            }
        }

        self.shutdown()
    }

    /// Hashes `value` (SHA-512, lowercase hex), persists it under the
    /// `password` key of the settings store, then runs the shutdown cascade.
    /// This is the `--set-password` path; the serve loop is never entered.
    pub fn set_password(&mut self, value: &str) -> Result<(), SupervisorError> {
        let digest = Sha512::digest(value.as_bytes());
        let hashed: String = digest.iter().map(|b| format!("{b:02x}")).collect();

        let mut store = SettingsStore::open(&self.config.resolve_state_dir()?)?;
        store.set("password", serde_json::Value::String(hashed))?;
        info!("password updated");

        self.shutdown()
    }

    /// Sends `quit` to every worker in reverse spawn order, waiting for each
    /// acknowledgment and thread exit before moving on, so later-spawned
    /// workers never outlive the services they depend on.
    pub fn shutdown(&mut self) -> Result<(), SupervisorError> {
        info!("Shutting down conductor...");
        let timeout = Duration::from_millis(self.config.shutdown.reply_timeout_ms);

        while let Some(mut entry) = self.registry.pop() {
            let name = entry.name.clone();
            info!("Stopping worker '{name}'");

            match entry.link.send(Message::new(CMD_QUIT, Payload::None)) {
                Ok(()) => match entry.wait_reply(CMD_QUIT, timeout) {
                    Ok(ref payload) if payload.as_text() == Some(REPLY_OK) => {
                        debug!("worker '{name}' acknowledged quit");
                    }
                    Ok(payload) => {
                        warn!("worker '{name}' sent unexpected quit reply: {payload:?}");
                    }
                    Err(ChannelError::Closed) => {
                        debug!("worker '{name}' exited before acknowledging quit");
                    }
                    Err(ChannelError::TimedOut) => {
                        warn!("worker '{name}' did not acknowledge quit in time");
                    }
                },
                Err(_) => debug!("worker '{name}' already unreachable"),
            }

            // Dropping our endpoint lets a worker that missed `quit` observe
            // EOF and stop on its own.
            drop(entry.link);
            if entry.handle.join().is_err() {
                error!("worker '{name}' panicked during shutdown");
            }
            info!("Worker '{name}' terminated");
        }

        info!("conductor shutdown complete");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Liveness monitor
    // ------------------------------------------------------------------

    /// Probes every worker until all have answered `alive`, honoring the
    /// configured policy (single fail-fast pass, or retries with backoff).
    fn wait_until_alive(&mut self) -> Result<(), SupervisorError> {
        let timeout = Duration::from_millis(self.config.liveness.timeout_ms);
        let (passes, backoff) = match self.config.liveness.policy {
            LivenessPolicy::FailFast => (1, Duration::ZERO),
            LivenessPolicy::Retry => (
                self.config.liveness.attempts.max(1),
                Duration::from_millis(self.config.liveness.backoff_ms),
            ),
        };

        let mut suspect = self.worker_names();
        for pass in 0..passes {
            if pass > 0 {
                thread::sleep(backoff);
            }

            let mut still_suspect = Vec::new();
            for name in suspect {
                if self.probe(&name, timeout) {
                    debug!("worker '{name}' answered liveness probe");
                } else {
                    still_suspect.push(name);
                }
            }
            suspect = still_suspect;

            if suspect.is_empty() {
                return Ok(());
            }
            warn!(
                "liveness pass {} left {} worker(s) suspect: {:?}",
                pass + 1,
                suspect.len(),
                suspect
            );
        }

        Err(SupervisorError::WorkerUnresponsive(suspect.swap_remove(0)))
    }

    /// One `alive` round-trip to the named worker within `timeout`.
    fn probe(&mut self, name: &str, timeout: Duration) -> bool {
        let Some(idx) = self.position(name) else {
            return false;
        };
        let entry = &mut self.registry[idx];
        if entry.link.send(Message::new(CMD_ALIVE, Payload::None)).is_err() {
            return false;
        }
        entry.wait_reply(CMD_ALIVE, timeout).is_ok()
    }

    /// Sends the one-time `init` command to every worker in spawn order.
    fn init_all(&mut self) -> Result<(), SupervisorError> {
        for entry in &self.registry {
            info!("Initializing worker '{}'", entry.name);
            entry
                .link
                .send(Message::new(CMD_INIT, Payload::None))
                .map_err(|source| SupervisorError::ControlChannel {
                    worker: entry.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connection broker
    // ------------------------------------------------------------------

    /// Dispatches one inbound worker message. Returns `true` when the serve
    /// loop should begin the shutdown cascade.
    fn handle_message(&mut self, from: &str, message: Message) -> bool {
        match message.command.as_str() {
            CMD_QUIT => {
                info!("worker '{from}' requested shutdown");
                true
            }
            CMD_CONNECT => {
                self.broker_connect(from, message.payload);
                false
            }
            other => {
                debug!("ignoring '{other}' from worker '{from}'");
                false
            }
        }
    }

    /// The brokered-connect protocol: validate the target, create a channel,
    /// deliver one endpoint to the target, and only after its `ok` hand the
    /// other endpoint to the requester. Any failure along the way is an
    /// `error` reply to the requester, never fatal to the supervisor.
    fn broker_connect(&mut self, requester: &str, payload: Payload) {
        let Some((Payload::Text(from), Payload::Text(to))) = payload.into_pair() else {
            warn!("malformed connect request from worker '{requester}'");
            self.reply_to(requester, CMD_CONNECT, Payload::text(REPLY_ERROR));
            return;
        };

        debug!("brokering channel from '{from}' to '{to}'");
        let Some(target_idx) = self.position(&to) else {
            warn!("connect request from '{from}' to unknown worker '{to}'");
            self.reply_to(requester, CMD_CONNECT, Payload::text(REPLY_ERROR));
            return;
        };

        let (for_requester, for_target) = channel::channel();
        let delivery = Message::new(
            CMD_CONNECT,
            Payload::List(vec![Payload::text(from.as_str()), Payload::Endpoint(for_target)]),
        );
        if self.registry[target_idx].link.send(delivery).is_err() {
            warn!("worker '{to}' is unreachable; refusing connect from '{from}'");
            self.reply_to(requester, CMD_CONNECT, Payload::text(REPLY_ERROR));
            return;
        }

        let timeout = Duration::from_millis(self.config.broker.reply_timeout_ms);
        match self.registry[target_idx].wait_reply(CMD_CONNECT, timeout) {
            Ok(ref payload) if payload.as_text() == Some(REPLY_OK) => {
                info!("brokered channel between '{from}' and '{to}'");
                self.reply_to(requester, CMD_CONNECT, Payload::Endpoint(for_requester));
            }
            Ok(payload) => {
                warn!("worker '{to}' refused the channel from '{from}': {payload:?}");
                self.reply_to(requester, CMD_CONNECT, Payload::text(REPLY_ERROR));
            }
            Err(err) => {
                warn!("no connect acknowledgment from '{to}': {err}");
                self.reply_to(requester, CMD_CONNECT, Payload::text(REPLY_ERROR));
            }
        }
    }

    // ------------------------------------------------------------------
    // Registry plumbing
    // ------------------------------------------------------------------

    fn position(&self, name: &str) -> Option<usize> {
        self.registry.iter().position(|e| e.name == name)
    }

    fn reply_to(&self, name: &str, command: &str, payload: Payload) {
        match self.position(name) {
            Some(idx) => {
                if let Err(err) = self.registry[idx].link.send(Message::new(command, payload)) {
                    warn!("could not reply '{command}' to worker '{name}': {err}");
                }
            }
            None => warn!("no registry entry for worker '{name}'"),
        }
    }

    /// Removes a worker whose control channel hit EOF, joining its thread so
    /// the entry only disappears once termination is confirmed.
    fn reap(&mut self, name: &str) {
        let Some(idx) = self.position(name) else {
            return;
        };
        error!("worker '{name}' closed its control channel unexpectedly");
        let entry = self.registry.remove(idx);
        drop(entry.link);
        if entry.handle.join().is_err() {
            error!("worker '{name}' panicked");
        }
    }
}
