//! Network-gateway worker (thin).
//!
//! The gateway's wire protocol (TCP framing, challenge/response auth) lives
//! outside this crate. What remains here is its use of the core: on `init` it
//! asks the supervisor for a direct channel to the persistence worker and
//! keeps a small cache of the settings it has been sent.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::{
    channel::Payload,
    dispatch::{CommandTable, Service},
    error::HandlerError,
    worker::Links,
    workers::STORAGE,
};

/// The gateway worker's application half.
#[derive(Default)]
pub struct GatewayService {
    settings: BTreeMap<String, Payload>,
}

impl GatewayService {
    /// Creates an empty gateway service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value received from the persistence worker for `key`.
    pub fn cached_setting(&self, key: &str) -> Option<&Payload> {
        self.settings.get(key)
    }
}

/// First-time setup: go latency-sensitive, then obtain the storage channel.
fn init(
    _svc: &mut GatewayService,
    links: &mut Links,
    _sender: &str,
    _payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    // A listener polling for sub-second request latency must not back off.
    links.set_sleep(false);

    links
        .request_connection(STORAGE)
        .map_err(|err| HandlerError::Message(format!("cannot reach storage worker: {err}")))?;

    // Warm the cache; the value arrives as a `get_setting` notification.
    links.send(STORAGE, "get_setting", Payload::text("password"))?;
    info!("gateway connected to the storage worker");
    Ok(None)
}

/// Notification carrying `[key, value]` back from the persistence worker.
fn get_setting(
    svc: &mut GatewayService,
    _links: &mut Links,
    sender: &str,
    payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    let Some((Payload::Text(key), value)) = payload.into_pair() else {
        return Err(HandlerError::Message(
            "get_setting notification expects [key, value]".to_string(),
        ));
    };

    debug!("cached setting '{key}' from '{sender}'");
    svc.settings.insert(key, value);
    Ok(None)
}

impl Service for GatewayService {
    fn commands() -> CommandTable<Self> {
        CommandTable::new()
            .register("init", init)
            .register("get_setting", get_setting)
    }

    fn cleanup(&mut self, _links: &mut Links) {
        // Sockets would be shut down here; the thin gateway only drops its cache.
        self.settings.clear();
    }
}
