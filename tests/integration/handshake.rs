#[path = "common/mod.rs"]
mod common;

use std::sync::{Arc, Mutex};

use common::quick_config;
use conductor::{
    channel::Payload,
    dispatch::{CommandTable, Service},
    error::HandlerError,
    supervisor::Supervisor,
    worker::{Links, Runtime},
};

type EventLog = Arc<Mutex<Vec<String>>>;

/// Worker that, on `init`, asks the supervisor for a channel to `target` and
/// then round-trips a `probe` over it.
struct Requester {
    target: String,
    events: EventLog,
}

fn requester_init(
    svc: &mut Requester,
    links: &mut Links,
    _sender: &str,
    _payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    match links.request_connection(&svc.target) {
        Ok(()) => {
            svc.events
                .lock()
                .unwrap()
                .push(format!("connected:{}", svc.target));
            links.send(&svc.target, "probe", Payload::text("hello"))?;
        }
        Err(err) => {
            svc.events
                .lock()
                .unwrap()
                .push(format!("refused:{}:{err}", svc.target));
            links.request_shutdown();
        }
    }
    Ok(None)
}

fn requester_probe(
    svc: &mut Requester,
    links: &mut Links,
    sender: &str,
    payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    svc.events
        .lock()
        .unwrap()
        .push(format!("ack:{sender}:{:?}", payload.as_text()));
    links.request_shutdown();
    Ok(None)
}

impl Service for Requester {
    fn commands() -> CommandTable<Self> {
        CommandTable::new()
            .register("init", requester_init)
            .register("probe", requester_probe)
    }
}

/// Worker on the receiving side of the brokered channel.
struct Responder {
    events: EventLog,
}

fn responder_probe(
    svc: &mut Responder,
    _links: &mut Links,
    sender: &str,
    _payload: Payload,
) -> Result<Option<Payload>, HandlerError> {
    svc.events.lock().unwrap().push(format!("probe-from:{sender}"));
    Ok(Some(Payload::text("ack")))
}

impl Service for Responder {
    fn commands() -> CommandTable<Self> {
        CommandTable::new().register("probe", responder_probe)
    }
}

#[test]
fn brokered_connect_gives_both_sides_a_working_channel() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut supervisor = Supervisor::new(quick_config());
    supervisor
        .spawn("b", {
            let events = Arc::clone(&events);
            move |parent| Runtime::new("b", parent, Responder { events }).run()
        })
        .unwrap();
    supervisor
        .spawn("a", {
            let events = Arc::clone(&events);
            move |parent| {
                Runtime::new(
                    "a",
                    parent,
                    Requester {
                        target: "b".to_string(),
                        events,
                    },
                )
                .run()
            }
        })
        .unwrap();

    supervisor.start().unwrap();
    // Ends once the requester has seen the ack and asked for shutdown.
    supervisor.serve().unwrap();
    assert!(supervisor.worker_names().is_empty());

    let events = events.lock().unwrap();
    assert!(events.contains(&"connected:b".to_string()), "events: {events:?}");
    // The responder saw the probe arrive under the requester's name.
    assert!(events.contains(&"probe-from:a".to_string()), "events: {events:?}");
    // The requester got the auto-reply back over the brokered channel.
    assert!(
        events.contains(&"ack:b:Some(\"ack\")".to_string()),
        "events: {events:?}"
    );
}

#[test]
fn connect_to_unknown_worker_is_refused() {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut supervisor = Supervisor::new(quick_config());
    supervisor
        .spawn("a", {
            let events = Arc::clone(&events);
            move |parent| {
                Runtime::new(
                    "a",
                    parent,
                    Requester {
                        target: "zeta".to_string(),
                        events,
                    },
                )
                .run()
            }
        })
        .unwrap();

    supervisor.start().unwrap();
    supervisor.serve().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1, "events: {events:?}");
    assert!(events[0].starts_with("refused:zeta:"), "events: {events:?}");
}
