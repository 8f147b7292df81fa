#[path = "common/mod.rs"]
mod common;

use std::{
    sync::{Arc, Mutex, atomic::Ordering},
    time::Instant,
};

use common::quick_config;
use conductor::{
    dispatch::{CommandTable, Service},
    supervisor::Supervisor,
    worker::{Links, Runtime},
};

type TerminationLog = Arc<Mutex<Vec<(String, Instant)>>>;

/// Worker that timestamps its own cleanup so the cascade order is
/// observable.
struct Recorder {
    name: &'static str,
    log: TerminationLog,
}

impl Service for Recorder {
    fn commands() -> CommandTable<Self> {
        CommandTable::new()
    }

    fn cleanup(&mut self, _links: &mut Links) {
        self.log
            .lock()
            .unwrap()
            .push((self.name.to_string(), Instant::now()));
    }
}

fn spawn_recorder(supervisor: &mut Supervisor, name: &'static str, log: &TerminationLog) {
    let log = Arc::clone(log);
    supervisor
        .spawn(name, move |parent| {
            Runtime::new(name, parent, Recorder { name, log }).run()
        })
        .unwrap();
}

#[test]
fn interrupt_tears_workers_down_in_reverse_spawn_order() {
    let log: TerminationLog = Arc::new(Mutex::new(Vec::new()));

    let mut supervisor = Supervisor::new(quick_config());
    spawn_recorder(&mut supervisor, "one", &log);
    spawn_recorder(&mut supervisor, "two", &log);
    spawn_recorder(&mut supervisor, "three", &log);

    supervisor.start().unwrap();
    supervisor.interrupt_flag().store(true, Ordering::SeqCst);
    supervisor.serve().unwrap();

    // Registry entries are gone only after every thread has been joined.
    assert!(supervisor.worker_names().is_empty());

    let log = log.lock().unwrap();
    let names: Vec<&str> = log.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["three", "two", "one"]);

    // The cascade waits for each worker before quitting the previous one.
    assert!(log[0].1 <= log[1].1);
    assert!(log[1].1 <= log[2].1);
}

#[test]
fn worker_initiated_quit_triggers_the_same_cascade() {
    let log: TerminationLog = Arc::new(Mutex::new(Vec::new()));

    let mut supervisor = Supervisor::new(quick_config());
    spawn_recorder(&mut supervisor, "base", &log);

    // A worker that asks the supervisor to shut everything down right away.
    struct Impatient {
        log: TerminationLog,
    }

    impl Service for Impatient {
        fn commands() -> CommandTable<Self> {
            fn init(
                _svc: &mut Impatient,
                links: &mut Links,
                _sender: &str,
                _payload: conductor::channel::Payload,
            ) -> Result<Option<conductor::channel::Payload>, conductor::error::HandlerError>
            {
                links.request_shutdown();
                Ok(None)
            }
            CommandTable::new().register("init", init)
        }

        fn cleanup(&mut self, _links: &mut Links) {
            self.log
                .lock()
                .unwrap()
                .push(("impatient".to_string(), Instant::now()));
        }
    }

    let impatient_log = Arc::clone(&log);
    supervisor
        .spawn("impatient", move |parent| {
            Runtime::new("impatient", parent, Impatient { log: impatient_log }).run()
        })
        .unwrap();

    supervisor.start().unwrap();
    supervisor.serve().unwrap();

    let log = log.lock().unwrap();
    let names: Vec<&str> = log.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["impatient", "base"]);
}
