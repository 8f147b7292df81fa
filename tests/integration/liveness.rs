#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use common::{Idle, quick_config};
use conductor::{
    config::LivenessPolicy,
    error::SupervisorError,
    supervisor::Supervisor,
    worker::Runtime,
};

#[test]
fn fail_fast_aborts_startup_on_a_hung_worker() {
    let mut supervisor = Supervisor::new(quick_config());
    supervisor
        .spawn("healthy", |parent| Runtime::new("healthy", parent, Idle).run())
        .unwrap();
    supervisor
        .spawn("hung", |parent| {
            // Holds the endpoint without ever polling it, then exits.
            thread::sleep(Duration::from_millis(600));
            drop(parent);
        })
        .unwrap();

    let err = supervisor.start().unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::WorkerUnresponsive(name) if name == "hung"
    ));

    supervisor.shutdown().unwrap();
    assert!(supervisor.worker_names().is_empty());
}

#[test]
fn retry_policy_tolerates_a_slow_starter() {
    let mut config = quick_config();
    config.liveness.policy = LivenessPolicy::Retry;
    config.liveness.attempts = 10;
    config.liveness.backoff_ms = 100;

    let mut supervisor = Supervisor::new(config);
    supervisor
        .spawn("slow", |parent| {
            // Comes up well after the first probe pass has failed.
            thread::sleep(Duration::from_millis(500));
            Runtime::new("slow", parent, Idle).run()
        })
        .unwrap();

    supervisor.start().unwrap();
    supervisor.shutdown().unwrap();
}

#[test]
fn healthy_workers_pass_the_gate_first_try() {
    let mut supervisor = Supervisor::new(quick_config());
    for name in ["a", "b", "c"] {
        supervisor
            .spawn(name, move |parent| Runtime::new(name, parent, Idle).run())
            .unwrap();
    }

    supervisor.start().unwrap();
    supervisor.shutdown().unwrap();
}
