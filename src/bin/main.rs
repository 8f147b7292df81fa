use std::{error::Error, sync::atomic::Ordering};

use tracing::error;
use tracing_subscriber::EnvFilter;

use conductor::{
    cli::{Cli, parse_args},
    config::{Config, load_config},
    supervisor::Supervisor,
    worker::Runtime,
    workers::{self, gateway::GatewayService, storage::StorageService},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = load_config(args.config.as_deref())?;
    let mut supervisor = Supervisor::new(config.clone());

    register_signal_handler(&supervisor)?;

    if let Some(password) = args.set_password {
        // The worker fleet is never brought up: persist, cascade, exit 0.
        supervisor.set_password(&password)?;
    } else {
        spawn_workers(&mut supervisor, &config)?;
        supervisor.start()?;
        supervisor.serve()?;
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn register_signal_handler(supervisor: &Supervisor) -> Result<(), Box<dyn Error>> {
    let flag = supervisor.interrupt_flag();
    ctrlc::set_handler(move || {
        println!();
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(())
}

/// Spawns the control application's worker set: the persistence worker first,
/// then the gateway that depends on it. The shutdown cascade runs in reverse,
/// so the gateway is torn down before the storage it talks to.
fn spawn_workers(supervisor: &mut Supervisor, config: &Config) -> Result<(), Box<dyn Error>> {
    let state_dir = config.resolve_state_dir()?;
    let idle_threshold = config.idle_threshold();
    let idle_backoff = config.idle_backoff();

    supervisor.spawn(workers::STORAGE, {
        let state_dir = state_dir.clone();
        move |parent| match StorageService::new(&state_dir) {
            Ok(service) => Runtime::new(workers::STORAGE, parent, service)
                .with_idle(idle_threshold, idle_backoff)
                .run(),
            // Dropping the parent endpoint makes the liveness gate fail and
            // the supervisor exit non-zero.
            Err(err) => error!("storage worker failed to initialize: {err}"),
        }
    })?;

    supervisor.spawn(workers::GATEWAY, move |parent| {
        Runtime::new(workers::GATEWAY, parent, GatewayService::new())
            .with_idle(idle_threshold, idle_backoff)
            .run()
    })?;

    Ok(())
}
