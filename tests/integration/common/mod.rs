#![allow(dead_code)]

use conductor::{
    config::Config,
    dispatch::{CommandTable, Service},
};

/// A worker with no application commands; the built-ins are enough for it to
/// answer probes and shut down cleanly.
pub struct Idle;

impl Service for Idle {
    fn commands() -> CommandTable<Self> {
        CommandTable::new()
    }
}

/// Configuration with short bounded waits so failure paths don't stall the
/// test suite.
pub fn quick_config() -> Config {
    let mut config = Config::default();
    config.liveness.timeout_ms = 300;
    config.broker.reply_timeout_ms = 500;
    config.shutdown.reply_timeout_ms = 500;
    config
}
