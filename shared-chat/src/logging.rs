use std::io::{self, IsTerminal};

use tracing_subscriber::{EnvFilter, fmt};

/// Client logs go to stderr so stdout carries only chat output. Anything the
/// user should see is printed by the session itself, so only errors are logged by default.
pub fn init_client() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .try_init();
}

pub fn init_server() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(io::stdout().is_terminal())
        .try_init();
}
