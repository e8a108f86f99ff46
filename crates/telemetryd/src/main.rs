mod cli;
mod error;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGHUP, SIGINT};
use telemetry_network::Server;
use telemetry_sink::{BinaryFileSink, SinkRegistry};
use tracing::{error, info};

use crate::cli::Cli;
use crate::error::DaemonError;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "daemon exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Builds the sink registry, binds the listener, arms shutdown signals, and
/// runs the event loop to completion. Split from `main` so the full startup
/// sequence returns a `Result` instead of reaching for `process::exit`.
fn run(cli: Cli) -> Result<(), DaemonError> {
    let mut registry = SinkRegistry::new();
    registry.register("bintxt", Box::new(BinaryFileSink::new()));
    info!(sinks = ?registry.names().collect::<Vec<_>>(), "registered sinks");

    let (sink_name, sink_opts) = cli.parse_sink();
    let mut sink = registry
        .take(sink_name)
        .ok_or_else(|| DaemonError::UnknownSink(sink_name.to_string()))?;
    if !sink.open(sink_opts) {
        return Err(DaemonError::SinkOpenFailed {
            name: sink_name.to_string(),
            options: sink_opts.to_string(),
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let mut server = Server::bind(addr, sink).map_err(DaemonError::Bind)?;
    info!(port = cli.port, sink = sink_name, "listening");

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&stop)).map_err(DaemonError::SignalHandler)?;
    signal_hook::flag::register(SIGHUP, Arc::clone(&stop)).map_err(DaemonError::SignalHandler)?;

    server.run(&stop).map_err(DaemonError::EventLoop)
}
