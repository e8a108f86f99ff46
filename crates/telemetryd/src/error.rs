use thiserror::Error;

/// Startup and fatal runtime errors surfaced by `main`. Per-connection and
/// per-frame errors never reach this type; they're logged and handled
/// inside the event loop.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to bind listener: {0}")]
    Bind(std::io::Error),
    #[error("unknown sink '{0}'")]
    UnknownSink(String),
    #[error("sink '{name}' failed to open with options '{options}'")]
    SinkOpenFailed { name: String, options: String },
    #[error("failed to install signal handler: {0}")]
    SignalHandler(std::io::Error),
    #[error("event loop failed: {0}")]
    EventLoop(std::io::Error),
}
