use clap::Parser;

/// Single-threaded TCP data-logging daemon.
#[derive(Parser, Debug)]
#[command(name = "telemetryd", version, about = "Framed TCP data-logging daemon")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 12345)]
    pub port: u16,

    /// Sink name, optionally followed by `:options` (e.g. `bintxt:/var/log/telemetry.bin`).
    #[arg(short = 'o', long = "sink", default_value = "bintxt")]
    pub sink: String,
}

impl Cli {
    /// Splits `--sink NAME[:OPTS]` into its name and options parts. Absent
    /// options yield an empty string, which sinks treat as "use my default".
    pub fn parse_sink(&self) -> (&str, &str) {
        match self.sink.split_once(':') {
            Some((name, opts)) => (name, opts),
            None => (self.sink.as_str(), ""),
        }
    }
}
