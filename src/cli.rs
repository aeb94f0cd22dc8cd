use clap::{Parser, Subcommand};

/// Sensor Relay - live EMG and thermal telemetry relay
#[derive(Parser)]
#[command(name = "sensor-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay (default)
    Serve {
        /// Override RELAY_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration and exit
    Config,
}
