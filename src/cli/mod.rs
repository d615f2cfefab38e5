use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "securerails")]
#[command(about = "Batch transport checkpoint tracking for the SecureRails portal")]
#[command(long_about = "SecureRails tracks vendor batches from dispatch through three in-transit \
                       checkpoints to delivery, gated by QR identity checks and geolocation. \
                       Start the portal API with 'securerails serve'.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the transporter portal HTTP API
    Serve {
        /// Override the configured port
        #[arg(long, help = "Port to listen on (defaults to server.port)")]
        port: Option<u16>,
    },
    /// Write a default securerails.toml in the current directory
    Init {
        /// Overwrite an existing configuration file
        #[arg(long, help = "Overwrite an existing securerails.toml")]
        force: bool,
    },
    /// Load vendor batches and transporter accounts from a TOML file
    Seed {
        /// Seed file with [[batches]] and [[transporters]] tables
        file: PathBuf,
    },
    /// Show the transport logs and receipts recorded for a batch
    Status {
        /// Batch identifier
        batch: String,
    },
    /// Resolve a fixed position to a display address
    Locate {
        /// Latitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        /// Longitude in degrees
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
}
