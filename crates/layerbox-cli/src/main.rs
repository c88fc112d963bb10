//! # lbx: the layerbox CLI
//!
//! Daemon-less container runtime.
//! Single binary for building images and running, inspecting, and
//! removing containers.

#![allow(clippy::print_stdout)]

mod commands;
mod limits;
mod output;

use clap::Parser;

use crate::commands::{Cli, LogFormat};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_format);
    commands::execute(cli)
}

/// Installs the stderr subscriber; `RUST_LOG` overrides the default
/// `warn` level.
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
