//! Entry point for tpinject.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Set up `tracing` output on stderr.
//! 3. Pick the architecture profile (the host's unless overridden).
//! 4. Map, inject and redirect. A successful run exits with status 77 from inside the
//!    injected code and never returns here.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tpinject::arch::{Arm32, Arm64, Profile};
use tpinject::config::Config;
use tpinject::redirect;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let profile = config
        .profile
        .or_else(Profile::host)
        .with_context(|| format!("no profile for {} hosts; pass --profile", std::env::consts::ARCH))?;

    let options = config.run_options();
    match profile {
        Profile::Arm32 => redirect::run(Arm32, &options)?,
        Profile::Arm64 => redirect::run(Arm64, &options)?,
    }

    Ok(())
}
