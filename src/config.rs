//! Configuration module.
//!
//! This module defines the command-line interface (CLI) using `clap`. Every flag is optional:
//! without any, the host profile's trampoline is planted at its default address and control
//! is redirected into it.

use clap::Parser;

use crate::arch::Profile;
use crate::redirect::RunOptions;
use crate::utils::parse_address;

/// Plants a tracepoint handler trampoline at a fixed low address and jumps into it.
///
/// On success the process exits with status 77 from inside the injected code. Mapping near
/// address zero usually needs `sysctl -w vm.mmap_min_addr=0` or equivalent privilege.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Architecture profile (defaults to the host's)
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,

    /// Address of the tracepoint handler page, hex (0x...) or decimal
    #[arg(long, value_parser = parse_address, help = "Override the profile's default address")]
    pub address: Option<u64>,

    /// Inject and dump the trampoline, but do not redirect control into it
    #[arg(long)]
    pub no_jump: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

impl Config {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            address: self.address,
            no_jump: self.no_jump,
        }
    }
}
