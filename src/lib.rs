//! Tracepoint handler injection.
//!
//! This library plants a hand-assembled ARM trampoline at a fixed, near-null address and
//! redirects control into it. The trampoline calls back into the process and then exits
//! with status 77. Linux only.
//!
//! It is organized into several modules:
//! - `arch`: Per-architecture templates, pointer widths and default addresses.
//! - `trampoline`: Template plus callback pointer, as a fixed-layout buffer.
//! - `region`: Mapping a read/write/execute page at an exact address.
//! - `injector`: Writing a trampoline into that page.
//! - `redirect`: The end-to-end run and the jump into the page.
//! - `config`: CLI configuration.

pub mod arch;
pub mod config;
pub mod injector;
pub mod redirect;
pub mod region;
pub mod trampoline;
pub mod utils;
