//! Control-flow redirection.
//!
//! Drives a whole run: map the tracepoint handler page, inject a trampoline that calls
//! [`tracepoint_callback`], then branch into the page as if a tracepoint had fired there.
//! The trampoline ends the process with `exit(77)`, so a successful run never comes back.

use anyhow::{bail, Context, Result};
use std::io::Write;
use tracing::info;

use crate::arch::{Architecture, EXIT_STATUS};
use crate::injector::Injector;
use crate::region::page_size;

/// Line printed by [`tracepoint_callback`].
pub const CALLBACK_LINE: &str = "instrumentation callback invoked";

/// Stand-in instrumentation: any ordinary function already present in the process.
pub extern "C" fn tracepoint_callback() {
    println!("{CALLBACK_LINE}");
}

/// How a run is carried out.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Where to map the handler page; the profile's default address when `None`.
    pub address: Option<u64>,
    /// Stop after injecting instead of redirecting control.
    pub no_jump: bool,
}

/// Maps, injects and, unless `no_jump` is set, redirects control into the injected code.
///
/// Returns only when `no_jump` is set or something failed before any code was injected.
pub fn run<A: Architecture>(arch: A, options: &RunOptions) -> Result<()> {
    let address = options.address.unwrap_or_else(|| arch.default_address());
    info!("profile: {}", arch.name());
    info!("desired address: 0x{:x}", address);
    info!("page size: {}", page_size());
    info!(
        "trampoline exits through syscall {} with status {}",
        arch.exit_syscall(),
        EXIT_STATUS
    );

    if !options.no_jump && !arch.is_host() {
        bail!(
            "{} code cannot run on a {} host; use --no-jump to only inject",
            arch.name(),
            std::env::consts::ARCH
        );
    }

    let mut injector = Injector::new(arch, address)
        .with_context(|| format!("failed to map the tracepoint handler page at 0x{address:x}"))?;
    info!("obtained address: 0x{:x}", injector.region().base());

    let callback = tracepoint_callback as extern "C" fn() as usize as u64;
    info!("callback address: 0x{:x}", callback);

    injector
        .inject(callback)
        .context("failed to build the tracepoint handler trampoline")?;
    if let Some(dump) = injector.dump() {
        info!("tracepoint handler memory contents: {}", dump);
    }

    if options.no_jump {
        info!("not redirecting control");
        return Ok(());
    }

    let entry = injector.entry();
    info!("redirecting control to 0x{:x}", entry);
    std::io::stdout().flush().context("failed to flush stdout")?;

    redirect(entry)
}

#[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
fn redirect(entry: u64) -> Result<()> {
    // The injected trampoline was written for this host by `run`.
    unsafe { jump_to(entry) }
}

#[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
fn redirect(_entry: u64) -> Result<()> {
    bail!("no redirect primitive for {}", std::env::consts::ARCH)
}

/// Branches to `address` without saving a return address.
///
/// # Safety
/// `address` must hold a complete instruction sequence for this host that never falls
/// through or returns, such as a trampoline written by [`Injector::inject`].
#[cfg(target_arch = "aarch64")]
pub unsafe fn jump_to(address: u64) -> ! {
    core::arch::asm!("br {target}", target = in(reg) address, options(noreturn))
}

/// Branches to `address` without saving a return address. The target is entered in A32 state.
///
/// # Safety
/// `address` must hold a complete instruction sequence for this host that never falls
/// through or returns, such as a trampoline written by [`Injector::inject`].
#[cfg(target_arch = "arm")]
pub unsafe fn jump_to(address: u64) -> ! {
    core::arch::asm!("bx {target}", target = in(reg) address as u32, options(noreturn))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arm32, Arm64};
    use crate::region::tests::free_address;

    #[test]
    fn no_jump_run_injects_and_returns() {
        let options = RunOptions {
            address: Some(free_address(page_size())),
            no_jump: true,
        };
        run(Arm64, &options).expect("run without redirect");
    }

    #[test]
    fn foreign_profile_is_refused_before_mapping() {
        // Misaligned on purpose: reaching the mapper would fail differently.
        let options = RunOptions { address: Some(0x2001), no_jump: false };
        let err = if Arm64.is_host() {
            run(Arm32, &options)
        } else {
            run(Arm64, &options)
        }
        .unwrap_err();
        assert!(err.to_string().contains("cannot run"), "{err:#}");
    }

    #[test]
    fn arm32_run_refuses_callback_above_4gib() {
        let options = RunOptions {
            address: Some(free_address(page_size())),
            no_jump: true,
        };
        let callback = tracepoint_callback as extern "C" fn() as usize as u64;
        let result = run(Arm32, &options);
        if callback > u32::MAX as u64 {
            let err = result.unwrap_err();
            assert!(format!("{err:#}").contains("does not fit in a 4-byte arm32 pointer"), "{err:#}");
        } else {
            result.expect("arm32 run with a 32-bit callback");
        }
    }

    #[test]
    fn mapping_failure_is_reported_with_address() {
        let options = RunOptions { address: Some(0x2001), no_jump: true };
        let err = run(Arm32, &options).unwrap_err();
        assert!(format!("{err:#}").contains("0x2001"), "{err:#}");
    }
}
