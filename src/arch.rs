//! Architecture abstraction.
//!
//! This module defines the `Architecture` trait, which encapsulates everything that differs
//! between the supported instruction sets: the trampoline template, the width of the callback
//! pointer patched in after it, and the address the trampoline is planted at by default.
//! The mapper, builder and injector stay generic over it.

use clap::ValueEnum;
use thiserror::Error;

pub mod arm32;
pub mod arm64;

pub use arm32::Arm32;
pub use arm64::Arm64;

/// Length in bytes of every instruction template (five 32-bit instructions).
pub const TEMPLATE_LEN: usize = 20;

/// Status the injected code passes to the `exit` system call.
pub const EXIT_STATUS: i32 = 77;

/// Widest callback pointer any profile patches in.
pub const MAX_POINTER_WIDTH: usize = 8;

/// A callback address that cannot be represented at a profile's pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("callback 0x{callback:x} does not fit in a {width}-byte {arch} pointer")]
pub struct PointerOverflow {
    pub callback: u64,
    pub width: usize,
    pub arch: &'static str,
}

/// A trait representing a target instruction set (e.g., ARMv7, AArch64).
pub trait Architecture {
    /// Human readable profile name.
    fn name(&self) -> &'static str;

    /// The `std::env::consts::ARCH` value of hosts that can execute the template.
    fn target_arch(&self) -> &'static str;

    /// Width of a code pointer in bytes.
    fn pointer_width(&self) -> usize;

    /// The trampoline body: load the pointer stored right after the last instruction,
    /// branch-with-link to it, then `exit(EXIT_STATUS)` through a raw system call.
    fn template(&self) -> &'static [u8; TEMPLATE_LEN];

    /// Address the tracepoint handler page is mapped at unless overridden.
    fn default_address(&self) -> u64;

    /// System call number of `exit` encoded in the template.
    fn exit_syscall(&self) -> u32;

    /// Encodes `addr` into `out` in the target's byte order.
    ///
    /// `out` must be exactly `pointer_width()` bytes long. Addresses wider than the
    /// profile's pointers are rejected, never truncated.
    fn encode_pointer(&self, addr: u64, out: &mut [u8]) -> Result<(), PointerOverflow>;

    /// Decodes a pointer previously written by `encode_pointer`.
    fn decode_pointer(&self, bytes: &[u8]) -> u64;

    /// Whether the current process can execute this profile's template.
    fn is_host(&self) -> bool {
        self.target_arch() == std::env::consts::ARCH
    }
}

/// Runtime selection of an architecture profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// 32-bit ARM (ARMv7, A32 encoding).
    Arm32,
    /// 64-bit ARM (ARMv8, A64 encoding).
    Arm64,
}

impl Profile {
    /// The profile matching the architecture this binary was compiled for, if any.
    pub fn host() -> Option<Self> {
        if cfg!(target_arch = "aarch64") {
            Some(Profile::Arm64)
        } else if cfg!(target_arch = "arm") {
            Some(Profile::Arm32)
        } else {
            None
        }
    }
}
