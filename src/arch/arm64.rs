//! AArch64 (A64) architecture backend.
//!
//! Implements the `Architecture` trait for 64-bit ARM Linux.

use super::{Architecture, PointerOverflow, TEMPLATE_LEN};

// Generic syscall table `exit`, passed in x8.
const SYS_EXIT: u32 = 93;

const DEFAULT_ADDRESS: u64 = 0x0;

//    0:   580000a0        ldr     x0, 0x14        ; pointer slot
//    4:   d63f0000        blr     x0
//    8:   d28009a0        mov     x0, #0x4d
//    c:   d2800ba8        mov     x8, #0x5d
//   10:   d4000001        svc     #0x0
#[rustfmt::skip]
const TEMPLATE: [u8; TEMPLATE_LEN] = [
    0xa0, 0x00, 0x00, 0x58,
    0x00, 0x00, 0x3f, 0xd6,
    0xa0, 0x09, 0x80, 0xd2,
    0xa8, 0x0b, 0x80, 0xd2,
    0x01, 0x00, 0x00, 0xd4,
];

/// The AArch64 backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm64;

impl Architecture for Arm64 {
    fn name(&self) -> &'static str {
        "arm64"
    }

    fn target_arch(&self) -> &'static str {
        "aarch64"
    }

    fn pointer_width(&self) -> usize {
        8
    }

    fn template(&self) -> &'static [u8; TEMPLATE_LEN] {
        &TEMPLATE
    }

    fn default_address(&self) -> u64 {
        DEFAULT_ADDRESS
    }

    fn exit_syscall(&self) -> u32 {
        SYS_EXIT
    }

    fn encode_pointer(&self, addr: u64, out: &mut [u8]) -> Result<(), PointerOverflow> {
        out.copy_from_slice(&addr.to_le_bytes());
        Ok(())
    }

    fn decode_pointer(&self, bytes: &[u8]) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        u64::from_le_bytes(word)
    }
}
