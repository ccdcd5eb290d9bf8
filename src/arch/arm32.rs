//! ARMv7 (A32) architecture backend.
//!
//! Implements the `Architecture` trait for 32-bit ARM Linux.

use super::{Architecture, PointerOverflow, TEMPLATE_LEN};

// Linux EABI `exit`, passed in r7.
const SYS_EXIT: u32 = 1;

// Some 32-bit kernels refuse to map page zero even with `vm.mmap_min_addr = 0`.
const DEFAULT_ADDRESS: u64 = 0x2000;

//    0:   e59f000c        ldr     r0, [pc, #12]   ; pointer slot at 0x14
//    4:   e12fff30        blx     r0
//    8:   e3a0004d        mov     r0, #77
//    c:   e3a07001        mov     r7, #1
//   10:   ef000000        svc     0x00000000
#[rustfmt::skip]
const TEMPLATE: [u8; TEMPLATE_LEN] = [
    0x0c, 0x00, 0x9f, 0xe5,
    0x30, 0xff, 0x2f, 0xe1,
    0x4d, 0x00, 0xa0, 0xe3,
    0x01, 0x70, 0xa0, 0xe3,
    0x00, 0x00, 0x00, 0xef,
];

/// The 32-bit ARM backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm32;

impl Architecture for Arm32 {
    fn name(&self) -> &'static str {
        "arm32"
    }

    fn target_arch(&self) -> &'static str {
        "arm"
    }

    fn pointer_width(&self) -> usize {
        4
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
        let word = u32::try_from(addr).map_err(|_| PointerOverflow {
            callback: addr,
            width: 4,
            arch: self.name(),
        })?;
        out.copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    fn decode_pointer(&self, bytes: &[u8]) -> u64 {
        let mut word = [0u8; 4];
        word.copy_from_slice(bytes);
        u32::from_le_bytes(word) as u64
    }
}
