//! Trampoline construction.
//!
//! A trampoline is the exact byte sequence planted in the tracepoint handler page:
//! the architecture template followed by the callback address it loads.
//!
//! ```text
//! TEMPLATE_OFFSET                 POINTER_OFFSET
//! | ldr | blr | mov | mov | svc  | callback (4 or 8 bytes) |
//! ```

use crate::arch::{Architecture, PointerOverflow, MAX_POINTER_WIDTH, TEMPLATE_LEN};

/// Offset of the instruction template within a trampoline.
pub const TEMPLATE_OFFSET: usize = 0;

/// Offset of the callback pointer slot; the template's literal load reads from here.
pub const POINTER_OFFSET: usize = TEMPLATE_OFFSET + TEMPLATE_LEN;

/// Size of the largest trampoline any profile produces.
pub const CAPACITY: usize = POINTER_OFFSET + MAX_POINTER_WIDTH;

/// The bytes written into the tracepoint handler page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trampoline {
    buf: [u8; CAPACITY],
    len: usize,
}

impl Trampoline {
    /// Concatenates `arch`'s template with `callback` encoded at pointer width.
    ///
    /// Pure: the same inputs always produce the same bytes. Fails if `callback` is wider
    /// than the profile's pointers.
    pub fn build<A: Architecture>(arch: &A, callback: u64) -> Result<Self, PointerOverflow> {
        let width = arch.pointer_width();
        assert!(width <= MAX_POINTER_WIDTH, "{} pointers are {} bytes", arch.name(), width);

        let mut buf = [0u8; CAPACITY];
        buf[TEMPLATE_OFFSET..POINTER_OFFSET].copy_from_slice(arch.template());
        arch.encode_pointer(callback, &mut buf[POINTER_OFFSET..POINTER_OFFSET + width])?;

        Ok(Self {
            buf,
            len: POINTER_OFFSET + width,
        })
    }

    /// The trampoline bytes, template first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The instruction template prefix.
    pub fn template(&self) -> &[u8] {
        &self.buf[TEMPLATE_OFFSET..POINTER_OFFSET]
    }

    /// The encoded callback pointer suffix.
    pub fn pointer_slot(&self) -> &[u8] {
        &self.buf[POINTER_OFFSET..self.len]
    }

    /// Decodes the callback address from the pointer slot.
    pub fn callback(&self) -> u64 {
        // Both profiles store pointers little-endian.
        let mut word = [0u8; MAX_POINTER_WIDTH];
        word[..self.len - POINTER_OFFSET].copy_from_slice(self.pointer_slot());
        u64::from_le_bytes(word)
    }
}
