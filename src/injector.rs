//! Trampoline injection.
//!
//! The `Injector` owns the tracepoint handler page for the rest of the process lifetime:
//! it maps the page, writes the trampoline for a callback into it and can render what was
//! written for diagnostics.

use crate::arch::{Architecture, PointerOverflow};
use crate::region::{page_size, MappingError, Region};
use crate::trampoline::{Trampoline, TEMPLATE_OFFSET};

/// Bytes per group in `Injector::dump`.
const DUMP_GROUP: usize = 4;

pub struct Injector<A: Architecture> {
    arch: A,
    region: Region,
    trampoline: Option<Trampoline>,
}

impl<A: Architecture> Injector<A> {
    /// Maps one system page at `address` for `arch`'s trampoline.
    pub fn new(arch: A, address: u64) -> Result<Self, MappingError> {
        let region = Region::map_fixed(address, page_size())?;
        Ok(Self {
            arch,
            region,
            trampoline: None,
        })
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Address control must be redirected to in order to run the trampoline.
    pub fn entry(&self) -> u64 {
        self.region.base() + TEMPLATE_OFFSET as u64
    }

    /// Writes the trampoline calling `callback` at the start of the page, replacing
    /// whatever was there. The page is left untouched if `callback` does not fit the
    /// profile's pointer width.
    pub fn inject(&mut self, callback: u64) -> Result<&Trampoline, PointerOverflow> {
        let trampoline = Trampoline::build(&self.arch, callback)?;
        let len = trampoline.len();
        assert!(
            self.region.len() >= len,
            "{}-byte region cannot hold a {}-byte trampoline",
            self.region.len(),
            len
        );

        self.region.bytes_mut()[..len].copy_from_slice(trampoline.as_bytes());
        self.region.sync_icache(len);
        tracing::debug!(
            "injected {} trampoline ({} bytes) at 0x{:x} calling 0x{:x}",
            self.arch.name(),
            len,
            self.region.base(),
            callback
        );

        Ok(self.trampoline.insert(trampoline))
    }

    /// The last injected trampoline, if any.
    pub fn trampoline(&self) -> Option<&Trampoline> {
        self.trampoline.as_ref()
    }

    /// Reads the injected bytes back out of the page.
    pub fn written(&self) -> Option<&[u8]> {
        let len = self.trampoline.as_ref()?.len();
        Some(&self.region.bytes()[..len])
    }

    /// Hex rendering of the injected bytes in 4-byte groups, e.g. `a0000058 00003fd6 ...`.
    pub fn dump(&self) -> Option<String> {
        self.written().map(hex_groups)
    }
}

fn hex_groups(bytes: &[u8]) -> String {
    bytes
        .chunks(DUMP_GROUP)
        .map(|group| group.iter().map(|b| format!("{b:02x}")).collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}
