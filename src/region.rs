//! Fixed-address page mapping.
//!
//! The tracepoint handler page must live at exactly the requested address, which may be
//! page zero. The page is backed by an anonymous shared memory object mapped twice:
//!
//! - read/write/execute at the fixed address, which is where control is redirected, and
//! - read/write wherever the kernel likes, which is the only view Rust code touches.
//!
//! That keeps every slice in this crate pointing at ordinary memory even when the fixed
//! address is null.
//!
//! Neither mapping is ever released; the process ends inside the injected code.

use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd};
use thiserror::Error;

use crate::utils::align_up;

/// The system page size.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        0x1000
    } else {
        size as usize
    }
}

/// Failure to obtain memory at the requested fixed address.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("address 0x{address:x} is not aligned to the {page_size}-byte page size")]
    Misaligned { address: u64, page_size: usize },

    #[error("address 0x{0:x} is outside this process's address space")]
    OutOfRange(u64),

    #[error("refusing to map an empty region")]
    EmptyRegion,

    #[error("failed to create the backing memory object: {0}")]
    Backing(io::Error),

    #[error("mmap of {len} bytes at 0x{address:x} failed: {error}")]
    Map {
        address: u64,
        len: usize,
        error: io::Error,
    },

    #[error("requested 0x{requested:x} but the kernel placed the mapping at 0x{obtained:x}")]
    Relocated { requested: u64, obtained: u64 },
}

/// A page mapped read/write/execute at a fixed virtual address.
pub struct Region {
    base: u64,
    view: MmapMut,
}

impl Region {
    /// Maps `size` bytes (rounded up to whole pages) at exactly `address`.
    ///
    /// Fails rather than accepting any other address; an address that is already mapped,
    /// or below `vm.mmap_min_addr` without the privilege to go there, is an error.
    pub fn map_fixed(address: u64, size: usize) -> Result<Self, MappingError> {
        let page_size = page_size();
        if size == 0 {
            return Err(MappingError::EmptyRegion);
        }
        if address % page_size as u64 != 0 {
            return Err(MappingError::Misaligned { address, page_size });
        }
        let fixed = usize::try_from(address).map_err(|_| MappingError::OutOfRange(address))?;
        let len = align_up(size, page_size);

        let backing = anonymous_backing()?;
        backing.set_len(len as u64).map_err(MappingError::Backing)?;

        let ptr = unsafe {
            libc::mmap(
                fixed as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_SHARED | libc::MAP_FIXED_NOREPLACE,
                backing.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MappingError::Map {
                address,
                len,
                error: io::Error::last_os_error(),
            });
        }

        // Kernels older than 4.17 treat MAP_FIXED_NOREPLACE as a hint.
        let obtained = ptr as usize as u64;
        if obtained != address {
            unsafe { libc::munmap(ptr, len) };
            return Err(MappingError::Relocated { requested: address, obtained });
        }

        let view = unsafe { MmapOptions::new().len(len).map_mut(&backing) };
        let view = unmap_on_error(view, ptr, len)?;

        tracing::debug!("mapped {} bytes at 0x{:x} (view at {:p})", len, address, view.as_ptr());
        Ok(Self { base: address, view })
    }

    /// The fixed address the page is executable at.
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Current contents of the page.
    pub fn bytes(&self) -> &[u8] {
        &self.view
    }

    /// Writable view of the page; writes are visible at `base()`.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.view
    }

    /// Makes the first `len` bytes written through the view visible to instruction fetch at
    /// `base()`.
    pub fn sync_icache(&self, len: usize) {
        let len = len.min(self.len());

        #[cfg(any(target_arch = "aarch64", target_arch = "arm"))]
        unsafe {
            extern "C" {
                fn __clear_cache(beg: *mut libc::c_void, end: *mut libc::c_void);
            }
            let begin = self.base as usize;
            __clear_cache(begin as *mut libc::c_void, (begin + len) as *mut libc::c_void);
        }

        // Instruction fetch is coherent with data writes elsewhere.
        #[cfg(not(any(target_arch = "aarch64", target_arch = "arm")))]
        let _ = len;
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("base", &format_args!("0x{:x}", self.base))
            .field("len", &self.len())
            .finish()
    }
}

/// Releases the fixed mapping at `ptr` if the rest of the setup failed.
fn unmap_on_error<T>(
    result: io::Result<T>,
    ptr: *mut libc::c_void,
    len: usize,
) -> Result<T, MappingError> {
    result.map_err(|error| {
        unsafe { libc::munmap(ptr, len) };
        MappingError::Backing(error)
    })
}

fn anonymous_backing() -> Result<File, MappingError> {
    let fd = unsafe { libc::memfd_create(c"tpinject-handler".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(MappingError::Backing(io::Error::last_os_error()));
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    const RESERVED_PAGES: usize = 256;

    static RESERVATION: OnceLock<usize> = OnceLock::new();
    static NEXT_PAGE: AtomicUsize = AtomicUsize::new(0);

    /// Hands out `len` bytes of address space no other test will be given.
    ///
    /// Addresses come from one `PROT_NONE` block reserved for the whole test binary. Each
    /// call carves off its own pages and releases only those, just before the caller maps
    /// them.
    pub(crate) fn free_address(len: usize) -> u64 {
        let page = page_size();
        let base = *RESERVATION.get_or_init(|| {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    RESERVED_PAGES * page,
                    libc::PROT_NONE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                    -1,
                    0,
                )
            };
            assert_ne!(ptr, libc::MAP_FAILED, "mmap failed");
            ptr as usize
        });

        let pages = align_up(len, page) / page;
        let first = NEXT_PAGE.fetch_add(pages, Ordering::Relaxed);
        assert!(first + pages <= RESERVED_PAGES, "test address reservation exhausted");

        let address = base + first * page;
        unsafe { libc::munmap(address as *mut libc::c_void, pages * page) };
        address as u64
    }

    #[test]
    fn test_addresses_do_not_overlap() {
        let a = free_address(page_size());
        let b = free_address(2 * page_size());
        let c = free_address(page_size());
        assert!(a + page_size() as u64 <= b || b + 2 * page_size() as u64 <= a);
        assert!(b + 2 * page_size() as u64 <= c || c + page_size() as u64 <= b);
        assert_ne!(a, c);
    }

    fn mmap_min_addr() -> Option<u64> {
        std::fs::read_to_string("/proc/sys/vm/mmap_min_addr")
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    #[test]
    fn maps_exactly_at_requested_address() {
        let address = free_address(page_size());
        let region = Region::map_fixed(address, page_size()).expect("map_fixed");
        assert_eq!(region.base(), address);
        assert_eq!(region.len(), page_size());
        assert!(region.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn size_is_rounded_up_to_whole_pages() {
        let address = free_address(2 * page_size());
        let region = Region::map_fixed(address, page_size() + 1).expect("map_fixed");
        assert_eq!(region.len(), 2 * page_size());
    }

    #[test]
    fn writes_through_view_are_visible_at_fixed_address() {
        let address = free_address(page_size());
        let mut region = Region::map_fixed(address, page_size()).expect("map_fixed");
        region.bytes_mut()[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        region.sync_icache(4);

        let fixed = unsafe { std::slice::from_raw_parts(address as usize as *const u8, 4) };
        assert_eq!(fixed, &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&region.bytes()[..4], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn occupied_address_is_refused() {
        let address = free_address(page_size());
        let _first = Region::map_fixed(address, page_size()).expect("map_fixed");
        match Region::map_fixed(address, page_size()) {
            Err(MappingError::Map { error, .. }) => {
                assert_eq!(error.raw_os_error(), Some(libc::EEXIST))
            }
            Err(MappingError::Relocated { requested, obtained }) => {
                assert_eq!(requested, address);
                assert_ne!(obtained, address);
            }
            other => panic!("expected a mapping error, got {other:?}"),
        }
    }

    #[test]
    fn failed_view_releases_fixed_mapping() {
        let address = free_address(page_size());
        let ptr = unsafe {
            libc::mmap(
                address as usize as *mut libc::c_void,
                page_size(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };
        assert_eq!(ptr as usize as u64, address, "mmap failed");

        let err = unmap_on_error::<()>(Err(io::Error::other("view failed")), ptr, page_size())
            .unwrap_err();
        assert!(matches!(err, MappingError::Backing(_)));

        // The address is free again.
        let region = Region::map_fixed(address, page_size()).expect("map_fixed after release");
        assert_eq!(region.base(), address);
    }

    #[test]
    fn misaligned_address_is_refused() {
        let err = Region::map_fixed(0x2001, page_size()).unwrap_err();
        assert!(matches!(err, MappingError::Misaligned { address: 0x2001, .. }));
    }

    #[test]
    fn empty_region_is_refused() {
        let err = Region::map_fixed(0x2000, 0).unwrap_err();
        assert!(matches!(err, MappingError::EmptyRegion));
    }

    #[test]
    fn near_null_without_privilege_is_refused() {
        let privileged = unsafe { libc::geteuid() } == 0;
        match mmap_min_addr() {
            Some(min) if min > 0 && !privileged => {
                let err = Region::map_fixed(0, page_size()).unwrap_err();
                assert!(matches!(err, MappingError::Map { address: 0, .. }), "{err}");
            }
            _ => eprintln!("skipping: near-null mappings are permitted here"),
        }
    }
}
