//! # Virtual Memory Interface
//!
//! Thin platform layer over the OS virtual-memory lifecycle:
//!
//! - **reserve** claims address space without physical backing
//! - **commit** attaches physical backing to reserved pages
//! - **decommit** detaches backing while keeping the reservation
//! - **release** returns the address space itself
//!
//! All platforms present identical observable behavior: reserve never implies
//! commit, commit is idempotent over already-committed ranges, and decommit
//! preserves the reservation.
//!
//! | Operation | unix | windows |
//! |-----------|------|---------|
//! | reserve | `mmap(MAP_PRIVATE\|MAP_ANONYMOUS)` | `VirtualAlloc(MEM_RESERVE)` |
//! | commit | no-op (commit on first touch) | `VirtualAlloc(MEM_COMMIT)` |
//! | decommit | `madvise(MADV_DONTNEED)` | `VirtualFree(MEM_DECOMMIT)` |
//! | release | `munmap` | `VirtualFree(MEM_RELEASE)` |

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::alloc::AllocError;
use crate::log;

/// Size of one OS page in bytes. Cached after the first query.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(imp::query_page_size)
}

/// Alignment the OS uses for the base of new reservations.
///
/// On unix this equals the page size; on windows it is the allocation
/// granularity (usually 64 KiB).
pub fn allocation_granularity() -> usize {
    static GRANULARITY: OnceLock<usize> = OnceLock::new();
    *GRANULARITY.get_or_init(imp::query_granularity)
}

/// Reserve `size` bytes of address space with no physical backing.
pub fn reserve(size: usize) -> Result<NonNull<u8>, AllocError> {
    match imp::reserve(size) {
        Some(base) => {
            log::LogBuilder::new(log::LogLevel::Trace)
                .target("vmem")
                .message("reserved address space")
                .field_int("bytes", size as i64)
                .emit();
            Ok(base)
        }
        None => {
            log::LogBuilder::new(log::LogLevel::Warn)
                .target("vmem")
                .message("address space reservation failed")
                .field_int("bytes", size as i64)
                .emit();
            Err(AllocError { size })
        }
    }
}

/// Attach physical backing to `size` bytes starting at `ptr`.
///
/// Idempotent over already-committed pages. A no-op on platforms that commit
/// on first touch.
///
/// # Safety
///
/// The range must lie within a reservation obtained from [`reserve`].
pub unsafe fn commit(ptr: NonNull<u8>, size: usize) -> bool {
    // Safety: forwarded contract.
    unsafe { imp::commit(ptr, size) }
}

/// Release physical backing for the range while keeping the reservation.
///
/// # Safety
///
/// The range must lie within a reservation obtained from [`reserve`].
pub unsafe fn decommit(ptr: NonNull<u8>, size: usize) -> bool {
    // Safety: forwarded contract.
    let ok = unsafe { imp::decommit(ptr, size) };
    if !ok {
        log::LogBuilder::new(log::LogLevel::Warn)
            .target("vmem")
            .message("decommit failed")
            .field_int("bytes", size as i64)
            .emit();
    }
    ok
}

/// Return the whole reservation to the OS.
///
/// # Safety
///
/// `ptr` and `size` must describe exactly the reservation obtained from
/// [`reserve`]; no address inside it may be used afterwards.
pub unsafe fn release(ptr: NonNull<u8>, size: usize) {
    // Safety: forwarded contract.
    unsafe { imp::release(ptr, size) }
}

// ============================================================================
// unix
// ============================================================================

#[cfg(unix)]
mod imp {
    use std::ptr::{self, NonNull};

    pub(super) fn query_page_size() -> usize {
        // Safety: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size < 1 {
            panic!("unsupported page size {size}");
        }
        size as usize
    }

    pub(super) fn query_granularity() -> usize {
        // mmap aligns reservation bases to the page size.
        query_page_size()
    }

    pub(super) fn reserve(size: usize) -> Option<NonNull<u8>> {
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        #[cfg(target_os = "linux")]
        let flags = flags | libc::MAP_NORESERVE;
        // Safety: anonymous mapping, no file descriptor involved.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(base.cast())
        }
    }

    pub(super) unsafe fn commit(_ptr: NonNull<u8>, _size: usize) -> bool {
        // Anonymous mappings commit on first touch.
        true
    }

    pub(super) unsafe fn decommit(ptr: NonNull<u8>, size: usize) -> bool {
        // Safety: caller guarantees the range lies within a live mapping.
        unsafe { libc::madvise(ptr.as_ptr().cast(), size, libc::MADV_DONTNEED) == 0 }
    }

    pub(super) unsafe fn release(ptr: NonNull<u8>, size: usize) {
        // Safety: caller guarantees `ptr`/`size` describe the whole mapping.
        unsafe {
            libc::munmap(ptr.as_ptr().cast(), size);
        }
    }
}

// ============================================================================
// windows
// ============================================================================

#[cfg(windows)]
mod imp {
    use std::mem;
    use std::ptr::{self, NonNull};

    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, VirtualFree, MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE,
        PAGE_READWRITE,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    fn system_info() -> SYSTEM_INFO {
        // Safety: GetSystemInfo fills the struct and cannot fail.
        unsafe {
            let mut info: SYSTEM_INFO = mem::zeroed();
            GetSystemInfo(&mut info);
            info
        }
    }

    pub(super) fn query_page_size() -> usize {
        system_info().dwPageSize as usize
    }

    pub(super) fn query_granularity() -> usize {
        system_info().dwAllocationGranularity as usize
    }

    pub(super) fn reserve(size: usize) -> Option<NonNull<u8>> {
        // Safety: reserving fresh address space has no preconditions.
        let base = unsafe { VirtualAlloc(ptr::null(), size, MEM_RESERVE, PAGE_READWRITE) };
        NonNull::new(base.cast())
    }

    pub(super) unsafe fn commit(ptr: NonNull<u8>, size: usize) -> bool {
        // Safety: caller guarantees the range lies within a reservation.
        let base = unsafe { VirtualAlloc(ptr.as_ptr().cast(), size, MEM_COMMIT, PAGE_READWRITE) };
        !base.is_null()
    }

    pub(super) unsafe fn decommit(ptr: NonNull<u8>, size: usize) -> bool {
        // Safety: caller guarantees the range lies within a reservation.
        unsafe { VirtualFree(ptr.as_ptr().cast(), size, MEM_DECOMMIT) != 0 }
    }

    pub(super) unsafe fn release(ptr: NonNull<u8>, _size: usize) {
        // VirtualFree requires size zero when releasing a whole reservation.
        // Safety: caller guarantees `ptr` is the reservation base.
        unsafe {
            VirtualFree(ptr.as_ptr().cast(), 0, MEM_RELEASE);
        }
    }
}
