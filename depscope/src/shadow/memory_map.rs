//! # Shadow Memory Engine
//!
//! Owns the shadow pages that hold one [`Timestamp`] per real byte of the
//! target process. Only the set of known real pages is stored; the shadow
//! location of any address is computed by [`real_to_shadow`].
//!
//! ## Mapping discipline
//!
//! Shadow pages are mapped with `MAP_FIXED_NOREPLACE`, so a shadow page can
//! never overwrite a mapping the consumer itself depends on. A conflict
//! surfaces as [`ShadowError::MapFailed`] instead of memory corruption.
//!
//! ## Lifetime
//!
//! Every page in the known set is mapped, and every mapped page is in the
//! known set. Dropping the engine unmaps all of them.

#![allow(unsafe_code)] // mmap/munmap and shadow cell access

use std::collections::HashSet;

use log::{debug, info, warn};

use super::proc_maps::{self, MemoryRange};
use super::timestamp::Timestamp;
use super::translate::{is_contiguous, real_to_shadow, RATIO};
use crate::domain::{Pid, ShadowError};

/// Shadow memory for one profiling session
pub struct ShadowMemory {
    /// Page-aligned real addresses with a live shadow page
    pages: HashSet<u64>,
    page_size: u64,
    page_mask: u64,
    heap_start: Option<u64>,
}

impl ShadowMemory {
    /// Create an empty engine using the host page size
    #[must_use]
    pub fn new() -> Self {
        let page_size = host_page_size();
        Self { pages: HashSet::new(), page_size, page_mask: !(page_size - 1), heap_start: None }
    }

    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Number of real pages currently shadowed
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    /// Start of the target's `[heap]`, if seen during [`Self::init_stack`]
    #[must_use]
    pub fn heap_start(&self) -> Option<u64> {
        self.heap_start
    }

    #[inline]
    #[must_use]
    pub fn is_allocated(&self, addr: u64) -> bool {
        self.pages.contains(&(addr & self.page_mask))
    }

    /// Shadow every page overlapping `[addr, addr + size)`.
    ///
    /// Pages already known are left alone. If any new page fails to map, the
    /// pages mapped by this call are unmapped again and nothing is recorded.
    ///
    /// Returns the shadow address of `addr`.
    ///
    /// # Errors
    /// Returns an error if the range wraps or a shadow page cannot be mapped
    pub fn allocate(&mut self, addr: u64, size: u64) -> Result<u64, ShadowError> {
        if size == 0 {
            return Ok(real_to_shadow(addr));
        }
        let last = addr.checked_add(size - 1).ok_or(ShadowError::RangeOverflow { addr, size })?;
        let first_page = addr & self.page_mask;
        let last_page = last & self.page_mask;

        let mut mapped = Vec::new();
        let mut page = first_page;
        loop {
            if !self.pages.contains(&page) {
                match self.map_shadow_page(page) {
                    Ok(()) => mapped.push(page),
                    Err(source) => {
                        let shadow = real_to_shadow(page);
                        warn!(
                            "Shadow mapping failed at 0x{shadow:x} for 0x{addr:x} (+{size} bytes), \
                             rolling back {} pages",
                            mapped.len()
                        );
                        for p in mapped {
                            self.unmap_shadow_page(p);
                        }
                        return Err(ShadowError::MapFailed { addr, size, shadow, source });
                    }
                }
            }
            if page == last_page {
                break;
            }
            page += self.page_size;
        }

        if !mapped.is_empty() {
            debug!("allocate 0x{addr:x} (+{size}): {} new shadow pages", mapped.len());
        }
        self.pages.extend(mapped);
        Ok(real_to_shadow(addr))
    }

    /// Unmap `count` contiguous shadow pages starting at real page `page`.
    ///
    /// Pages that were never shadowed are skipped.
    pub fn deallocate_pages(&mut self, page: u64, count: u64) {
        let mut p = page & self.page_mask;
        for _ in 0..count {
            if self.pages.remove(&p) {
                self.unmap_shadow_page(p);
            }
            p = p.wrapping_add(self.page_size);
        }
    }

    /// Release the shadow of every page lying entirely inside `[addr, addr + size)`.
    ///
    /// Partially covered pages may still hold other live objects and are kept.
    /// Returns the number of pages released.
    pub fn deallocate_range(&mut self, addr: u64, size: u64) -> u64 {
        let (Some(end), Some(rounded)) = (addr.checked_add(size), addr.checked_add(self.page_size - 1))
        else {
            return 0;
        };
        let first = rounded & self.page_mask;
        let stop = end & self.page_mask;
        if stop <= first {
            return 0;
        }
        let count = (stop - first) / self.page_size;
        self.deallocate_pages(first, count);
        count
    }

    /// Carry the shadow of `[src, src + size)` over to `[dst, dst + size)`.
    ///
    /// Used for `realloc`, so dependences follow the moved object.
    ///
    /// # Errors
    /// Returns an error if either range is not fully shadowed or is not
    /// contiguous in shadow space
    pub fn copy(&mut self, dst: u64, src: u64, size: u64) -> Result<(), ShadowError> {
        if size == 0 || dst == src {
            return Ok(());
        }
        for (addr, what) in [(src, "source"), (dst, "destination")] {
            if !is_contiguous(addr, size) {
                return Err(ShadowError::RangeOverflow { addr, size });
            }
            if !self.range_allocated(addr, size) {
                debug!("copy {what} 0x{addr:x} (+{size}) not shadowed");
                return Err(ShadowError::NotAllocated { addr, size });
            }
        }
        let bytes = usize::try_from(size * RATIO)
            .map_err(|_| ShadowError::RangeOverflow { addr: src, size })?;
        // SAFETY: both shadow ranges are fully mapped (checked above) and
        // contiguous; `copy` tolerates overlap.
        unsafe {
            std::ptr::copy(
                real_to_shadow(src) as *const u8,
                real_to_shadow(dst) as *mut u8,
                bytes,
            );
        }
        Ok(())
    }

    /// Read the timestamp of `addr`, or `None` if its page is not shadowed
    #[inline]
    #[must_use]
    pub fn read(&self, addr: u64) -> Option<Timestamp> {
        if !self.is_allocated(addr) {
            return None;
        }
        // SAFETY: the page is in the known set, so its shadow page is mapped
        // and the 8-aligned cell lies inside it.
        Some(unsafe { std::ptr::read(real_to_shadow(addr) as *const Timestamp) })
    }

    /// Overwrite the timestamp of `addr`. Returns `false` if its page is not
    /// shadowed.
    #[inline]
    pub fn write(&mut self, addr: u64, ts: Timestamp) -> bool {
        if !self.is_allocated(addr) {
            return false;
        }
        // SAFETY: as in `read`; `&mut self` makes this the only writer.
        unsafe { std::ptr::write(real_to_shadow(addr) as *mut Timestamp, ts) };
        true
    }

    /// Shadow the top `stack_size` bytes of the target's stack.
    ///
    /// The stack grows down from the end of its `[stack]` mapping, and the
    /// mapping itself grows at run time, so the range is anchored at the end.
    ///
    /// # Errors
    /// Returns an error if the stack cannot be located or shadowed
    pub fn init_stack(&mut self, stack_size: u64, pid: Pid) -> Result<MemoryRange, ShadowError> {
        let entries = proc_maps::read_maps(pid)?;
        self.heap_start = proc_maps::find_named(&entries, "[heap]").map(|heap| heap.start);
        let stack = proc_maps::find_named(&entries, "[stack]")
            .ok_or(ShadowError::StackNotFound { pid: pid.0 })?;

        let start = stack.end.saturating_sub(stack_size);
        self.allocate(start, stack.end - start)?;
        info!("Shadowed stack of {pid}: 0x{start:x} - 0x{:x}", stack.end);
        Ok(MemoryRange { start, end: stack.end })
    }

    fn range_allocated(&self, addr: u64, size: u64) -> bool {
        let first = addr & self.page_mask;
        let last = (addr + size - 1) & self.page_mask;
        (first..=last).step_by(self.page_size_usize()).all(|p| self.pages.contains(&p))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn page_size_usize(&self) -> usize {
        self.page_size as usize
    }

    fn shadow_len(&self) -> usize {
        self.page_size_usize() * RATIO as usize
    }

    fn map_shadow_page(&self, page: u64) -> std::io::Result<()> {
        let want = real_to_shadow(page) as *mut libc::c_void;
        // SAFETY: anonymous private mapping; MAP_FIXED_NOREPLACE refuses to
        // replace anything already mapped at `want`.
        let got = unsafe {
            libc::mmap(
                want,
                self.shadow_len(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
                -1,
                0,
            )
        };
        if got == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        if got != want {
            // Pre-4.17 kernels treat the flag as a hint and place the mapping elsewhere
            // SAFETY: `got` is the mapping we just created.
            unsafe { libc::munmap(got, self.shadow_len()) };
            return Err(std::io::Error::from_raw_os_error(libc::EEXIST));
        }
        Ok(())
    }

    fn unmap_shadow_page(&self, page: u64) {
        // SAFETY: only called for pages this engine mapped.
        let rc = unsafe { libc::munmap(real_to_shadow(page) as *mut libc::c_void, self.shadow_len()) };
        if rc != 0 {
            warn!(
                "munmap of shadow 0x{:x} failed: {}",
                real_to_shadow(page),
                std::io::Error::last_os_error()
            );
        }
    }
}

impl Default for ShadowMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ShadowMemory {
    fn drop(&mut self) {
        for page in std::mem::take(&mut self.pages) {
            self.unmap_shadow_page(page);
        }
    }
}

#[allow(clippy::cast_sign_loss)]
fn host_page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
