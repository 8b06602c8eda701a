//! Physical-to-virtual access for the allocator's own metadata pages.
//!
//! The free lists live *inside* free physical pages, so the allocator has
//! to dereference physical addresses long before a kernel heap exists. How
//! a physical address becomes a usable pointer differs between
//! environments (higher-half direct map, identity map, a remappable
//! window, a test buffer), so the strategy is abstracted behind
//! [`PhysMapper`].

use kernel_frames::PhysicalAddress;

/// A simple higher half direct map (HHDM) base: anything mapped at
/// [`HHDM_BASE`] + `pa` lets the kernel access physical memory via a fixed
/// offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Converts physical addresses into usable references.
///
/// The allocator routes **every** metadata access through its mapper and
/// notifies it via [`invalidate`](Self::invalidate) whenever the page
/// backing an active-list handle changes, so implementations backed by a
/// remappable window can rewrite their page-table entry and flush the
/// stale TLB entry there. Fixed-offset implementations need neither.
pub trait PhysMapper {
    /// Turns `pa` into a mutable reference.
    ///
    /// # Safety
    /// - `pa` must refer to valid, mapped, writable memory of at least
    ///   `size_of::<T>()` bytes, suitably aligned for `T`.
    /// - The caller must ensure no aliasing references to the same memory
    ///   exist while the returned borrow is live.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Called when `pa` becomes the page behind an active-list handle.
    ///
    /// Window-backed mappers remap and flush here; direct-map
    /// implementations can ignore it.
    #[inline]
    fn invalidate(&self, pa: PhysicalAddress) {
        let _ = pa;
    }
}

/// [`PhysMapper`] for kernels with a higher-half direct map.
///
/// The entire physical address space is permanently visible at
/// [`HHDM_BASE`], so translation is a fixed offset and no invalidation is
/// ever required.
pub struct HhdmMapper;

impl PhysMapper for HhdmMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (HHDM_BASE + pa.as_u64()) as *mut T;
        // SAFETY: caller guarantees the physical address is valid and the
        // HHDM covers it.
        unsafe { &mut *va }
    }
}

/// [`PhysMapper`] adding a fixed offset to every physical address.
///
/// With offset `0` this is an identity mapping (early boot, before paging
/// is rearranged). A nonzero offset lets a test harness run the allocator
/// over a plain memory buffer, treating buffer-relative positions as
/// physical addresses.
pub struct OffsetMapper {
    offset: u64,
}

impl OffsetMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }
}

impl PhysMapper for OffsetMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = (self.offset + pa.as_u64()) as *mut T;
        // SAFETY: caller guarantees `offset + pa` lies inside the mapped
        // (or buffer-backed) region.
        unsafe { &mut *va }
    }
}
