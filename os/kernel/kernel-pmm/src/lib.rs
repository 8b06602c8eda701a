//! # Physical Memory Manager
//!
//! Frame allocator for the kernel: hands out physical page frames of
//! three sizes (4 KiB, 2 MiB, 1 GiB) from three address zones (DMA,
//! DMA32, STD), using only physical memory itself to store its free
//! lists. It runs long before a kernel heap exists, because it is what
//! the heap is built on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                      Pmm<M>                          │
//! │   public API; one spin lock, interrupts masked       │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ lock held
//! ┌──────────────────────▼───────────────────────────────┐
//! │                    PmmCore<M>                        │
//! │   nine (size, zone) frame stacks                     │
//! │   stack-page supply list  ·  auxiliary scratch pages │
//! │   defragmentation + contiguous-range engine          │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ PhysMapper
//! ┌──────────────────────▼───────────────────────────────┐
//! │              physical memory (the frames)            │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each (size, zone) pair owns a stack of free-frame addresses stored in
//! chained *stack pages*, free 4 KiB frames repurposed as metadata. The
//! bootstrap problem (freeing a frame may need a new stack page, and
//! getting one may need an allocation) is solved by a dedicated supply
//! list of spare pages, kept descending-sorted and replenished
//! opportunistically from freed high pages.
//!
//! ## Semantics
//!
//! - Allocation prefers the requested zone and falls back to more
//!   constrained zones; an exhausted size class is refilled by splitting
//!   one frame of the next larger size.
//! - Exhaustion is reported as `None`, never a fault; callers decide
//!   whether out-of-memory is fatal.
//! - [`Pmm::alloc_contiguous`] defragments (sort + merge) and then scans
//!   for a physically contiguous run. It is deliberately expensive and
//!   meant for rare, large requests such as device DMA buffers.
//! - Freeing with the wrong size corrupts the free-space accounting.
//!   This precondition is documented, not checked.
//!
//! ## Concurrency
//!
//! One exclusive spin lock serializes the whole allocator. The public
//! entry points take it with interrupts masked (allocation happens in
//! interrupt context during early boot); all internal recursion runs
//! under the already-held lock and never re-acquires.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(
    unsafe_code,
    // Frame bookkeeping constantly converts between u64 addresses/counts
    // and usize indices; the values are bounded by the page layout.
    clippy::cast_possible_truncation
)]

mod banks;
mod contiguous;
mod defrag;
mod dump;
mod init;
mod mapper;
mod stack_page;

pub use dump::{DumpError, GranuleFlags};
pub use init::{InitError, PhysRegion};
pub use mapper::{HHDM_BASE, HhdmMapper, OffsetMapper, PhysMapper};

pub use kernel_frames::{FrameSize, PhysicalAddress, Zone};

use banks::PmmCore;
use kernel_sync::SpinLock;

/// The physical memory manager.
///
/// Create one with [`Pmm::new`], feed it the boot memory map once via
/// [`Pmm::init`], then allocate and free frames for the lifetime of the
/// kernel; there is no teardown. All state lives behind one lock, so a
/// `static Pmm<HhdmMapper>` is shared across cores as-is, and a test
/// harness can just as well run a private instance over a synthetic
/// memory buffer with an [`OffsetMapper`].
pub struct Pmm<M> {
    core: SpinLock<PmmCore<M>>,
}

impl<M: PhysMapper> Pmm<M> {
    #[must_use]
    pub const fn new(mapper: M) -> Self {
        Self {
            core: SpinLock::new(PmmCore::new(mapper)),
        }
    }

    /// Populates the free lists from the boot memory map.
    ///
    /// Must be called exactly once, before any other call. `regions` is
    /// the firmware-supplied map, sorted by address; only entries flagged
    /// usable are ingested, largest-aligned-chunk first. `bootstrap`
    /// donates ten 4 KiB pages of list storage (nine bank heads plus the
    /// supply page) that must lie outside every usable range.
    ///
    /// # Errors
    /// See [`InitError`]; no frame is handed out before `init` succeeds.
    pub fn init(
        &self,
        regions: &[PhysRegion],
        bootstrap: PhysicalAddress,
    ) -> Result<(), InitError> {
        self.core.lock_irq().init_locked(regions, bootstrap)
    }

    /// Allocates a 4 KiB frame without addressing constraints.
    #[must_use]
    pub fn alloc(&self) -> Option<PhysicalAddress> {
        self.alloc_sized_zoned(FrameSize::Size4K, Zone::Std)
    }

    /// Allocates a frame of the given size without addressing constraints.
    #[must_use]
    pub fn alloc_sized(&self, size: FrameSize) -> Option<PhysicalAddress> {
        self.alloc_sized_zoned(size, Zone::Std)
    }

    /// Allocates a 4 KiB frame addressable within `zone`.
    #[must_use]
    pub fn alloc_zoned(&self, zone: Zone) -> Option<PhysicalAddress> {
        self.alloc_sized_zoned(FrameSize::Size4K, zone)
    }

    /// Allocates a frame of the given size addressable within `zone`.
    ///
    /// Returns `None` when the request cannot be satisfied even after
    /// zone fallback and splitting; the allocator state stays intact.
    /// Before [`Pmm::init`] there is nothing to hand out.
    #[must_use]
    pub fn alloc_sized_zoned(&self, size: FrameSize, zone: Zone) -> Option<PhysicalAddress> {
        let mut core = self.core.lock_irq();
        if !core.is_initialized() {
            return None;
        }
        core.alloc_locked(size, zone, zone)
    }

    /// Frees a 4 KiB frame previously returned by an `alloc` call.
    ///
    /// The frame must actually be 4 KiB; see [`Pmm::free_sized`].
    pub fn free(&self, addr: PhysicalAddress) {
        self.free_sized(FrameSize::Size4K, addr);
    }

    /// Frees a frame of the given size.
    ///
    /// `size` must match the size the frame was allocated with. Passing
    /// the wrong size silently corrupts the free-space accounting; this
    /// precondition is not checked.
    pub fn free_sized(&self, size: FrameSize, addr: PhysicalAddress) {
        let mut core = self.core.lock_irq();
        debug_assert!(core.is_initialized());
        if core.is_initialized() {
            core.free_locked(size, Zone::of(size, addr), addr);
        }
    }

    /// Allocates `count` physically contiguous frames of the given size
    /// and returns the base address of the run.
    ///
    /// Defragments all banks first (an O(n log n) stop-the-world
    /// operation), then scans each zone from most to least constrained.
    /// Intended for rare, large allocations such as DMA buffers, never
    /// for a hot path.
    #[must_use]
    pub fn alloc_contiguous(&self, size: FrameSize, count: usize) -> Option<PhysicalAddress> {
        let mut core = self.core.lock_irq();
        if !core.is_initialized() {
            return None;
        }
        core.alloc_contiguous_locked(size, count)
    }

    /// Serializes a debug map of every 4 KiB granule's state into `out`
    /// (see [`GranuleFlags`]); returns the number of bytes written.
    ///
    /// Diagnostic tooling only; not part of the runtime contract.
    ///
    /// # Errors
    /// Fails if the allocator is uninitialized or `out` is too small.
    pub fn dump(&self, out: &mut [u8]) -> Result<usize, DumpError> {
        self.core.lock_irq().dump_locked(out)
    }
}
