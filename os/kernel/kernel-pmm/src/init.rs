//! One-time construction of the free lists from the firmware memory map.
//!
//! Every usable range is carved into the largest aligned frames possible:
//!
//! ```text
//! unused | 4K .. 4K | 2M .. 2M | 1G .. 1G | 2M .. 2M | 4K .. 4K | unused
//! ```
//!
//! and each frame is pushed onto the bank its size and zone select. The
//! first stack pages cannot come from the allocator itself (nothing is
//! free yet), so the caller donates ten bootstrap pages: nine bank heads
//! plus the supply-list page. The auxiliary scratch pages and the supply
//! reservoir are taken from the highest tracked addresses, where they are
//! least likely to fragment the large-frame inventory.

use crate::banks::{AUX_PAGE_COUNT, PmmCore};
use crate::mapper::PhysMapper;
use crate::stack_page::STACK_PAGE_CAPACITY;
use kernel_frames::{FrameSize, PhysicalAddress, Zone, bank_index};
use log::info;

/// One entry of the boot memory map: the half-open physical range
/// `[start, end)` and whether the firmware reports it as usable RAM.
#[derive(Copy, Clone, Debug)]
pub struct PhysRegion {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub usable: bool,
}

impl PhysRegion {
    #[must_use]
    pub const fn usable(start: u64, end: u64) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
            usable: true,
        }
    }

    #[must_use]
    pub const fn reserved(start: u64, end: u64) -> Self {
        Self {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
            usable: false,
        }
    }
}

/// Failures of [`Pmm::init`](crate::Pmm::init).
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// `init` was called a second time.
    #[error("physical memory manager is already initialized")]
    AlreadyInitialized,
    /// A map entry ends before it starts.
    #[error("memory map entry has end below start")]
    InvalidRange,
    /// Map entries overlap or are not sorted by ascending address.
    #[error("memory map entries overlap or are not sorted by address")]
    UnsortedMap,
    /// No entry of the map is flagged usable.
    #[error("memory map contains no usable range")]
    NoUsableMemory,
    /// The highest usable range cannot hold the auxiliary scratch pages.
    #[error("highest usable range too small for the auxiliary region")]
    AuxDoesNotFit,
}

impl<M: PhysMapper> PmmCore<M> {
    /// Builds the nine banks and the supply list from `regions`.
    ///
    /// `bootstrap` must point at ten writable, zero-owner 4 KiB pages that
    /// are *not* part of any usable range; they become the initial bank
    /// heads and the supply-list page and are never returned to callers.
    pub(crate) fn init_locked(
        &mut self,
        regions: &[PhysRegion],
        bootstrap: PhysicalAddress,
    ) -> Result<(), InitError> {
        if self.is_initialized() {
            return Err(InitError::AlreadyInitialized);
        }
        debug_assert!(bootstrap.is_aligned(FrameSize::Size4K));

        // The map is opaque firmware data; the only validation is that
        // the ranges are well-formed and address-ordered.
        let mut previous_end = 0u64;
        let mut last_usable = None;
        for (i, region) in regions.iter().enumerate() {
            if region.end < region.start {
                return Err(InitError::InvalidRange);
            }
            if region.start.as_u64() < previous_end {
                return Err(InitError::UnsortedMap);
            }
            previous_end = region.end.as_u64();
            if region.usable {
                last_usable = Some(i);
            }
        }
        let last_usable = last_usable.ok_or(InitError::NoUsableMemory)?;

        // Hook up the bootstrap pages: one head per bank, then the supply
        // list. All start empty and unchained.
        let four_k = FrameSize::Size4K.bytes();
        for size in FrameSize::ALL {
            for zone in Zone::ALL {
                let idx = bank_index(size, zone);
                self.switch_top(size, zone, bootstrap + idx as u64 * four_k);
                self.top(idx).clear();
            }
        }
        self.set_supply(bootstrap + kernel_frames::BANK_COUNT as u64 * four_k);
        let supply = self.supply_addr();
        self.page_at(supply).clear();

        // Carve the auxiliary scratch pages off the top of the highest
        // usable range, before any frames are pushed.
        let top_region = &regions[last_usable];
        let top_start = top_region.start.align_up(FrameSize::Size4K);
        let top_end = top_region.end.align_down(FrameSize::Size4K);
        let aux_bytes = AUX_PAGE_COUNT as u64 * four_k;
        if top_end.as_u64().saturating_sub(top_start.as_u64()) <= aux_bytes {
            return Err(InitError::AuxDoesNotFit);
        }
        let aux_base = PhysicalAddress::new(top_end.as_u64() - aux_bytes);
        for i in 0..AUX_PAGE_COUNT {
            self.set_aux(i, aux_base + i as u64 * four_k);
        }
        self.set_granules(top_end.as_u64() / four_k);

        // Ingest the usable ranges.
        for (i, region) in regions.iter().enumerate() {
            if !region.usable {
                continue;
            }
            let end = if i == last_usable { aux_base } else { region.end };
            self.push_region(region.start, end);
        }

        // Fill the supply list with the highest 4 KiB frames available so
        // future stack pages come from the top of memory. Insertion keeps
        // the reservoir sorted descending regardless of pop order.
        let mut reserved = 0usize;
        while reserved < STACK_PAGE_CAPACITY {
            match self.alloc_locked(FrameSize::Size4K, Zone::Std, Zone::Std) {
                Some(frame) => {
                    self.supply_insert_sorted(frame.as_u64());
                    reserved += 1;
                }
                None => break,
            }
        }
        self.arm_supply();

        for zone in Zone::ALL {
            for size in FrameSize::ALL {
                let count = self.total_ingested(bank_index(size, zone));
                if count > 0 {
                    info!("zone {zone} size {size}: {count} frames");
                }
            }
        }
        info!("{reserved} spare stack pages, {AUX_PAGE_COUNT} auxiliary pages reserved");

        self.set_initialized();
        Ok(())
    }

    /// Tiles `[start, end)` with the largest aligned frames possible and
    /// pushes every frame onto its bank.
    fn push_region(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let s4 = start.align_up(FrameSize::Size4K);
        let e4 = end.align_down(FrameSize::Size4K);
        let s2 = start.align_up(FrameSize::Size2M);
        let e2 = end.align_down(FrameSize::Size2M);
        let s1 = start.align_up(FrameSize::Size1G);
        let e1 = end.align_down(FrameSize::Size1G);

        if s1 <= e1 {
            if s4 <= s2 {
                self.push_range(s4, s2, FrameSize::Size4K);
            }
            if e2 <= e4 {
                self.push_range(e2, e4, FrameSize::Size4K);
            }
            if s2 <= s1 {
                self.push_range(s2, s1, FrameSize::Size2M);
            }
            if e1 <= e2 {
                self.push_range(e1, e2, FrameSize::Size2M);
            }
            self.push_range(s1, e1, FrameSize::Size1G);
        } else if s2 <= e2 {
            if s4 <= s2 {
                self.push_range(s4, s2, FrameSize::Size4K);
            }
            if e2 <= e4 {
                self.push_range(e2, e4, FrameSize::Size4K);
            }
            self.push_range(s2, e2, FrameSize::Size2M);
        } else if s4 <= e4 {
            self.push_range(s4, e4, FrameSize::Size4K);
        }
    }

    /// Pushes the aligned frames of `[start, end)` at the given size.
    fn push_range(&mut self, start: PhysicalAddress, end: PhysicalAddress, size: FrameSize) {
        let mut addr = start;
        while addr < end {
            let zone = Zone::of(size, addr);
            self.free_locked(size, zone, addr);
            self.note_ingested(bank_index(size, zone));
            addr += size.bytes();
        }
    }
}
