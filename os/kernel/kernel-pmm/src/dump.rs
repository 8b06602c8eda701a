//! Debug-only serialization of the allocator state.
//!
//! Produces one status byte per 4 KiB granule of the tracked address
//! space, preceded by an 8-byte little-endian granule count. External
//! tooling renders the result as a memory map; nothing at runtime depends
//! on it.

use crate::banks::PmmCore;
use crate::mapper::PhysMapper;
use crate::stack_page::StackPage;
use bitflags::bitflags;
use kernel_frames::{FrameSize, PhysicalAddress, Zone, bank_index};

bitflags! {
    /// State of one 4 KiB granule in the dump body.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct GranuleFlags: u8 {
        /// Granule belongs to a free frame.
        const FREE = 0x01;
        /// Granule is a live stack page of some bank.
        const STACK_PAGE = 0x02;
        /// The free frame is a 2 MiB frame.
        const SIZE_2M = 0x04;
        /// The free frame is a 1 GiB frame.
        const SIZE_1G = 0x08;
        /// Granule is parked in the stack-page supply list.
        const RESERVED = 0x10;
        /// Granule is an auxiliary scratch page.
        const AUX = 0x20;
    }
}

/// Failures of [`Pmm::dump`](crate::Pmm::dump).
#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("physical memory manager is not initialized")]
    NotInitialized,
    /// The output buffer cannot hold the header plus one byte per granule.
    #[error("output buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },
}

impl<M: PhysMapper> PmmCore<M> {
    /// Serializes the granule map into `out`; returns the bytes written.
    pub(crate) fn dump_locked(&mut self, out: &mut [u8]) -> Result<usize, DumpError> {
        if !self.is_initialized() {
            return Err(DumpError::NotInitialized);
        }
        let granules = usize::try_from(self.granule_count()).unwrap_or(usize::MAX);
        let needed = 8 + granules;
        if out.len() < needed {
            return Err(DumpError::BufferTooSmall {
                needed,
                have: out.len(),
            });
        }
        out[..needed].fill(0);
        out[..8].copy_from_slice(&self.granule_count().to_le_bytes());
        let body = &mut out[8..needed];

        let four_k = FrameSize::Size4K.bytes();
        for size in FrameSize::ALL {
            let frame_flags = match size {
                FrameSize::Size4K => GranuleFlags::FREE,
                FrameSize::Size2M => GranuleFlags::FREE | GranuleFlags::SIZE_2M,
                FrameSize::Size1G => GranuleFlags::FREE | GranuleFlags::SIZE_1G,
            };
            let span = (size.bytes() / four_k) as usize;
            for zone in Zone::ALL {
                // Walk the chain through the mapper directly; a read-only
                // dump has no reason to disturb the active-page handles.
                let mut page_addr = self.top_addr(bank_index(size, zone));
                loop {
                    // SAFETY: chain pages are live allocator metadata; the
                    // shared borrow does not overlap any other access.
                    let page: &StackPage = unsafe { self.mapper().phys_to_mut(page_addr) };
                    for k in 0..page.count as usize {
                        let index = (page.frames[k] / four_k) as usize;
                        for g in 0..span {
                            if let Some(byte) = body.get_mut(index + g) {
                                *byte = frame_flags.bits();
                            }
                        }
                    }
                    let page_index = (page_addr.as_u64() / four_k) as usize;
                    if let Some(byte) = body.get_mut(page_index) {
                        *byte = GranuleFlags::STACK_PAGE.bits();
                    }
                    if page.next == 0 {
                        break;
                    }
                    page_addr = PhysicalAddress::new(page.next);
                }
            }
        }

        let supply_addr = self.supply_addr();
        // SAFETY: as above; the supply page is live allocator metadata.
        let supply: &StackPage = unsafe { self.mapper().phys_to_mut(supply_addr) };
        for k in 0..supply.count as usize {
            let index = (supply.frames[k] / four_k) as usize;
            if let Some(byte) = body.get_mut(index) {
                *byte = GranuleFlags::RESERVED.bits();
            }
        }
        let supply_index = (supply_addr.as_u64() / four_k) as usize;
        if let Some(byte) = body.get_mut(supply_index) {
            *byte = GranuleFlags::STACK_PAGE.bits();
        }

        for i in 0..crate::banks::AUX_PAGE_COUNT {
            let index = (self.aux_page_addr(i).as_u64() / four_k) as usize;
            if let Some(byte) = body.get_mut(index) {
                *byte = GranuleFlags::AUX.bits();
            }
        }

        Ok(needed)
    }
}
