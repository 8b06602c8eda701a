//! Contiguous-range allocation for DMA-capable device buffers.
//!
//! Built on the defragmentation engine: after a full sort + merge pass,
//! every bank's free list is in descending address order, so a run of
//! physically contiguous frames appears as consecutive view entries each
//! exactly one frame below its predecessor.

use crate::banks::PmmCore;
use crate::mapper::PhysMapper;
use kernel_frames::{FrameSize, PhysicalAddress, Zone, bank_index};
use log::debug;

impl<M: PhysMapper> PmmCore<M> {
    /// Allocates `count` contiguous frames of `size`; returns the lowest
    /// address of the run.
    ///
    /// Zones are scanned from most to least constrained so an
    /// unconstrained caller does not burn DMA-reachable memory unless
    /// nothing else has a fitting run.
    pub(crate) fn alloc_contiguous_locked(
        &mut self,
        size: FrameSize,
        count: usize,
    ) -> Option<PhysicalAddress> {
        if count == 0 {
            return None;
        }

        // The scan below needs sorted stacks.
        self.defragment_locked(true, false);

        let step = size.bytes();
        for zone in Zone::ALL {
            let bank = bank_index(size, zone);
            {
                let top = self.top(bank);
                if top.count == 0 && top.next == 0 {
                    continue;
                }
            }

            let mut view = self.flatten(size, zone);
            let mut previous: Option<u64> = None;
            let mut run_len = 0usize;
            let mut found = None;
            for i in 0..view.total {
                let addr = self.view_read(&mut view, i);
                if previous == Some(addr + step) {
                    run_len += 1;
                } else {
                    run_len = 1;
                }
                previous = Some(addr);
                if run_len == count {
                    found = Some((i, addr));
                    break;
                }
            }

            if let Some((i, base)) = found {
                // Remove the run: shift the entries above it down over
                // it, then drop `count` entries off the chain's top.
                let shift_end = (i + 1) - count;
                for j in (0..shift_end).rev() {
                    let value = self.view_read(&mut view, j);
                    self.view_write(&mut view, j + count, value);
                }
                self.view_remove_from_top(&mut view, count);
                let first = PhysicalAddress::new(self.aux_words(0)[0]);
                self.switch_top(size, zone, first);
                self.drain_empty_stack_pages();

                let base = PhysicalAddress::new(base);
                debug!("contiguous block: {count} x {size} at {base}");
                return Some(base);
            }

            // Nothing here; restore the bank's top and try the next zone.
            let first = PhysicalAddress::new(self.aux_words(0)[0]);
            self.switch_top(size, zone, first);
        }

        None
    }
}
