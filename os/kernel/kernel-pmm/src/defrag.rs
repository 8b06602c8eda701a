//! Defragmentation engine: sorts each bank's free list into descending
//! address order and coalesces runs of contiguous frames into the next
//! size class.
//!
//! A bank's addresses are spread over a chain of non-contiguous stack
//! pages. [`FlatView`] turns that chain into an index-addressable array:
//! the physical address of every chain page is parked in auxiliary page 0,
//! and an index resolves to (page, slot) with the invariant that only the
//! first page may be partially filled. The active-page handle doubles as
//! the access cursor and is only switched when the target page actually
//! changes, since switching is the expensive operation (it invalidates a
//! translation).
//!
//! Merged blocks cannot be re-freed mid-traversal (freeing mutates the
//! very chain being walked), so they are parked in freed-list pages at the
//! far end of the auxiliary region and replayed after the pass.

use crate::banks::{AUX_PAGE_COUNT, PmmCore};
use crate::mapper::PhysMapper;
use crate::stack_page::{FREED_LIST_CAPACITY, FreedList, PAGE_WORDS, STACK_PAGE_CAPACITY};
use kernel_frames::{FrameSize, PhysicalAddress, Zone, bank_index};
use log::debug;

/// Index-addressable view over one bank's chained stack pages.
///
/// Valid only while no one else mutates the chain: the page-address list
/// in auxiliary page 0 and `first_count` are frozen at flatten time.
/// Removals via [`PmmCore::view_remove_from_top`] keep the view's index
/// space stable by leaving dead slots at the front, which the merge scan
/// accounts for with its running removal total.
pub(crate) struct FlatView {
    size: FrameSize,
    zone: Zone,
    /// Stack pages in the chain (their addresses sit in aux page 0).
    pub page_count: usize,
    /// Entry count of the first (top) page at flatten time.
    first_count: usize,
    /// Total entries across the chain at flatten time.
    pub total: usize,
    /// Chain page currently switched in.
    cursor: PhysicalAddress,
}

impl<M: PhysMapper> PmmCore<M> {
    /// Walks the chain of `(size, zone)`, recording every page address
    /// into auxiliary page 0 and summing the entry counts.
    pub(crate) fn flatten(&mut self, size: FrameSize, zone: Zone) -> FlatView {
        let bank = bank_index(size, zone);
        let first_count = self.top(bank).count as usize;
        let mut page_count = 0usize;
        let mut total = 0usize;
        loop {
            let top = self.top(bank);
            total += top.count as usize;
            let next = top.next;
            let recorded = self.switch_top(size, zone, PhysicalAddress::new(next));
            assert!(
                page_count < PAGE_WORDS,
                "stack page chain exceeds auxiliary page list capacity"
            );
            self.aux_words(0)[page_count] = recorded.as_u64();
            page_count += 1;
            if next == 0 {
                break;
            }
        }
        // Restore the true top page.
        let first = PhysicalAddress::new(self.aux_words(0)[0]);
        self.switch_top(size, zone, first);
        FlatView {
            size,
            zone,
            page_count,
            first_count,
            total,
            cursor: first,
        }
    }

    /// Resolves `index` to an in-page slot, switching the cursor page only
    /// if the target differs from the one last accessed.
    fn view_locate(&mut self, view: &mut FlatView, index: usize) -> usize {
        let (list_index, slot) = if index < view.first_count {
            (0, view.first_count - 1 - index)
        } else {
            // Pages below the first are always full, so past the first
            // page the mapping is a plain division with the first page's
            // unused slots factored in.
            let leading_gap = STACK_PAGE_CAPACITY - view.first_count;
            (
                (index + leading_gap) / STACK_PAGE_CAPACITY,
                STACK_PAGE_CAPACITY - 1 - (index - view.first_count) % STACK_PAGE_CAPACITY,
            )
        };
        debug_assert!(list_index < view.page_count);
        let page = PhysicalAddress::new(self.aux_words(0)[list_index]);
        if view.cursor != page {
            self.switch_top(view.size, view.zone, page);
            view.cursor = page;
        }
        slot
    }

    /// Reads the logical stack entry `index` (0 = top of stack).
    pub(crate) fn view_read(&mut self, view: &mut FlatView, index: usize) -> u64 {
        let slot = self.view_locate(view, index);
        self.top(bank_index(view.size, view.zone)).frames[slot]
    }

    /// Overwrites the logical stack entry `index`.
    pub(crate) fn view_write(&mut self, view: &mut FlatView, index: usize, value: u64) {
        let slot = self.view_locate(view, index);
        self.top(bank_index(view.size, view.zone)).frames[slot] = value;
    }

    /// Iterative sift-down of a min-heap rooted at `index` over the first
    /// `len` view entries.
    fn view_min_heapify(&mut self, view: &mut FlatView, index: usize, len: usize) {
        let mut i = index;
        loop {
            let left = 2 * i + 1;
            let right = 2 * i + 2;
            let root = self.view_read(view, i);
            let mut smallest = i;
            let mut smallest_value = root;
            if left < len {
                let value = self.view_read(view, left);
                if smallest_value > value {
                    smallest = left;
                    smallest_value = value;
                }
            }
            if right < len {
                let value = self.view_read(view, right);
                if smallest_value > value {
                    smallest = right;
                    smallest_value = value;
                }
            }
            if smallest == i {
                break;
            }
            self.view_write(view, smallest, root);
            self.view_write(view, i, smallest_value);
            i = smallest;
        }
    }

    /// In-place heapsort of the view into **descending** order: a min-heap
    /// bubbles the smallest entries out to the high indices, leaving the
    /// highest address on top of the stack.
    pub(crate) fn view_sort_descending(&mut self, view: &mut FlatView) {
        let n = view.total;
        if n < 2 {
            return;
        }
        for i in (0..n / 2).rev() {
            self.view_min_heapify(view, i, n);
        }
        let mut len = n;
        for i in (1..n).rev() {
            let root = self.view_read(view, 0);
            let bottom = self.view_read(view, i);
            self.view_write(view, 0, bottom);
            self.view_write(view, i, root);
            len -= 1;
            self.view_min_heapify(view, 0, len);
        }
    }

    /// Drops `count` entries off the logical top of the stack by walking
    /// the chain from the first page and decrementing page counts,
    /// possibly draining some pages to empty.
    pub(crate) fn view_remove_from_top(&mut self, view: &mut FlatView, count: usize) {
        let bank = bank_index(view.size, view.zone);
        let first = PhysicalAddress::new(self.aux_words(0)[0]);
        self.switch_top(view.size, view.zone, first);
        view.cursor = first;
        let mut remaining = count;
        loop {
            let top = self.top(bank);
            if (top.count as usize) < remaining {
                remaining -= top.count as usize;
                top.count = 0;
            } else {
                top.count -= remaining as u64;
                break;
            }
            let next = PhysicalAddress::new(top.next);
            self.switch_top(view.size, view.zone, next);
            view.cursor = next;
        }
    }

    /// Records a merged block in the freed list (replayed after the pass).
    fn freed_push(&mut self, index: usize, size: FrameSize, addr: u64) {
        let page_offset = index / FREED_LIST_CAPACITY;
        assert!(
            page_offset + 1 < AUX_PAGE_COUNT,
            "defragmentation freed list exceeds auxiliary region"
        );
        let slot = index % FREED_LIST_CAPACITY;
        let page = self.freed_list(AUX_PAGE_COUNT - 1 - page_offset);
        page.sizes[slot] = size.index() as u8;
        page.addrs[slot] = addr;
    }

    fn freed_get(&mut self, index: usize) -> (FrameSize, u64) {
        let page_offset = index / FREED_LIST_CAPACITY;
        let slot = index % FREED_LIST_CAPACITY;
        let page = self.freed_list(AUX_PAGE_COUNT - 1 - page_offset);
        let size = if page.sizes[slot] == FrameSize::Size1G.index() as u8 {
            FrameSize::Size1G
        } else {
            FrameSize::Size2M
        };
        (size, page.addrs[slot])
    }

    fn freed_list(&mut self, aux_index: usize) -> &mut FreedList {
        let addr = self.aux_page_addr(aux_index);
        // SAFETY: auxiliary pages are reserved for exactly this use;
        // borrow tied to `&mut self`.
        unsafe { self.mapper().phys_to_mut(addr) }
    }

    /// Scans the (descending) view for complete, aligned runs of 512
    /// contiguous frames and collapses each into one frame of the next
    /// size class.
    ///
    /// A run starts at an entry whose *end* lies on a larger-size boundary
    /// and completes when 512 consecutive entries each sit exactly one
    /// frame below their predecessor. Completed runs are removed from the
    /// view (shift up, then chain-count decrement) and parked in the freed
    /// list. `skip_first` suppresses the first eligible run so a merge
    /// right after boot does not cannibalize all small pages at once.
    fn view_merge(&mut self, view: &mut FlatView, skip_first: &mut bool, freed_count: &mut usize) {
        let Some(merged_size) = view.size.larger() else {
            return;
        };
        let step = view.size.bytes();
        let alignment = merged_size.bytes();
        let mask = alignment - 1;
        let ratio = FrameSize::SPLIT_RATIO;

        // Highest entry of the run currently being tracked, i.e. the one
        // whose end is aligned; `None` while no run is live.
        let mut run_end: Option<u64> = None;
        let mut last_contiguous = 0u64;
        // Dead slots at the front of the view from earlier removals.
        let mut removed_total = 0usize;

        for i in 0..view.total {
            let addr = self.view_read(view, i);
            if (addr + step) & mask == 0 {
                run_end = Some(addr);
                last_contiguous = addr;
            } else if let Some(end) = run_end {
                if last_contiguous == addr + step {
                    last_contiguous = addr;
                    if (end + step) - addr == alignment {
                        // Complete aligned run of `ratio` frames.
                        if *skip_first {
                            *skip_first = false;
                            run_end = None;
                            continue;
                        }
                        // Close the gap: move the entries above the run
                        // down over it, leaving dead slots at the front.
                        let shift_end = (i + 1) - ratio;
                        for j in (removed_total..shift_end).rev() {
                            let value = self.view_read(view, j);
                            self.view_write(view, j + ratio, value);
                        }
                        self.view_remove_from_top(view, ratio);
                        removed_total += ratio;
                        self.freed_push(*freed_count, merged_size, addr);
                        *freed_count += 1;
                    }
                } else {
                    run_end = None;
                }
            }
        }
    }

    /// Unlinks every stack page drained to zero entries, then offers each
    /// to the supply list or frees it as an ordinary 4 KiB frame.
    pub(crate) fn drain_empty_stack_pages(&mut self) {
        let mut drained = 0usize;
        for size in FrameSize::ALL {
            for zone in Zone::ALL.into_iter().rev() {
                let bank = bank_index(size, zone);
                loop {
                    let top = self.top(bank);
                    if top.count != 0 || top.next == 0 {
                        break;
                    }
                    let next = PhysicalAddress::new(top.next);
                    let unlinked = self.switch_top(size, zone, next);
                    assert!(
                        drained < PAGE_WORDS,
                        "drained stack pages exceed auxiliary page list capacity"
                    );
                    self.aux_words(0)[drained] = unlinked.as_u64();
                    drained += 1;
                }
            }
        }
        for i in 0..drained {
            let addr = PhysicalAddress::new(self.aux_words(0)[i]);
            debug!("releasing drained stack page {addr}");
            if !self.try_reserve_as_stack_page(addr) {
                self.free_locked(FrameSize::Size4K, Zone::of(FrameSize::Size4K, addr), addr);
            }
        }
    }

    /// Sorts every bank and, when `merge` is set, coalesces contiguous
    /// runs into larger frames.
    ///
    /// The full operation is three passes: merge (4 KiB runs can become
    /// 2 MiB blocks which then feed 1 GiB merges within the same pass),
    /// merge again to catch 2 MiB blocks created late in pass one, and a
    /// final sort-only pass that leaves every list in descending order.
    /// Only the first merging pass skips its first eligible run.
    pub(crate) fn defragment_locked(&mut self, merge: bool, second_pass: bool) {
        let mut freed_count = 0usize;
        let mut skip_first = merge && !second_pass;

        for size in FrameSize::ALL {
            for zone in Zone::ALL.into_iter().rev() {
                let bank = bank_index(size, zone);
                let top = self.top(bank);
                if (top.count as usize) < 2 && top.next == 0 {
                    continue;
                }
                let mut view = self.flatten(size, zone);
                self.view_sort_descending(&mut view);
                if merge && size.larger().is_some() {
                    self.view_merge(&mut view, &mut skip_first, &mut freed_count);
                }
                // Leave the bank pointing at its true top page.
                let first = PhysicalAddress::new(self.aux_words(0)[0]);
                self.switch_top(size, zone, first);
            }
        }

        if !merge {
            return;
        }
        self.drain_empty_stack_pages();
        for i in 0..freed_count {
            let (merged_size, addr) = self.freed_get(i);
            let addr = PhysicalAddress::new(addr);
            debug!("merged {merged_size} block at {addr}");
            self.free_locked(merged_size, Zone::of(merged_size, addr), addr);
        }

        if second_pass {
            self.defragment_locked(false, false);
        } else {
            self.defragment_locked(true, true);
        }
    }
}
