//! Allocator behavior over a synthetic physical memory buffer.
//!
//! The harness treats offsets into a boxed buffer as physical addresses
//! via [`OffsetMapper`], so the whole allocator runs unmodified as a user
//! process. Physical page zero is deliberately left unused so the
//! allocator's zero sentinel stays unambiguous: the ten bootstrap pages
//! sit at 0x1000, usable memory starts right after them.

use kernel_pmm::{
    FrameSize, GranuleFlags, InitError, OffsetMapper, PhysRegion, PhysicalAddress, Pmm, Zone,
};
use std::collections::HashSet;

const PAGE: u64 = 4096;
const BOOTSTRAP: u64 = 0x1000;
const FIRST_USABLE: u64 = 0xB000;
const MIB: u64 = 1024 * 1024;
const AUX_BYTES: u64 = 64 * PAGE;

struct TestMemory {
    /// Backing storage; `u64` elements keep every page suitably aligned
    /// for the allocator's metadata structs.
    _buf: Vec<u64>,
    pmm: Pmm<OffsetMapper>,
}

impl TestMemory {
    /// An allocator over `bytes` of fake physical memory with a single
    /// usable range covering everything above the bootstrap pages.
    fn new(bytes: u64) -> Self {
        let buf = vec![0u64; (bytes / 8) as usize];
        let base = buf.as_ptr() as u64;
        let pmm = Pmm::new(OffsetMapper::new(base));
        pmm.init(
            &[PhysRegion::usable(FIRST_USABLE, bytes)],
            PhysicalAddress::new(BOOTSTRAP),
        )
        .expect("init");
        Self { _buf: buf, pmm }
    }
}

#[test]
fn init_validates_the_memory_map() {
    let buf = vec![0u64; (8 * MIB / 8) as usize];
    let base = buf.as_ptr() as u64;

    let pmm = Pmm::new(OffsetMapper::new(base));
    assert!(matches!(
        pmm.init(&[], PhysicalAddress::new(BOOTSTRAP)),
        Err(InitError::NoUsableMemory)
    ));
    assert!(matches!(
        pmm.init(
            &[PhysRegion::reserved(0x0, 8 * MIB)],
            PhysicalAddress::new(BOOTSTRAP)
        ),
        Err(InitError::NoUsableMemory)
    ));
    assert!(matches!(
        pmm.init(
            &[
                PhysRegion::usable(4 * MIB, 8 * MIB),
                PhysRegion::usable(FIRST_USABLE, 2 * MIB),
            ],
            PhysicalAddress::new(BOOTSTRAP)
        ),
        Err(InitError::UnsortedMap)
    ));

    pmm.init(
        &[PhysRegion::usable(FIRST_USABLE, 8 * MIB)],
        PhysicalAddress::new(BOOTSTRAP),
    )
    .expect("first init");
    assert!(matches!(
        pmm.init(
            &[PhysRegion::usable(FIRST_USABLE, 8 * MIB)],
            PhysicalAddress::new(BOOTSTRAP)
        ),
        Err(InitError::AlreadyInitialized)
    ));
}

#[test]
fn allocations_are_aligned_and_zone_bounded() {
    let mem = TestMemory::new(64 * MIB);

    for _ in 0..32 {
        let a = mem.pmm.alloc().expect("4K frame");
        assert!(a.is_aligned(FrameSize::Size4K));
        mem.pmm.free(a);
    }

    let two_m = mem.pmm.alloc_sized(FrameSize::Size2M).expect("2M frame");
    assert!(two_m.is_aligned(FrameSize::Size2M));
    mem.pmm.free_sized(FrameSize::Size2M, two_m);

    // A DMA request must end below 16 MiB even though far more memory
    // exists above.
    for _ in 0..16 {
        let a = mem.pmm.alloc_zoned(Zone::Dma).expect("DMA frame");
        assert!(a.as_u64() + PAGE - 1 <= Zone::Dma.limit());
        mem.pmm.free(a);
    }

    // A DMA32 request likewise stays under 4 GiB.
    let a = mem.pmm.alloc_zoned(Zone::Dma32).expect("DMA32 frame");
    assert!(a.as_u64() + PAGE - 1 <= Zone::Dma32.limit());
    mem.pmm.free(a);
}

#[test]
fn short_alloc_free_window_is_exactly_lifo() {
    let mem = TestMemory::new(64 * MIB);

    // Small enough that no stack page fills or drains and no supply
    // traffic occurs, so the per-page stack discipline is exact.
    let first = mem.pmm.alloc().expect("frame");
    let mut addrs = vec![first];
    for _ in 1..50 {
        addrs.push(mem.pmm.alloc().expect("frame"));
    }
    for &a in addrs.iter().rev() {
        mem.pmm.free(a);
    }
    assert_eq!(mem.pmm.alloc(), Some(first));

    // The same round trip holds for 2 MiB frames, which never detour
    // through the supply list.
    let big = mem.pmm.alloc_sized(FrameSize::Size2M).expect("2M frame");
    mem.pmm.free_sized(FrameSize::Size2M, big);
    assert_eq!(mem.pmm.alloc_sized(FrameSize::Size2M), Some(big));
}

#[test]
fn exhaustion_returns_none_and_recovers() {
    let mem = TestMemory::new(16 * MIB);

    let drain = |seen: &mut HashSet<u64>| -> Vec<PhysicalAddress> {
        let mut got = Vec::new();
        while let Some(a) = mem.pmm.alloc() {
            assert!(a.is_aligned(FrameSize::Size4K));
            assert!(seen.insert(a.as_u64()), "frame {a} issued twice");
            got.push(a);
        }
        got
    };

    let mut seen = HashSet::new();
    let first_sweep = drain(&mut seen);
    // 16 MiB minus bootstrap, auxiliary and supply reservations.
    assert!(first_sweep.len() > 3000, "only {} frames", first_sweep.len());
    assert!(first_sweep.len() <= 3511, "too many: {}", first_sweep.len());

    // Exhausted: the next call keeps failing without damaging state.
    assert_eq!(mem.pmm.alloc(), None);
    assert_eq!(mem.pmm.alloc(), None);

    for &a in first_sweep.iter().rev() {
        mem.pmm.free(a);
    }

    // Every tracked granule is allocatable again.
    let mut seen = HashSet::new();
    let second_sweep = drain(&mut seen);
    assert_eq!(second_sweep.len(), first_sweep.len());
}

#[test]
fn freed_granules_merge_back_into_a_whole_frame() {
    let mem = TestMemory::new(64 * MIB);

    // Two 2 MiB frames off the top of the DMA32 bank. The upper one is
    // sacrificial: freeing its granules afterwards pulls the supply
    // list's low-address entries out and replaces them with high ones, so
    // the lower block's granules all land on the free stack instead of
    // being scattered into the supply reservoir.
    let block_hi = mem.pmm.alloc_sized(FrameSize::Size2M).expect("2M frame");
    let block_lo = mem.pmm.alloc_sized(FrameSize::Size2M).expect("2M frame");
    assert!(block_lo < block_hi);

    for i in 0..FrameSize::SPLIT_RATIO as u64 {
        mem.pmm.free(block_lo + i * PAGE);
    }
    for i in 0..FrameSize::SPLIT_RATIO as u64 {
        mem.pmm.free(block_hi + i * PAGE);
    }

    // Defragmentation coalesces the complete lower run; any single free
    // 2 MiB frame satisfies a one-frame contiguous request.
    let one = mem.pmm.alloc_contiguous(FrameSize::Size2M, 1);
    assert!(one.is_some());
    assert!(one.unwrap().is_aligned(FrameSize::Size2M));

    // After the merge the lower block is the highest 2 MiB frame again.
    assert_eq!(mem.pmm.alloc_sized(FrameSize::Size2M), Some(block_lo));

    // Its granules are gone from the 4 KiB inventory: drain everything
    // and check none of them shows up.
    let mut four_k = Vec::new();
    while let Some(a) = mem.pmm.alloc() {
        assert!(
            a < block_lo || a.as_u64() >= block_lo.as_u64() + FrameSize::Size2M.bytes(),
            "granule {a} of the merged block leaked"
        );
        four_k.push(a);
    }
    assert!(!four_k.is_empty());
}

#[test]
fn contiguous_run_found_after_interleaved_churn() {
    let mem = TestMemory::new(1024 * MIB);

    // Five rounds of interleaved 2 MiB and 4 KiB allocations, then free
    // everything in reverse, leaving the 2 MiB frees scattered between
    // thousands of 4 KiB frees.
    let mut small = Vec::new();
    let mut big = Vec::new();
    for _ in 0..5 {
        for _ in 0..95 {
            big.push(mem.pmm.alloc_sized(FrameSize::Size2M).expect("2M frame"));
        }
        for _ in 0..500 {
            small.push(mem.pmm.alloc().expect("4K frame"));
        }
    }
    for _ in 0..5 {
        for _ in 0..500 {
            mem.pmm.free(small.pop().unwrap());
        }
        for _ in 0..95 {
            mem.pmm.free_sized(FrameSize::Size2M, big.pop().unwrap());
        }
    }

    // 100 contiguous 2 MiB frames (200 MiB) must exist after the
    // defragmentation pass sorts the lists back together.
    let base = mem
        .pmm
        .alloc_contiguous(FrameSize::Size2M, 100)
        .expect("contiguous 200 MiB run");
    assert!(base.is_aligned(FrameSize::Size2M));
    assert!(base.as_u64() + 100 * FrameSize::Size2M.bytes() <= 1024 * MIB);
}

#[test]
fn massive_cycle_conserves_the_frame_inventory() {
    let mem = TestMemory::new(1024 * MIB);

    // 400 000 allocation attempts overshoot a 1 GiB space by design: the
    // tail must fail cleanly, and the failures must not corrupt anything.
    let mut addrs: Vec<Option<PhysicalAddress>> = Vec::with_capacity(400_000);
    let mut seen = HashSet::new();
    for _ in 0..400_000 {
        let got = mem.pmm.alloc();
        if let Some(a) = got {
            assert!(a.is_aligned(FrameSize::Size4K));
            assert!(seen.insert(a.as_u64()), "frame {a} issued twice");
        }
        addrs.push(got);
    }
    let first_count = seen.len();
    assert!(addrs.iter().any(Option::is_none), "1 GiB never exhausted");
    assert!(first_count > 200_000, "only {first_count} frames issued");

    for got in addrs.iter().rev() {
        if let Some(a) = *got {
            mem.pmm.free(a);
        }
    }

    // A second full drain issues exactly as many frames: nothing leaked,
    // nothing was duplicated.
    let mut seen = HashSet::new();
    while let Some(a) = mem.pmm.alloc() {
        assert!(seen.insert(a.as_u64()), "frame {a} issued twice");
    }
    assert_eq!(seen.len(), first_count);
}

#[test]
fn dump_reports_granule_states() {
    let mem = TestMemory::new(16 * MIB);

    let granules = (16 * MIB / PAGE) as usize;
    let mut out = vec![0u8; 8 + granules];
    let written = mem.pmm.dump(&mut out).expect("dump");
    assert_eq!(written, 8 + granules);
    assert_eq!(u64::from_le_bytes(out[..8].try_into().unwrap()), granules as u64);

    let body = &out[8..];
    let free4k = GranuleFlags::FREE.bits();
    let free2m = (GranuleFlags::FREE | GranuleFlags::SIZE_2M).bits();
    let free1g = (GranuleFlags::FREE | GranuleFlags::SIZE_1G).bits();
    let stack = GranuleFlags::STACK_PAGE.bits();
    let reserved = GranuleFlags::RESERVED.bits();
    let aux = GranuleFlags::AUX.bits();
    for (i, &b) in body.iter().enumerate() {
        assert!(
            b == 0 || b == free4k || b == free2m || b == free1g || b == stack || b == reserved || b == aux,
            "granule {i} has unexpected state {b:#04x}"
        );
    }

    // The supply list was filled to capacity at init.
    assert_eq!(body.iter().filter(|&&b| b == reserved).count(), 510);
    // All 64 auxiliary pages sit at the top of the tracked range.
    assert_eq!(body.iter().filter(|&&b| b == aux).count(), 64);
    let aux_first = (16 * MIB - AUX_BYTES) / PAGE;
    assert!(body[aux_first as usize..].iter().all(|&b| b == aux));
    // The ten bootstrap pages are live stack pages.
    for i in 1..11 {
        assert_eq!(body[i], stack, "bootstrap page {i} not marked");
    }
    // Frames exist below the aux region.
    assert!(body.iter().any(|&b| b == free4k));
    assert!(body.iter().any(|&b| b == free2m));

    // Too-small buffers are rejected, not truncated.
    let mut tiny = [0u8; 16];
    assert!(mem.pmm.dump(&mut tiny).is_err());
}
