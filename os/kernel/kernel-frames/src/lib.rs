//! # Physical Frame Addressing
//!
//! Strongly typed building blocks for physical frame management: a
//! [`PhysicalAddress`] newtype, the three x86-64 frame sizes
//! ([`FrameSize`]), the hardware-addressing zones ([`Zone`]) and the pure
//! classifier that maps a (size, address) pair to its zone and free-list
//! bank.
//!
//! ## Overview
//!
//! The frame allocator keeps one free list per (size, zone) pair. Sizes and
//! zones are therefore *run-time* values here (small dense enums rather
//! than marker types) so a bank can be picked by index:
//!
//! | Concept | Description |
//! |----------|-------------|
//! | [`PhysicalAddress`] | A raw 64-bit physical address. |
//! | [`FrameSize`] | 4 KiB / 2 MiB / 1 GiB frame granularity. |
//! | [`Zone`] | DMA (< 16 MiB) / DMA32 (< 4 GiB) / STD address classes. |
//! | [`bank_index`] | Dense `0..9` index over (size, zone). |
//!
//! A frame belongs to the zone that contains its **last** byte, so a frame
//! lies entirely inside its zone's boundary:
//!
//! ```rust
//! # use kernel_frames::*;
//! // The 2 MiB frame ending just below 16 MiB is DMA-addressable...
//! assert_eq!(Zone::of(FrameSize::Size2M, PhysicalAddress::new(0x00E0_0000)), Zone::Dma);
//! // ...the one starting at 15 MiB crosses the boundary and is not.
//! assert_eq!(Zone::of(FrameSize::Size2M, PhysicalAddress::new(0x00F0_0000)), Zone::Dma32);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod frame_size;
mod physical_address;
mod zone;

pub use frame_size::FrameSize;
pub use physical_address::PhysicalAddress;
pub use zone::Zone;

/// Number of (size, zone) free-list banks.
pub const BANK_COUNT: usize = FrameSize::COUNT * Zone::COUNT;

/// Dense `0..BANK_COUNT` index of the free-list bank for `(size, zone)`.
#[inline]
#[must_use]
pub const fn bank_index(size: FrameSize, zone: Zone) -> usize {
    size.index() * Zone::COUNT + zone.index()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_indices_are_dense_and_unique() {
        let mut seen = [false; BANK_COUNT];
        for size in FrameSize::ALL {
            for zone in Zone::ALL {
                let idx = bank_index(size, zone);
                assert!(idx < BANK_COUNT);
                assert!(!seen[idx]);
                seen[idx] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn bank_index_matches_layout() {
        assert_eq!(bank_index(FrameSize::Size4K, Zone::Dma), 0);
        assert_eq!(bank_index(FrameSize::Size4K, Zone::Std), 2);
        assert_eq!(bank_index(FrameSize::Size2M, Zone::Dma), 3);
        assert_eq!(bank_index(FrameSize::Size1G, Zone::Std), 8);
    }
}
