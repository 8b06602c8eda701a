use crate::FrameSize;
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// A thin wrapper around `u64` that carries physical-address intent and
/// prevents accidental mix-ups with virtual addresses or plain counters.
///
/// ### Semantics
/// - Frame base addresses are always aligned to their [`FrameSize`]; use
///   [`align_down`](Self::align_down) / [`align_up`](Self::align_up) to
///   derive the enclosing or next frame base.
/// - The free lists use the raw value `0` as a "no page" sentinel, so real
///   frame inventory never starts at physical zero.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the `0` sentinel.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Highest frame-aligned address `<= self` for the given size.
    #[inline]
    #[must_use]
    pub const fn align_down(self, size: FrameSize) -> Self {
        Self(self.0 & !(size.bytes() - 1))
    }

    /// Lowest frame-aligned address `>= self` for the given size.
    ///
    /// Wraps on overflow like the underlying integer arithmetic; callers
    /// pass addresses well below the top of the physical address space.
    #[inline]
    #[must_use]
    pub const fn align_up(self, size: FrameSize) -> Self {
        Self((self.0.wrapping_add(size.bytes() - 1)) & !(size.bytes() - 1))
    }

    /// Whether this address is frame-aligned for the given size.
    #[inline]
    #[must_use]
    pub const fn is_aligned(self, size: FrameSize) -> bool {
        self.0 & (size.bytes() - 1) == 0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_down_and_up() {
        let a = PhysicalAddress::new(0x0000_0000_1234_5678);
        assert_eq!(a.align_down(FrameSize::Size4K).as_u64(), 0x1234_5000);
        assert_eq!(a.align_up(FrameSize::Size4K).as_u64(), 0x1234_6000);
        assert_eq!(a.align_down(FrameSize::Size2M).as_u64(), 0x1220_0000);
        assert_eq!(a.align_up(FrameSize::Size2M).as_u64(), 0x1240_0000);
        assert_eq!(a.align_down(FrameSize::Size1G).as_u64(), 0);
        assert_eq!(a.align_up(FrameSize::Size1G).as_u64(), 0x4000_0000);
    }

    #[test]
    fn aligned_address_is_a_fixed_point() {
        let a = PhysicalAddress::new(0x4000_0000);
        for size in FrameSize::ALL {
            assert!(a.is_aligned(size));
            assert_eq!(a.align_down(size), a);
            assert_eq!(a.align_up(size), a);
        }
    }
}
