use core::fmt;

/// Supported x86-64 physical frame sizes.
///
/// These correspond to the three leaf granularities of the paging
/// hierarchy: 4 KiB pages mapped through the PT level, and the 2 MiB /
/// 1 GiB huge pages that terminate at PD or PDPT. Each size is exactly
/// [`SPLIT_RATIO`](Self::SPLIT_RATIO) frames of the next smaller size, so
/// a frame can be split into (or merged from) 512 smaller frames.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(usize)]
pub enum FrameSize {
    /// 4 KiB frame (base granularity).
    Size4K = 0,
    /// 2 MiB huge frame.
    Size2M = 1,
    /// 1 GiB giant frame.
    Size1G = 2,
}

impl FrameSize {
    /// Number of size classes.
    pub const COUNT: usize = 3;

    /// All size classes, smallest first.
    pub const ALL: [Self; Self::COUNT] = [Self::Size4K, Self::Size2M, Self::Size1G];

    /// Frames of one size per frame of the next larger size.
    pub const SPLIT_RATIO: usize = 512;

    /// Frame size in bytes (power of two).
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size4K => 4096,
            Self::Size2M => 2 * 1024 * 1024,
            Self::Size1G => 1024 * 1024 * 1024,
        }
    }

    /// log2 of the size in bytes.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Size4K => 12,
            Self::Size2M => 21,
            Self::Size1G => 30,
        }
    }

    /// Dense `0..COUNT` index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The next larger size class, if any.
    #[inline]
    #[must_use]
    pub const fn larger(self) -> Option<Self> {
        match self {
            Self::Size4K => Some(Self::Size2M),
            Self::Size2M => Some(Self::Size1G),
            Self::Size1G => None,
        }
    }

    /// The next smaller size class, if any.
    #[inline]
    #[must_use]
    pub const fn smaller(self) -> Option<Self> {
        match self {
            Self::Size4K => None,
            Self::Size2M => Some(Self::Size4K),
            Self::Size1G => Some(Self::Size2M),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size4K => "4K",
            Self::Size2M => "2M",
            Self::Size1G => "1G",
        }
    }
}

impl fmt::Display for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for FrameSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_powers_of_two() {
        for size in FrameSize::ALL {
            assert_eq!(size.bytes(), 1 << size.shift());
        }
    }

    #[test]
    fn split_ratio_links_adjacent_sizes() {
        assert_eq!(
            FrameSize::Size4K.bytes() * FrameSize::SPLIT_RATIO as u64,
            FrameSize::Size2M.bytes()
        );
        assert_eq!(
            FrameSize::Size2M.bytes() * FrameSize::SPLIT_RATIO as u64,
            FrameSize::Size1G.bytes()
        );
    }

    #[test]
    fn larger_and_smaller_are_inverses() {
        assert_eq!(FrameSize::Size4K.larger(), Some(FrameSize::Size2M));
        assert_eq!(FrameSize::Size2M.smaller(), Some(FrameSize::Size4K));
        assert_eq!(FrameSize::Size1G.larger(), None);
        assert_eq!(FrameSize::Size4K.smaller(), None);
    }
}
