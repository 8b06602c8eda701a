//! Interrupt-flag save/disable/restore.

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    /// Returns the current `RFLAGS` value (via `pushfq`/`pop`).
    #[inline]
    fn rflags() -> u64 {
        let r: u64;
        // SAFETY: reading RFLAGS has no side effects.
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r
    }

    /// Whether the interrupt flag (`RFLAGS.IF`, bit 9) is set.
    #[inline]
    pub fn interrupts_enabled() -> bool {
        rflags() & (1 << 9) != 0
    }

    /// Disables hardware interrupts (`cli`). Requires CPL0.
    #[inline]
    pub fn disable_interrupts() {
        // SAFETY: the kernel runs at CPL0 where `cli` is permitted.
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    /// Enables hardware interrupts (`sti`). Requires CPL0.
    #[inline]
    pub fn enable_interrupts() {
        // SAFETY: the kernel runs at CPL0 where `sti` is permitted.
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// Hosted fallback: there is no interrupt flag to manage, so the guard
/// degenerates to a no-op and tests exercise the plain lock path.
#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[inline]
    pub fn interrupts_enabled() -> bool {
        false
    }

    #[inline]
    pub fn disable_interrupts() {}

    #[inline]
    pub fn enable_interrupts() {}
}

/// RAII guard that disables interrupts on creation and restores them on
/// drop.
///
/// The constructor snapshots `RFLAGS.IF`; if interrupts were enabled it
/// executes `cli`. Dropping the guard executes `sti` **only** if they were
/// previously enabled, preserving the original state across nesting.
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the
    /// prior state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let were_enabled = arch::interrupts_enabled();
        if were_enabled {
            arch::disable_interrupts();
        }
        Self { were_enabled }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            arch::enable_interrupts();
        }
    }
}
