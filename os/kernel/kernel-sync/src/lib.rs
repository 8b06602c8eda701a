//! # Kernel synchronization primitives
//!
//! A spin lock with RAII guards, plus an interrupt-masking variant
//! ([`SpinLock::lock_irq`]) for critical sections that may also run in
//! interrupt context: the guard saves the interrupt flag, executes `cli`,
//! takes the lock, and restores both in reverse order on drop. Without
//! masking, an interrupt handler allocating on the same core would spin
//! forever on the lock its own core already holds.
//!
//! The `cli`/`sti`/`pushfq` instructions are only emitted for bare-metal
//! x86-64 builds (`target_os = "none"`); on hosted targets [`IrqGuard`] is
//! a no-op so code layered on top stays testable with `cargo test`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin;

pub use irq::IrqGuard;
pub use spin::{SpinLock, SpinLockGuard, SpinLockIrqGuard};
