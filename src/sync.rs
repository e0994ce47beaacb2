//! # Synchronization
//!
//! The one kernel state value and the critical-section discipline around it.
//!
//! On target the critical section masks interrupts (PRIMASK) through
//! cortex-m's single-core `critical-section` implementation. Host tests link
//! the `std` implementation instead, so the same code runs unchanged.
//!
//! Every mutation of the task table, the ready queue or the heap goes through
//! [`with_kernel`]. Nesting is not allowed: the state sits in a `RefCell`, so
//! a nested borrow panics instead of silently aliasing.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::scheduler::Scheduler;

/// The kernel state. Created at boot, initialized by `kernel::init`, never
/// torn down.
static KERNEL: Mutex<RefCell<Scheduler>> = Mutex::new(RefCell::new(Scheduler::new()));

/// Run `f` on the kernel state with interrupts masked.
///
/// # Usage
/// ```ignore
/// let id = sync::with_kernel(|k| k.current_id());
/// ```
///
/// Keep the closure short: it delays SysTick and every other interrupt.
#[inline]
pub fn with_kernel<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    critical_section::with(|cs| f(&mut KERNEL.borrow_ref_mut(cs)))
}
