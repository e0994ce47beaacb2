//! # Host Port
//!
//! Stand-in for the Cortex-M4 port on development machines. There are no
//! exceptions here: a trap calls the gateway directly, a pended switch only
//! raises a flag, and nothing ever jumps onto a task stack. Tests drive
//! dispatch by hand through `kernel::switch_context`.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::syscall::{self, Syscall};

static PENDING: AtomicBool = AtomicBool::new(false);

/// Nothing to configure without hardware.
pub fn prepare_start(_core_peripherals: &mut cortex_m::Peripherals) {}

/// Record that a context switch was requested.
#[inline]
pub fn pend_switch() {
    PENDING.store(true, Ordering::Release);
}

/// Take and clear the pending-switch flag.
pub fn take_pending() -> bool {
    PENDING.swap(false, Ordering::AcqRel)
}

/// No context to install on the host; the caller simply returns.
///
/// # Safety
/// Always safe here; `unsafe` to match the hardware port.
pub unsafe fn start_first_task(_stack_pointer: usize) {}

/// Enter the gateway in place of `svc 0`.
pub fn trap(call: &mut Syscall) {
    syscall::service(call);
}

#[inline]
pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}
