//! # Architecture Abstraction Layer
//!
//! Hardware boundary of the kernel. Each port provides the same function set:
//!
//! | Function | Purpose |
//! |----------|---------|
//! | `prepare_start` | tick timer and interrupt priorities |
//! | `pend_switch` | request a deferred context switch |
//! | `start_first_task` | one-time bootstrap onto a task stack |
//! | `trap` | enter the syscall gateway |
//! | `wait_for_interrupt` | idle until something happens |
//!
//! The Cortex-M4 port drives real hardware. The host port stands in for it
//! on every other target so the kernel can be exercised by `cargo test`.

use crate::task::InitialFrame;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::*;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod host;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use host::*;

/// Place `frame` at `stack_pointer`, where the context switch will look for
/// it the first time the task is dispatched.
///
/// # Safety
/// `stack_pointer` must be 4-byte aligned and point at `InitialFrame::SIZE`
/// writable bytes inside a stack nobody is running on.
#[inline]
pub unsafe fn write_initial_frame(stack_pointer: usize, frame: InitialFrame) {
    core::ptr::write(stack_pointer as *mut InitialFrame, frame);
}
