//! # Kernel
//!
//! Public API for EdfOS tasks and firmware. Owns the heap arena and routes
//! every call either through the syscall gateway (anything that may change
//! which task runs) or through a short critical section (queries, memory,
//! deadline changes).
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← heap, task table, idle task
//!         ├─► kernel::create_task() ← register tasks (×N)
//!         └─► kernel::start()       ← no return on success
//!               ├─► SysTick + exception priorities
//!               └─► svc START → first task via arch::start_first_task()
//! ```

use core::cell::UnsafeCell;

use crate::arch;
use crate::config::{DEFAULT_DEADLINE, HEAP_SIZE, TID_IDLE};
use crate::error::{KernelError, Result};
use crate::syscall::{Reply, Request, Syscall, Wake};
use crate::sync;
use crate::task::{TaskConfig, TaskControlBlock, TaskId};

// ---------------------------------------------------------------------------
// Heap arena
// ---------------------------------------------------------------------------

#[repr(C, align(8))]
struct Arena(UnsafeCell<[u8; HEAP_SIZE]>);

// SAFETY: the arena is only reached through addresses handed out by the
// heap, which lives behind the kernel critical section.
unsafe impl Sync for Arena {}

static ARENA: Arena = Arena(UnsafeCell::new([0; HEAP_SIZE]));

#[inline]
fn arena_base() -> usize {
    ARENA.0.get() as usize
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Initialize the kernel: heap, task table and the idle task.
///
/// Must be called once, before any other kernel function.
pub fn init() -> Result<()> {
    sync::with_kernel(|k| {
        k.init(arena_base(), HEAP_SIZE)?;
        if let Some((sp, frame)) = k.initial_frame(TID_IDLE) {
            // SAFETY: the idle stack was just carved out of the arena.
            unsafe { arch::write_initial_frame(sp, frame) };
        }
        Ok(())
    })
}

/// Start scheduling. Configures SysTick and the exception priorities, then
/// dispatches the most urgent task (idle if none was created).
///
/// Only returns on failure: the kernel is not initialized or already
/// running.
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> Result<()> {
    sync::with_kernel(|k| {
        if !k.is_initialized() {
            Err(KernelError::KernelUninitialized)
        } else if k.is_running() {
            Err(KernelError::AlreadyRunning)
        } else {
            Ok(())
        }
    })?;
    arch::prepare_start(&mut core_peripherals);
    dispatch_first()
}

fn dispatch_first() -> Result<()> {
    Syscall::invoke(Request::Start).map(|_| ())
}

// ---------------------------------------------------------------------------
// Task API
// ---------------------------------------------------------------------------

/// Create a task with the default deadline.
pub fn create_task(config: TaskConfig) -> Result<TaskId> {
    create_task_with_deadline(DEFAULT_DEADLINE, config)
}

/// Create a task with a period budget of `deadline` ticks. If it is more
/// urgent than the caller, it runs before this returns.
pub fn create_task_with_deadline(deadline: u32, config: TaskConfig) -> Result<TaskId> {
    match Syscall::invoke(Request::Create { config, deadline })? {
        Reply::Created(id) => Ok(id),
        _ => Err(KernelError::InvalidRequest),
    }
}

/// Give up the CPU. The caller competes again straight away with a fresh
/// budget.
pub fn yield_task() -> Result<()> {
    Syscall::invoke(Request::Yield).map(|_| ())
}

/// Block until the caller's next period starts.
pub fn period_yield() -> Result<()> {
    Syscall::invoke(Request::Sleep(Wake::NextPeriod)).map(|_| ())
}

/// Block for `ms` ticks.
pub fn sleep(ms: u32) -> Result<()> {
    Syscall::invoke(Request::Sleep(Wake::After(ms))).map(|_| ())
}

/// Terminate the calling task. Does not return on success.
pub fn exit() -> Result<()> {
    Syscall::invoke(Request::Exit).map(|_| ())
}

/// Id of the calling task; the idle id before start.
pub fn self_id() -> TaskId {
    sync::with_kernel(|k| k.current_id())
}

/// Snapshot of task `id`. Stale as soon as it is returned.
pub fn task_info(id: TaskId) -> Result<TaskControlBlock> {
    sync::with_kernel(|k| k.task_info(id))
}

/// Give READY task `id` a new period budget. Preempts the caller if `id`
/// becomes more urgent.
pub fn set_deadline(deadline: u32, id: TaskId) -> Result<()> {
    let preempt = sync::with_kernel(|k| k.set_deadline(id, deadline))?;
    if preempt {
        arch::pend_switch();
    }
    Ok(())
}

pub fn active_tasks() -> usize {
    sync::with_kernel(|k| k.active_tasks())
}

/// Stack bytes held by live tasks, idle included.
pub fn stack_used() -> usize {
    sync::with_kernel(|k| k.stack_used())
}

// ---------------------------------------------------------------------------
// Memory API
// ---------------------------------------------------------------------------

/// Initialize the heap. `init` already does this, so on a running system
/// this reports [`KernelError::AlreadyInitialized`].
pub fn mem_init() -> Result<()> {
    sync::with_kernel(|k| k.mem_init(arena_base(), HEAP_SIZE))
}

/// Allocate `size` bytes owned by the calling task.
pub fn mem_alloc(size: usize) -> Result<*mut u8> {
    sync::with_kernel(|k| k.mem_alloc(size)).map(|addr| addr as *mut u8)
}

/// Release a block the calling task allocated.
pub fn mem_dealloc(ptr: *mut u8) -> Result<()> {
    sync::with_kernel(|k| k.mem_dealloc(ptr as usize))
}

/// Free blocks too small to hold `size` bytes including bookkeeping.
pub fn mem_count_extfrag(size: usize) -> usize {
    sync::with_kernel(|k| k.mem_count_extfrag(size))
}

// ---------------------------------------------------------------------------
// Exception entry points
// ---------------------------------------------------------------------------

/// Tick accounting. Called from SysTick.
pub fn tick() {
    let pend = sync::with_kernel(|k| {
        k.tick();
        k.switch_pending()
    });
    if pend {
        arch::pend_switch();
    }
}

/// Context switch bookkeeping. Called from PendSV with the outgoing task's
/// stack pointer; returns the incoming one.
pub fn switch_context(saved_sp: usize) -> usize {
    sync::with_kernel(|k| k.switch_context(saved_sp))
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{task_return, InitialFrame, TaskState};

    extern "C" fn dummy() -> ! {
        loop {}
    }

    fn config() -> TaskConfig {
        TaskConfig {
            entry: dummy,
            stack_size: 0x200,
        }
    }

    // The kernel state is global, so the whole API is walked in one test.
    #[test]
    fn test_kernel_api_lifecycle() {
        arch::take_pending();

        assert_eq!(create_task(config()), Err(KernelError::KernelUninitialized));
        init().unwrap();
        assert_eq!(init(), Err(KernelError::AlreadyInitialized));
        assert_eq!(mem_init(), Err(KernelError::AlreadyInitialized));
        assert_eq!(self_id(), TID_IDLE);

        // A stack too small for the initial frame is refused before any
        // frame is written next to another block
        let neighbour = mem_alloc(16).unwrap();
        // SAFETY: 16 bytes just handed out by the heap
        unsafe { neighbour.write_bytes(0xAA, 16) };
        let tiny = TaskConfig {
            entry: dummy,
            stack_size: 8,
        };
        assert_eq!(
            create_task_with_deadline(5, tiny),
            Err(KernelError::InvalidStackSize(8))
        );
        // SAFETY: still owned by the idle task
        let bytes = unsafe { core::slice::from_raw_parts(neighbour, 16) };
        assert!(bytes.iter().all(|&b| b == 0xAA));
        mem_dealloc(neighbour).unwrap();
        assert_eq!(active_tasks(), 1);

        let slow = create_task_with_deadline(11, config()).unwrap();
        let fast = create_task_with_deadline(4, config()).unwrap();
        assert!(!arch::take_pending());
        assert_eq!(active_tasks(), 3);

        // Initial frames land in the arena
        let info = task_info(fast).unwrap();
        assert!(info.stack_bottom >= arena_base());
        assert!(info.stack_top <= arena_base() + HEAP_SIZE);
        // SAFETY: written by the gateway when `fast` was created
        let frame = unsafe { core::ptr::read(info.stack_pointer as *const InitialFrame) };
        assert_eq!(frame.pc, dummy as usize as u32);
        assert_eq!(frame.lr, task_return as usize as u32);

        assert_eq!(yield_task(), Err(KernelError::KernelNotRunning));
        dispatch_first().unwrap();
        assert_eq!(self_id(), fast);
        assert_eq!(task_info(fast).unwrap().state, TaskState::Running);

        let block = mem_alloc(10).unwrap();
        assert!(!block.is_null());

        // Tighter deadline on `slow` preempts `fast`
        set_deadline(2, slow).unwrap();
        assert!(arch::take_pending());
        switch_context(info.stack_pointer);
        assert_eq!(self_id(), slow);
        assert_eq!(mem_dealloc(block), Err(KernelError::NotOwner));
        assert_eq!(set_deadline(3, slow), Err(KernelError::NotPermitted(slow)));

        sleep(3).unwrap();
        assert!(arch::take_pending());
        switch_context(0);
        assert_eq!(self_id(), fast);
        mem_dealloc(block).unwrap();
        assert_eq!(mem_dealloc(core::ptr::null_mut()), Err(KernelError::InvalidRequest));

        // `slow` wakes on the third tick; `fast` is down to 1 and keeps the CPU
        tick();
        tick();
        assert!(!arch::take_pending());
        tick();
        assert!(arch::take_pending());
        assert_eq!(task_info(slow).unwrap().state, TaskState::Ready);
        switch_context(info.stack_pointer);
        assert_eq!(self_id(), fast);

        let used = stack_used();
        exit().unwrap();
        assert!(arch::take_pending());
        assert_eq!(active_tasks(), 2);
        assert_eq!(stack_used(), used - 0x200);
        switch_context(0);
        assert_eq!(self_id(), slow);
        assert_eq!(task_info(fast).unwrap_err(), KernelError::InvalidTask(fast));
    }
}
