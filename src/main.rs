//! # EdfOS Example Firmware
//!
//! Three periodic tasks sharing two counters:
//!
//! | Task | Deadline | Behavior |
//! |------|----------|----------|
//! | `reporter_task` | 4 ms | Logs both counters, then waits for its next period |
//! | `fast_counter_task` | 4 ms | Bumps `FAST` once per period |
//! | `slow_counter_task` | 12 ms | Bumps `SLOW` once per period, every 64th period borrows scratch memory |
//!
//! With all three calling `period_yield`, `FAST` should advance about three
//! times as quickly as `SLOW`, and the idle task soaks up the rest of each
//! period. Log output goes to ITM stimulus port 0.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use edfos::arch;
use edfos::config::DEFAULT_STACK_SIZE;
use edfos::kernel;
use edfos::task::TaskConfig;

static FAST: AtomicU32 = AtomicU32::new(0);
static SLOW: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn reporter_task() -> ! {
    loop {
        log::info!(
            "task {}: fast={} slow={}",
            kernel::self_id(),
            FAST.load(Ordering::Relaxed),
            SLOW.load(Ordering::Relaxed)
        );
        let _ = kernel::period_yield();
    }
}

extern "C" fn fast_counter_task() -> ! {
    loop {
        FAST.fetch_add(1, Ordering::Relaxed);
        let _ = kernel::period_yield();
    }
}

extern "C" fn slow_counter_task() -> ! {
    loop {
        let count = SLOW.fetch_add(1, Ordering::Relaxed) + 1;

        // Exercise the task-owned heap now and then
        if count % 64 == 0 {
            match kernel::mem_alloc(128) {
                Ok(scratch) => {
                    // SAFETY: 128 bytes owned by this task until freed below
                    unsafe { scratch.write_bytes(0, 128) };
                    let _ = kernel::mem_dealloc(scratch);
                }
                Err(err) => log::warn!("scratch allocation failed: {}", err),
            }
        }

        let _ = kernel::period_yield();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Initializes the kernel, creates the tasks and
/// starts scheduling. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    arch::init_logger(log::LevelFilter::Info);

    kernel::init().expect("kernel init failed");

    let tasks = [
        (4, reporter_task as extern "C" fn() -> !),
        (4, fast_counter_task),
        (12, slow_counter_task),
    ];
    for (deadline, entry) in tasks {
        let config = TaskConfig {
            entry,
            stack_size: DEFAULT_STACK_SIZE,
        };
        kernel::create_task_with_deadline(deadline, config).expect("task creation failed");
    }

    // Only returns if the kernel refused to start
    let err = kernel::start(cp).unwrap_err();
    panic!("kernel start failed: {}", err);
}
