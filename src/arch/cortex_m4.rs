//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick configuration, exception priorities, the SVCall and PendSV entry
//! stubs, first-task bootstrap, and an ITM log sink.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and exception handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV pushes R4–R11 below that, hands the resulting
//! stack pointer to the scheduler and restores R4–R11 from whatever stack
//! pointer it gets back. The saved layout is exactly
//! [`InitialFrame`](crate::task::InitialFrame), which is how new tasks start.
//!
//! ## Interrupt Priorities
//!
//! - SVCall: 0xD0 (kernel requests run to completion)
//! - SysTick: 0xE0 (may be preempted by SVCall only)
//! - PendSV: 0xF0 (runs after all other kernel bookkeeping)

use core::arch::{asm, global_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{itm, ITM, SCB, SYST};

use crate::config::{
    PENDSV_PRIORITY, SVCALL_PRIORITY, SYSTEM_CLOCK_HZ, SYSTICK_PRIORITY, TICK_HZ,
};
use crate::syscall::{self, Syscall};

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the processor clock.
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// SVCall above SysTick above PendSV.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // SAFETY: priorities are set once, before the first task runs, and the
    // kernel's critical sections do not rely on priority masking.
    unsafe {
        scb.set_priority(SystemHandler::SVCall, SVCALL_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY);
        scb.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY);
    }
}

/// Everything the hardware needs before the first dispatch.
pub fn prepare_start(core_peripherals: &mut cortex_m::Peripherals) {
    set_interrupt_priorities(&mut core_peripherals.SCB);
    configure_systick(&mut core_peripherals.SYST);
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Request a context switch. Sets ICSR.PENDSVSET; PendSV runs as soon as no
/// more urgent exception is active.
#[inline]
pub fn pend_switch() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Bootstrap onto the first task's stack. Called from the SVCall handler
/// while servicing the start request; performs an exception return into
/// Thread mode on PSP and never comes back.
///
/// # Safety
/// `stack_pointer` must point at a valid [`InitialFrame`](crate::task::InitialFrame)
/// and the caller must be in Handler mode.
pub unsafe fn start_first_task(stack_pointer: usize) {
    asm!(
        // Reset MSP to the top of the main stack (vector table entry 0);
        // nothing on it is needed from here on
        "movw r1, #0xED08",
        "movt r1, #0xE000",
        "ldr r1, [r1]",
        "ldr r1, [r1]",
        "msr msp, r1",

        // Restore R4-R11 and point PSP at the hardware part of the frame
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "isb",

        // EXC_RETURN 0xFFFFFFFD: Thread mode, process stack
        "mvn lr, #2",
        "bx lr",

        in("r0") stack_pointer,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// Syscall trap
// ---------------------------------------------------------------------------

/// Trap into the syscall gateway with `call` in r0. Returns once the calling
/// task has been dispatched again, with `call.reply` filled in.
#[inline]
pub fn trap(call: &mut Syscall) {
    // SAFETY: SVCall only reads and writes `*call`, which outlives the trap.
    unsafe {
        asm!("svc 0", in("r0") call as *mut Syscall, options(nostack));
    }
}

// SVCall entry: find the stacked frame of the caller (MSP before start, PSP
// afterwards) and hand it to Rust.
global_asm!(
    ".section .text.SVCall, \"ax\", %progbits",
    ".global SVCall",
    ".type SVCall, %function",
    ".thumb_func",
    "SVCall:",
    "    tst lr, #4",
    "    ite eq",
    "    mrseq r0, msp",
    "    mrsne r0, psp",
    "    b {dispatch}",
    ".size SVCall, . - SVCall",
    dispatch = sym svcall_dispatch,
);

/// `frame[0]` is the caller's r0: the `Syscall` it trapped with.
///
/// # Safety
/// Only reachable from the SVCall stub above.
unsafe extern "C" fn svcall_dispatch(frame: *const u32) {
    let call = *frame as usize as *mut Syscall;
    syscall::service(&mut *call);
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

// 1. Save R4–R11 below the hardware frame on the outgoing task's stack
// 2. Let the scheduler record that stack pointer and pick the next task
// 3. Restore R4–R11 from the incoming task's stack and return onto it
global_asm!(
    ".section .text.PendSV, \"ax\", %progbits",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    stmdb r0!, {{r4-r11}}",
    "    bl {switch}",
    "    ldmia r0!, {{r4-r11}}",
    "    msr psp, r0",
    "    mvn lr, #2",
    "    bx lr",
    ".size PendSV, . - PendSV",
    switch = sym pendsv_switch,
);

extern "C" fn pendsv_switch(saved_sp: usize) -> usize {
    crate::kernel::switch_context(saved_sp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// Scheduler tick, `TICK_HZ` times a second.
#[no_mangle]
pub extern "C" fn SysTick() {
    crate::kernel::tick();
}

#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// ITM logger
// ---------------------------------------------------------------------------

/// `log` sink writing to ITM stimulus port 0. Silently drops records while
/// no debugger has enabled the ITM or the port.
pub struct ItmLogger;

static LOGGER: ItmLogger = ItmLogger;

impl log::Log for ItmLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        critical_section::with(|_| {
            // SAFETY: single core with interrupts masked; nothing else
            // touches the ITM.
            let itm = unsafe { &mut *(ITM::PTR as *mut itm::RegisterBlock) };
            if itm.tcr.read() & 1 == 0 || itm.ter[0].read() & 1 == 0 {
                return;
            }
            cortex_m::itm::write_fmt(
                &mut itm.stim[0],
                format_args!("[{}] {}\n", record.level(), record.args()),
            );
        });
    }

    fn flush(&self) {}
}

/// Install the ITM logger. A second call keeps the first logger.
pub fn init_logger(level: log::LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
