//! # EdfOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time: the task table, the ready queue and the allocator's block
//! descriptor pool are statically sized.

use crate::task::TaskId;

/// Maximum number of tasks alive at once, the idle task included.
/// Bounds the task table and the ready queue.
pub const MAX_TASKS: usize = 16;

/// Task id permanently owned by the idle task.
pub const TID_IDLE: TaskId = 0;

/// SysTick frequency in Hz. One tick is one millisecond of deadline
/// budget and sleep time.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

/// Size in bytes of the memory arena managed by the heap allocator.
pub const HEAP_SIZE: usize = 0x8000;

/// Bytes of bookkeeping charged against the arena for every block.
/// Usable sizes exclude it; arena accounting always includes it.
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Smallest usable size a split-off free block may have.
pub const MIN_BLOCK_SIZE: usize = 4;

/// Granularity of every usable size.
pub const HEAP_ALIGN: usize = 4;

/// Number of block descriptors available to the allocator: one for every
/// block of the smallest possible footprint the arena can hold.
pub const MAX_BLOCKS: usize = HEAP_SIZE / (BLOCK_HEADER_SIZE + MIN_BLOCK_SIZE);

// ---------------------------------------------------------------------------
// Stacks
// ---------------------------------------------------------------------------

/// Stack size of the idle task.
pub const IDLE_STACK_SIZE: usize = 0x200;

/// Stack size used by the demo firmware and a sensible default for tasks.
pub const DEFAULT_STACK_SIZE: usize = 0x400;

/// Smallest stack a task may be created with. The initial exception frame
/// alone takes 64 bytes of it.
pub const MIN_STACK_SIZE: usize = 0x200;

/// Task stack sizes must be a multiple of this (AAPCS stack alignment).
pub const STACK_ALIGN: usize = 8;

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

/// Period budget in ticks given to tasks created without an explicit deadline.
pub const DEFAULT_DEADLINE: u32 = 5;

// ---------------------------------------------------------------------------
// Interrupt priorities (lower value = more urgent)
// ---------------------------------------------------------------------------

/// The syscall gateway preempts both the tick and the context switch.
pub const SVCALL_PRIORITY: u8 = 0xD0;

/// The tick preempts the context switch but never the gateway.
pub const SYSTICK_PRIORITY: u8 = 0xE0;

/// The context switch only runs once all kernel bookkeeping has finished.
pub const PENDSV_PRIORITY: u8 = 0xF0;
