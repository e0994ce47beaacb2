//! # EdfOS: Earliest-Deadline-First Operating System
//!
//! A preemptive real-time kernel for ARM Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! EdfOS runs a fixed set of periodic tasks on a single core. Every task has
//! a period budget (its *deadline*, in 1 ms ticks) and the task with the
//! least budget left runs first. Task stacks and task allocations come from
//! a first-fit heap with per-task ownership.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │   init · start · create_task · yield · sleep · exit    │
//! │   set_deadline · task_info · mem_alloc · mem_dealloc   │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Syscall Gateway         │  Sync (sync.rs)             │
//! │  syscall.rs              │  ─ with_kernel              │
//! ├──────────────────────────┴─────────────────────────────┤
//! │                 Scheduler (scheduler.rs)               │
//! │  task table · tick · dispatch · preemption decisions   │
//! ├───────────────┬──────────────────┬─────────────────────┤
//! │ Ready Queue   │  Heap            │  Task Model         │
//! │ ready_queue.rs│  heap.rs         │  task.rs            │
//! │ ─ EDF min-heap│  ─ first fit     │  ─ TCB · states     │
//! │               │  ─ coalescing    │  ─ initial frame    │
//! ├───────────────┴──────────────────┴─────────────────────┤
//! │   Arch Port (arch/cortex_m4.rs, arch/host.rs)          │
//! │   SVCall · PendSV · SysTick · first-task bootstrap     │
//! ├────────────────────────────────────────────────────────┤
//! │            ARM Cortex-M4 Hardware (Thumb-2)            │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! - **Urgency**: ready tasks are ordered by `(time_left, id)`.
//! - **Tick**: every READY or RUNNING task loses one tick of budget. A
//!   running task that runs out starts a new period and yields.
//! - **Preemption**: creating a task or tightening a deadline preempts the
//!   running task when the target becomes more urgent.
//! - **Idle**: task 0 runs whenever nothing else is ready and is never
//!   queued.
//!
//! ## Interrupt Model
//!
//! | Exception | Priority | Role |
//! |-----------|----------|------|
//! | SVCall    | 0xD0     | syscall gateway |
//! | SysTick   | 0xE0     | budget and sleep accounting |
//! | PendSV    | 0xF0     | register save/restore |
//!
//! ## Memory Model
//!
//! - **Heap**: one static arena, block descriptors in a fixed pool
//! - **No `alloc`**: pure `core`
//! - **Fixed-size task table**: `[TaskControlBlock; MAX_TASKS]`
//! - **Critical sections**: `critical_section::with` around all kernel state

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod ready_queue;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod task;

pub use error::{ErrorKind, KernelError, Result};
pub use task::{TaskConfig, TaskId, TaskState};
