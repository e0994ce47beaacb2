//! # Task Control Block
//!
//! Defines the task model for EdfOS. A task is an entry function plus a
//! heap-allocated stack, scheduled by its remaining period budget
//! (`time_left`): the task closest to exhausting its budget runs first.
//!
//! ## Urgency Key
//!
//! Tasks are ordered by `(time_left, id)`, ascending. The id tie-break keeps
//! the order total and deterministic, so equally urgent tasks never starve
//! each other through an arbitrary pick.

use core::mem::size_of;

use crate::config::{IDLE_STACK_SIZE, MIN_STACK_SIZE, STACK_ALIGN, TID_IDLE};

/// Small integer task identifier. Also the task's slot in the task table.
pub type TaskId = usize;

/// Task entry point. Tasks never return; one that does falls through to
/// [`task_return`] and exits.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a task slot.
///
/// ```text
///   Uninit ──create──► Ready ──dispatch──► Running ──sleep──► Sleeping
///                        ▲                   │  │                │
///                        └─yield / overrun / preempt             │
///                        ▲                      │                │
///                        └──────────────────────┼── wake ────────┘
///                                               ▼
///   Dormant ◄────────────────────────────── exit
///      └──create (new identity)──► Ready
/// ```
///
/// `Uninit` and `Dormant` both mark a free slot; `Dormant` records that the
/// slot was used before and exited cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot has never been used.
    Uninit,
    /// Previous occupant exited; slot is free again.
    Dormant,
    /// Waiting in the ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// Blocked until `sleep_time` ticks have elapsed.
    Sleeping,
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// What the application supplies when creating a task.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Entry function.
    pub entry: TaskEntry,
    /// Stack size in bytes. Must be a non-zero multiple of 8.
    pub stack_size: usize,
}

// ---------------------------------------------------------------------------
// Initial register frame
// ---------------------------------------------------------------------------

/// xPSR value with only the Thumb bit set.
pub const XPSR_THUMB: u32 = 1 << 24;

/// Register file a task starts with, laid out exactly as the context switch
/// expects to find it on the task stack: the software-saved R4–R11 at the
/// lowest address, then the frame the hardware unstacks on exception return.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitialFrame {
    pub r4_r11: [u32; 8],
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

// Every stack the kernel hands out must hold the frame
const _: () = assert!(MIN_STACK_SIZE >= InitialFrame::SIZE);
const _: () = assert!(IDLE_STACK_SIZE >= InitialFrame::SIZE);

impl InitialFrame {
    /// Size in bytes of the frame on the stack.
    pub const SIZE: usize = size_of::<InitialFrame>();

    /// Frame that starts executing `entry` and returns into `return_to`.
    pub const fn new(entry: u32, return_to: u32) -> Self {
        Self {
            r4_r11: [0; 8],
            r0: 0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: return_to,
            pc: entry,
            xpsr: XPSR_THUMB,
        }
    }
}

/// Saved stack pointer for a task whose stack ends at `stack_top`: room for
/// one [`InitialFrame`] below the 8-byte aligned top.
#[inline]
pub const fn initial_stack_pointer(stack_top: usize) -> usize {
    (stack_top & !(STACK_ALIGN - 1)) - InitialFrame::SIZE
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Per-task kernel record. Lives in the scheduler's fixed task table; its
/// stack lives in the heap and is owned (in the allocator's sense) by the
/// task itself.
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock {
    /// Task id, equal to the slot index.
    pub id: TaskId,

    /// Current lifecycle state.
    pub state: TaskState,

    /// Entry function. `None` for slots that never held a task.
    pub entry: Option<TaskEntry>,

    /// Stack size in bytes.
    pub stack_size: usize,

    /// Lowest stack address: the heap handle of the stack block.
    pub stack_bottom: usize,

    /// One past the highest stack address.
    pub stack_top: usize,

    /// Saved stack pointer. Updated on every context switch.
    pub stack_pointer: usize,

    /// Period budget in ticks (ms).
    pub deadline: u32,

    /// Budget left in the current period.
    pub time_left: u32,

    /// Ticks until a sleeping task wakes.
    pub sleep_time: u32,
}

impl TaskControlBlock {
    /// An unused slot.
    pub const EMPTY: Self = Self {
        id: 0,
        state: TaskState::Uninit,
        entry: None,
        stack_size: 0,
        stack_bottom: 0,
        stack_top: 0,
        stack_pointer: 0,
        deadline: 0,
        time_left: 0,
        sleep_time: 0,
    };

    /// Occupy this slot with a fresh, READY task whose stack block starts at
    /// `stack_bottom`.
    pub fn init(&mut self, id: TaskId, config: TaskConfig, deadline: u32, stack_bottom: usize) {
        let stack_top = stack_bottom + config.stack_size;
        *self = Self {
            id,
            state: TaskState::Ready,
            entry: Some(config.entry),
            stack_size: config.stack_size,
            stack_bottom,
            stack_top,
            stack_pointer: initial_stack_pointer(stack_top),
            deadline,
            time_left: deadline,
            sleep_time: 0,
        };
    }

    /// Slot can take a new task.
    #[inline]
    pub fn is_free_slot(&self) -> bool {
        matches!(self.state, TaskState::Uninit | TaskState::Dormant)
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.id == TID_IDLE
    }

    /// Scheduling key; smaller is more urgent.
    #[inline]
    pub fn key(&self) -> (u32, TaskId) {
        (self.time_left, self.id)
    }

    /// `self` should run before `other`. Any real task outranks idle and
    /// idle outranks nothing.
    pub fn outranks(&self, other: &TaskControlBlock) -> bool {
        match (self.is_idle(), other.is_idle()) {
            (true, _) => false,
            (false, true) => true,
            (false, false) => self.key() < other.key(),
        }
    }

    /// Start a new period: full budget again.
    #[inline]
    pub fn renew_budget(&mut self) {
        self.time_left = self.deadline;
    }

    /// Register file this task starts with.
    pub fn initial_frame(&self) -> InitialFrame {
        let entry = self.entry.map_or(0, |f| f as usize as u32);
        InitialFrame::new(entry, task_return as usize as u32)
    }
}

// ---------------------------------------------------------------------------
// Built-in entry points
// ---------------------------------------------------------------------------

/// Body of the idle task (id 0), run whenever nothing else is ready.
pub extern "C" fn idle_task() -> ! {
    loop {
        crate::arch::wait_for_interrupt();
    }
}

/// Return address planted in every initial frame. A task entry that returns
/// lands here and exits.
pub extern "C" fn task_return() -> ! {
    let _ = crate::kernel::exit();
    loop {
        crate::arch::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
