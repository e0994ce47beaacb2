//! # Scheduler
//!
//! Kernel state proper: the task table, the EDF ready queue, the heap, and
//! the bookkeeping that moves tasks between them.
//!
//! ## Scheduling Algorithm
//!
//! Earliest deadline first over each task's remaining period budget:
//!
//! 1. Every tick, READY and RUNNING tasks lose one tick of `time_left`
//!    (floored at zero). A RUNNING task that reaches zero gets a fresh
//!    budget and is forced to yield.
//! 2. Sleeping tasks count down `sleep_time`; on expiry they become READY
//!    with a fresh budget.
//! 3. Any of the above requests a reschedule; the running task (unless it
//!    is idle) goes back to the ready queue.
//! 4. The context switch pops the most urgent task, or idle.
//!
//! ## Execution Token
//!
//! `current` is the single execution token: `None` until the kernel starts,
//! afterwards exactly the one task in the RUNNING state (or the task that
//! just left RUNNING while a switch is pending).
//!
//! Nothing in here touches hardware. Methods that want a context switch set
//! `needs_reschedule`; the callers in `kernel`/`syscall` turn that into a
//! pending PendSV.

use crate::config::{
    DEFAULT_DEADLINE, IDLE_STACK_SIZE, MAX_TASKS, MIN_STACK_SIZE, STACK_ALIGN, TID_IDLE,
};
use crate::error::{KernelError, Result};
use crate::heap::Heap;
use crate::ready_queue::ReadyQueue;
use crate::task::{idle_task, InitialFrame, TaskConfig, TaskControlBlock, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central kernel state. One instance lives in `sync`, created at boot
/// and never torn down.
pub struct Scheduler {
    /// Fixed task table. Index 0 is the idle task.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// READY tasks other than idle.
    ready: ReadyQueue,

    /// Arena backing task stacks and task allocations.
    heap: Heap,

    /// Task holding the CPU. `None` before the kernel starts.
    current: Option<TaskId>,

    /// Live tasks, idle included.
    active_tasks: usize,

    /// Bytes of stack handed out to live tasks.
    stack_used: usize,

    initialized: bool,

    /// A context switch has been requested and not yet performed.
    needs_reschedule: bool,

    /// Ticks seen since start.
    pub tick_count: u64,

    /// Context switches performed since start.
    pub context_switches: u32,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            ready: ReadyQueue::new(),
            heap: Heap::new(),
            current: None,
            active_tasks: 0,
            stack_used: 0,
            initialized: false,
            needs_reschedule: false,
            tick_count: 0,
            context_switches: 0,
        }
    }

    /// One-time setup: take the arena, reset the task table and register the
    /// idle task with a stack of its own.
    pub fn init(&mut self, heap_base: usize, heap_size: usize) -> Result<()> {
        if self.initialized {
            return Err(KernelError::AlreadyInitialized);
        }
        self.initialized = true;
        if let Err(err) = self.mem_init(heap_base, heap_size) {
            self.initialized = false;
            return Err(err);
        }

        for (id, tcb) in self.tasks.iter_mut().enumerate() {
            *tcb = TaskControlBlock::EMPTY;
            tcb.id = id;
        }
        self.ready.clear();
        self.current = None;

        let idle_stack = match self.heap.allocate(IDLE_STACK_SIZE, TID_IDLE) {
            Ok(stack) => stack,
            Err(err) => {
                log::error!("kernel: no stack for the idle task: {}", err);
                self.heap.reset();
                self.initialized = false;
                return Err(err);
            }
        };
        let idle = TaskConfig {
            entry: idle_task,
            stack_size: IDLE_STACK_SIZE,
        };
        self.tasks[TID_IDLE].init(TID_IDLE, idle, u32::MAX, idle_stack);
        self.active_tasks = 1;
        self.stack_used = IDLE_STACK_SIZE;

        log::info!("kernel: initialized, {} task slots", MAX_TASKS);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Kernel has been started.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// Id of the running task; idle before the kernel starts.
    #[inline]
    pub fn current_id(&self) -> TaskId {
        self.current.unwrap_or(TID_IDLE)
    }

    #[inline]
    pub fn active_tasks(&self) -> usize {
        self.active_tasks
    }

    #[inline]
    pub fn stack_used(&self) -> usize {
        self.stack_used
    }

    #[inline]
    pub fn switch_pending(&self) -> bool {
        self.needs_reschedule
    }

    pub fn ready_queue(&self) -> &ReadyQueue {
        &self.ready
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Where to write the initial register frame of task `id`, and what.
    pub fn initial_frame(&self, id: TaskId) -> Option<(usize, InitialFrame)> {
        let tcb = self.tasks.get(id)?;
        if tcb.is_free_slot() {
            return None;
        }
        Some((tcb.stack_pointer, tcb.initial_frame()))
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Register a task with the default deadline.
    pub fn create_task(&mut self, config: TaskConfig) -> Result<TaskId> {
        self.create_task_with_deadline(config, DEFAULT_DEADLINE)
    }

    /// Register a task with period budget `deadline`.
    ///
    /// The new task owns its stack block. If it is more urgent than the
    /// creating task, the creator is put back on the ready queue and a
    /// reschedule is requested. A failure leaves the table, the queue and
    /// the heap exactly as they were.
    pub fn create_task_with_deadline(
        &mut self,
        config: TaskConfig,
        deadline: u32,
    ) -> Result<TaskId> {
        if !self.initialized {
            return Err(KernelError::KernelUninitialized);
        }
        if self.active_tasks >= MAX_TASKS {
            log::warn!("create: task registry is full");
            return Err(KernelError::RegistryFull);
        }
        if config.stack_size < MIN_STACK_SIZE || config.stack_size % STACK_ALIGN != 0 {
            return Err(KernelError::InvalidStackSize(config.stack_size));
        }
        if deadline == 0 {
            return Err(KernelError::InvalidDeadline);
        }

        let id = self
            .tasks
            .iter()
            .skip(1)
            .position(TaskControlBlock::is_free_slot)
            .map(|pos| pos + 1)
            .ok_or(KernelError::RegistryFull)?;

        let stack_bottom = self.heap.allocate(config.stack_size, id).inspect_err(|err| {
            log::warn!("create: no stack of {} bytes: {}", config.stack_size, err);
        })?;

        self.tasks[id].init(id, config, deadline, stack_bottom);
        self.active_tasks += 1;
        self.stack_used += config.stack_size;
        self.ready.insert(id, &self.tasks);

        log::debug!(
            "create: task {} deadline {} stack {:#010x}+{}",
            id,
            deadline,
            stack_bottom,
            config.stack_size
        );

        if let Some(current) = self.current {
            if self.tasks[id].outranks(&self.tasks[current]) {
                self.preempt_current();
            }
        }

        Ok(id)
    }

    /// Snapshot of task `id`'s descriptor.
    pub fn task_info(&self, id: TaskId) -> Result<TaskControlBlock> {
        match self.tasks.get(id) {
            Some(tcb) if !tcb.is_free_slot() => Ok(*tcb),
            _ => Err(KernelError::InvalidTask(id)),
        }
    }

    /// Terminate the running task: its slot turns DORMANT and its stack goes
    /// back to the heap.
    pub fn exit_current(&mut self) -> Result<()> {
        let current = self.current.ok_or(KernelError::KernelNotRunning)?;
        if current == TID_IDLE {
            return Err(KernelError::NotPermitted(TID_IDLE));
        }

        let tcb = self.tasks[current];
        self.heap.deallocate(tcb.stack_bottom, current)?;
        self.ready.remove(current, &self.tasks);
        self.tasks[current].state = TaskState::Dormant;
        self.active_tasks -= 1;
        self.stack_used -= tcb.stack_size;
        self.needs_reschedule = true;

        log::debug!("exit: task {}", current);
        Ok(())
    }

    /// Give up the CPU. The running task starts a new period and competes
    /// again straight away.
    pub fn yield_current(&mut self) -> Result<()> {
        let current = self.current.ok_or(KernelError::KernelNotRunning)?;
        self.tasks[current].renew_budget();
        // Already queued if a preemption is pending
        if !self.ready.reheapify(current, &self.tasks) {
            self.requeue(current);
        }
        self.needs_reschedule = true;
        Ok(())
    }

    /// Put the running task to sleep for `ticks`. A zero-length sleep is a
    /// plain yield.
    pub fn sleep_current(&mut self, ticks: u32) -> Result<()> {
        let current = self.current.ok_or(KernelError::KernelNotRunning)?;
        if current == TID_IDLE {
            return Err(KernelError::NotPermitted(TID_IDLE));
        }
        if ticks == 0 {
            return self.yield_current();
        }
        self.ready.remove(current, &self.tasks);
        let tcb = &mut self.tasks[current];
        tcb.state = TaskState::Sleeping;
        tcb.sleep_time = ticks;
        self.needs_reschedule = true;
        Ok(())
    }

    /// Sleep until the running task's current period is over.
    pub fn period_yield_current(&mut self) -> Result<()> {
        let current = self.current.ok_or(KernelError::KernelNotRunning)?;
        self.sleep_current(self.tasks[current].time_left)
    }

    /// Give READY task `id` a new period budget. Returns whether the change
    /// preempts the running task.
    pub fn set_deadline(&mut self, id: TaskId, deadline: u32) -> Result<bool> {
        if id >= MAX_TASKS {
            return Err(KernelError::InvalidTask(id));
        }
        if id == TID_IDLE || self.current == Some(id) {
            return Err(KernelError::NotPermitted(id));
        }
        if self.tasks[id].is_free_slot() {
            return Err(KernelError::InvalidTask(id));
        }
        if self.tasks[id].state != TaskState::Ready {
            return Err(KernelError::NotPermitted(id));
        }

        self.tasks[id].deadline = deadline;
        self.tasks[id].time_left = deadline;
        self.ready.reheapify(id, &self.tasks);
        log::debug!("deadline: task {} -> {}", id, deadline);

        let preempt = match self.current {
            Some(current) => self.tasks[id].outranks(&self.tasks[current]),
            None => false,
        };
        if preempt {
            self.preempt_current();
        }
        Ok(preempt)
    }

    // -----------------------------------------------------------------------
    // Memory on behalf of the running task
    // -----------------------------------------------------------------------

    /// Initialize the heap. Fails if the kernel is not initialized or the
    /// heap already is (which `init` takes care of).
    pub fn mem_init(&mut self, base: usize, size: usize) -> Result<()> {
        if !self.initialized {
            return Err(KernelError::KernelUninitialized);
        }
        self.heap.init(base, size)
    }

    pub fn mem_alloc(&mut self, size: usize) -> Result<usize> {
        self.heap.allocate(size, self.current_id())
    }

    pub fn mem_dealloc(&mut self, addr: usize) -> Result<()> {
        self.heap.deallocate(addr, self.current_id())
    }

    pub fn mem_count_extfrag(&self, size: usize) -> usize {
        self.heap.count_below(size)
    }

    // -----------------------------------------------------------------------
    // Tick and dispatch
    // -----------------------------------------------------------------------

    /// Called from the SysTick handler once per tick.
    pub fn tick(&mut self) {
        let Some(current) = self.current else {
            return;
        };
        self.tick_count += 1;

        let mut reschedule = false;
        for id in 1..MAX_TASKS {
            let state = self.tasks[id].state;
            match state {
                TaskState::Ready | TaskState::Running => {
                    let tcb = &mut self.tasks[id];
                    tcb.time_left = tcb.time_left.saturating_sub(1);
                    if state == TaskState::Running && tcb.time_left == 0 {
                        // Budget overrun while running: new period, forced yield
                        tcb.renew_budget();
                        reschedule = true;
                    }
                }
                TaskState::Sleeping => {
                    let tcb = &mut self.tasks[id];
                    tcb.sleep_time = tcb.sleep_time.saturating_sub(1);
                    if tcb.sleep_time == 0 {
                        tcb.state = TaskState::Ready;
                        tcb.renew_budget();
                        self.ready.insert(id, &self.tasks);
                        reschedule = true;
                    }
                }
                TaskState::Uninit | TaskState::Dormant => {}
            }
        }
        // Flooring at zero can tie keys that used to differ
        self.ready.rebuild(&self.tasks);

        if reschedule {
            self.requeue(current);
            self.needs_reschedule = true;
        }
    }

    /// Start the kernel: hand the CPU to the most urgent task (or idle).
    /// Returns the stack pointer to bootstrap from.
    pub fn start(&mut self) -> Result<usize> {
        if !self.initialized {
            return Err(KernelError::KernelUninitialized);
        }
        if self.current.is_some() {
            return Err(KernelError::AlreadyRunning);
        }

        let first = self.ready.extract_min(&self.tasks);
        self.tasks[first].state = TaskState::Running;
        self.current = Some(first);
        self.needs_reschedule = false;

        log::info!("kernel: started with task {}", first);
        Ok(self.tasks[first].stack_pointer)
    }

    /// Context switch bookkeeping: record where the outgoing task's context
    /// was saved, pick the next task and return its saved stack pointer.
    pub fn switch_context(&mut self, saved_sp: usize) -> usize {
        if let Some(previous) = self.current {
            self.tasks[previous].stack_pointer = saved_sp;
            // Keep a single RUNNING task even on a switch nobody asked for
            self.requeue(previous);
        }

        let next = self.ready.extract_min(&self.tasks);
        self.tasks[next].state = TaskState::Running;
        if self.current != Some(next) {
            self.context_switches = self.context_switches.wrapping_add(1);
        }
        self.current = Some(next);
        self.needs_reschedule = false;

        log::trace!("switch: -> task {} sp {:#010x}", next, self.tasks[next].stack_pointer);
        self.tasks[next].stack_pointer
    }

    /// Move `id` from RUNNING back to READY. Idle is never queued.
    fn requeue(&mut self, id: TaskId) {
        if self.tasks[id].state != TaskState::Running {
            return;
        }
        self.tasks[id].state = TaskState::Ready;
        if id != TID_IDLE {
            self.ready.insert(id, &self.tasks);
        }
    }

    /// The running task loses the CPU to a more urgent one.
    fn preempt_current(&mut self) {
        if let Some(current) = self.current {
            self.requeue(current);
        }
        self.needs_reschedule = true;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
