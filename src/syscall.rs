//! # Syscall Gateway
//!
//! The single privileged entry point for task requests. A task builds a
//! [`Syscall`] on its own stack, traps with a pointer to it, and reads the
//! reply once it runs again:
//!
//! ```text
//! task                    SVCall (0xD0)              PendSV (0xF0)
//!  │  Syscall{request}         │                          │
//!  ├──── svc 0, r0=&call ─────►│ service()                │
//!  │                           │  ├─ with_kernel: handle  │
//!  │                           │  ├─ write initial frame  │
//!  │                           │  └─ pend switch? ───────►│ switch_context()
//!  │◄──────────── reply (possibly much later) ────────────┤
//! ```
//!
//! The gateway runs above both SysTick and PendSV, so a request is handled
//! to completion before any tick accounting or register swap can observe
//! the state. If the request displaced the caller, the caller is suspended
//! at the trap and reads its reply when it is dispatched again.

use crate::arch;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{TaskConfig, TaskId};

/// How long a sleeping task stays blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// After an explicit number of ticks.
    After(u32),
    /// At the start of the caller's next period (its remaining `time_left`).
    NextPeriod,
}

/// Request codes understood by the gateway.
#[derive(Debug, Clone, Copy)]
pub enum Request {
    /// Dispatch the first task. Only valid once.
    Start,
    /// Give up the CPU with a fresh budget.
    Yield,
    /// Terminate the caller.
    Exit,
    /// Register a new task.
    Create { config: TaskConfig, deadline: u32 },
    /// Block the caller.
    Sleep(Wake),
}

/// What a successful request hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// The kernel is running; bootstrap from `stack_pointer`.
    Started { stack_pointer: usize },
    /// Id of the task just created.
    Created(TaskId),
    /// Request carried out, nothing to report.
    Done,
}

/// One request/response exchange between a task and the kernel.
#[derive(Debug)]
pub struct Syscall {
    pub request: Request,
    pub reply: Result<Reply>,
}

impl Syscall {
    pub const fn new(request: Request) -> Self {
        Self {
            request,
            // Overwritten by the gateway before the caller looks at it
            reply: Ok(Reply::Done),
        }
    }

    /// Trap into the kernel and return its reply.
    pub fn invoke(request: Request) -> Result<Reply> {
        let mut call = Syscall::new(request);
        arch::trap(&mut call);
        call.reply
    }
}

impl Scheduler {
    /// Carry out `request` on behalf of the running task. Pure kernel state
    /// manipulation; the hardware side effects are left to [`service`].
    pub fn handle_syscall(&mut self, request: &Request) -> Result<Reply> {
        match *request {
            Request::Start => self
                .start()
                .map(|stack_pointer| Reply::Started { stack_pointer }),
            Request::Yield => self.yield_current().map(|()| Reply::Done),
            Request::Exit => self.exit_current().map(|()| Reply::Done),
            Request::Create { config, deadline } => self
                .create_task_with_deadline(config, deadline)
                .map(Reply::Created),
            Request::Sleep(Wake::After(ticks)) => self.sleep_current(ticks).map(|()| Reply::Done),
            Request::Sleep(Wake::NextPeriod) => self.period_yield_current().map(|()| Reply::Done),
        }
    }
}

/// Gateway body, entered from the SVCall handler (or directly on the host).
pub fn service(call: &mut Syscall) {
    let (reply, pend) = sync::with_kernel(|k| {
        let reply = k.handle_syscall(&call.request);
        if let Ok(Reply::Created(id)) = reply {
            if let Some((sp, frame)) = k.initial_frame(id) {
                // SAFETY: the stack block was just allocated for this task and
                // nothing else references it yet.
                unsafe { arch::write_initial_frame(sp, frame) };
            }
        }
        if let Err(err) = reply {
            log::warn!("syscall {:?} rejected: {}", call.request, err);
        }
        (reply, k.switch_pending())
    });

    call.reply = reply;
    if pend {
        arch::pend_switch();
    }
    if let Ok(Reply::Started { stack_pointer }) = reply {
        // SAFETY: `stack_pointer` is the saved frame of the task the kernel
        // just marked RUNNING, written at init or create time.
        unsafe { arch::start_first_task(stack_pointer) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEAP_SIZE;
    use crate::error::KernelError;
    use crate::task::TaskState;

    extern "C" fn dummy() -> ! {
        loop {}
    }

    fn kernel() -> Scheduler {
        let mut k = Scheduler::new();
        k.init(0x2000_0000, HEAP_SIZE).unwrap();
        k
    }

    fn create(deadline: u32) -> Request {
        Request::Create {
            config: TaskConfig {
                entry: dummy,
                stack_size: 0x200,
            },
            deadline,
        }
    }

    #[test]
    fn test_start_reports_bootstrap_stack_pointer() {
        let mut k = kernel();
        let id = match k.handle_syscall(&create(4)) {
            Ok(Reply::Created(id)) => id,
            other => panic!("unexpected reply {:?}", other),
        };
        let expected = k.tasks[id].stack_pointer;
        assert_eq!(
            k.handle_syscall(&Request::Start),
            Ok(Reply::Started {
                stack_pointer: expected
            })
        );
        assert_eq!(
            k.handle_syscall(&Request::Start),
            Err(KernelError::AlreadyRunning)
        );
    }

    #[test]
    fn test_requests_before_start_are_rejected() {
        let mut k = kernel();
        assert_eq!(
            k.handle_syscall(&Request::Yield),
            Err(KernelError::KernelNotRunning)
        );
        assert_eq!(
            k.handle_syscall(&Request::Sleep(Wake::NextPeriod)),
            Err(KernelError::KernelNotRunning)
        );
    }

    #[test]
    fn test_sleep_variants_block_the_caller() {
        let mut k = kernel();
        k.handle_syscall(&create(7)).unwrap();
        k.handle_syscall(&create(9)).unwrap();
        k.handle_syscall(&Request::Start).unwrap();

        assert_eq!(k.handle_syscall(&Request::Sleep(Wake::After(2))), Ok(Reply::Done));
        assert_eq!(k.tasks[1].state, TaskState::Sleeping);
        assert_eq!(k.tasks[1].sleep_time, 2);

        k.switch_context(0);
        assert_eq!(k.current_id(), 2);
        assert_eq!(k.handle_syscall(&Request::Sleep(Wake::NextPeriod)), Ok(Reply::Done));
        assert_eq!(k.tasks[2].sleep_time, 9);
    }

    #[test]
    fn test_exit_and_yield_request_a_switch() {
        let mut k = kernel();
        k.handle_syscall(&create(5)).unwrap();
        k.handle_syscall(&Request::Start).unwrap();

        assert_eq!(k.handle_syscall(&Request::Yield), Ok(Reply::Done));
        assert!(k.switch_pending());
        k.switch_context(0);

        assert_eq!(k.handle_syscall(&Request::Exit), Ok(Reply::Done));
        assert!(k.switch_pending());
        assert_eq!(k.tasks[1].state, TaskState::Dormant);
    }
}
