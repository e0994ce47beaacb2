//! # Kernel Errors
//!
//! Every registry, allocator and gateway operation reports failure
//! synchronously through [`KernelError`]. The kernel never retries and never
//! recovers on the caller's behalf.
//!
//! Ready-queue overflow is deliberately absent: it can only happen if the
//! live task count exceeds the queue capacity, which is a broken kernel
//! invariant, so it panics instead of being reported.

use thiserror::Error;

use crate::task::TaskId;

/// Convenience alias used throughout the kernel.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Failure reported by a kernel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// `kernel::init()` has not run yet.
    #[error("kernel is not initialized")]
    KernelUninitialized,

    /// The heap allocator has not been initialized yet.
    #[error("heap allocator is not initialized")]
    HeapUninitialized,

    /// One-time initialization requested a second time.
    #[error("already initialized")]
    AlreadyInitialized,

    /// The operation needs a running task but the kernel has not started.
    #[error("kernel has not been started")]
    KernelNotRunning,

    /// `kernel::start()` called while the kernel is already running.
    #[error("kernel is already running")]
    AlreadyRunning,

    /// The task id is out of range or names an unused slot.
    #[error("no task with id {0}")]
    InvalidTask(TaskId),

    /// Requested stack size is below `MIN_STACK_SIZE` or not a multiple of 8.
    #[error("stack size {0} is too small or not a multiple of 8")]
    InvalidStackSize(usize),

    /// A task needs a strictly positive deadline.
    #[error("deadline must be positive")]
    InvalidDeadline,

    /// The target is the idle task, the caller itself, or is not READY.
    #[error("operation not permitted on task {0}")]
    NotPermitted(TaskId),

    /// Zero-sized allocation or a null handle.
    #[error("invalid allocation request")]
    InvalidRequest,

    /// Every task slot is in use.
    #[error("task registry is full")]
    RegistryFull,

    /// No free block can satisfy the request.
    #[error("out of memory")]
    OutOfMemory,

    /// No occupied block starts at the address and is owned by the caller.
    #[error("block is not owned by the calling task")]
    NotOwner,
}

/// Coarse classification of a [`KernelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad id, bad size, bad deadline, or a target in the wrong state.
    RejectedPrecondition,
    /// The registry or the allocator has nothing left to give.
    ResourceExhausted,
    /// Cross-task deallocation attempt.
    NotOwner,
    /// Call before kernel or allocator initialization, or before start.
    NotInitialized,
}

impl KernelError {
    pub const fn kind(self) -> ErrorKind {
        match self {
            KernelError::KernelUninitialized
            | KernelError::KernelNotRunning
            | KernelError::HeapUninitialized => ErrorKind::NotInitialized,
            KernelError::RegistryFull | KernelError::OutOfMemory => ErrorKind::ResourceExhausted,
            KernelError::NotOwner => ErrorKind::NotOwner,
            KernelError::AlreadyInitialized
            | KernelError::AlreadyRunning
            | KernelError::InvalidTask(_)
            | KernelError::InvalidStackSize(_)
            | KernelError::InvalidDeadline
            | KernelError::NotPermitted(_)
            | KernelError::InvalidRequest => ErrorKind::RejectedPrecondition,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_errors_classify_as_resource_exhausted() {
        assert_eq!(KernelError::RegistryFull.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(KernelError::OutOfMemory.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_precondition_errors_classify_as_rejected() {
        assert_eq!(KernelError::InvalidTask(3).kind(), ErrorKind::RejectedPrecondition);
        assert_eq!(KernelError::InvalidStackSize(12).kind(), ErrorKind::RejectedPrecondition);
        assert_eq!(KernelError::NotPermitted(0).kind(), ErrorKind::RejectedPrecondition);
    }

    #[test]
    fn test_display_mentions_offending_value() {
        assert_eq!(KernelError::InvalidTask(7).to_string(), "no task with id 7");
        assert_eq!(KernelError::NotOwner.kind(), ErrorKind::NotOwner);
    }

    #[test]
    fn test_early_calls_classify_as_not_initialized() {
        assert_eq!(KernelError::KernelNotRunning.kind(), ErrorKind::NotInitialized);
        assert_eq!(KernelError::HeapUninitialized.kind(), ErrorKind::NotInitialized);
    }
}
