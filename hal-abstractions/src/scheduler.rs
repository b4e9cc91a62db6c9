//! Cooperative scheduler contract
//!
//! The node runs on a single-threaded cooperative scheduler: tasks execute
//! to completion, and a task that needs to continue later asks to be
//! re-invoked after a delay. Delays are best-effort minimums, not hard
//! real-time deadlines.

/// Monotonic scheduler time in milliseconds since boot.
pub type Tick = u64;

/// Opaque handle of a registered task.
///
/// Task registration is the application's job; drivers are handed the ids
/// of their tasks at construction and use them to (re)schedule themselves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(pub usize);

/// Scheduling operations available to drivers.
///
/// Implementations use interior mutability; the single-threaded cooperative
/// model guarantees calls never race.
pub trait Scheduler {
    /// Current monotonic time.
    fn now(&self) -> Tick;

    /// Run `task` once, `delay` ticks from now. A delay of zero means "as
    /// soon as the current task yields". A task has at most one pending
    /// activation; scheduling it again moves the existing one.
    fn schedule_once(&self, task: TaskId, delay: Tick);

    /// Run `task` every `interval` ticks until cancelled. Replaces any
    /// previous schedule for the same task.
    fn schedule_periodic(&self, task: TaskId, interval: Tick);

    /// Drop any pending schedule for `task`.
    fn cancel(&self, task: TaskId);
}
