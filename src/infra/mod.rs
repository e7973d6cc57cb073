//! Lane implementations backing the task queue.

pub mod queue;

pub use queue::{FifoQueue, Lane, PriorityQueue, TimerQueue};
