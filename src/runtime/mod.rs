//! Execution plumbing shared by the buffer, the flush scheduler and the
//! engagement managers.
//!
//! - `timer`: the single scheduling facility (`schedule_once`,
//!   `schedule_repeating`) with cancellable handles
//! - `worker`: the blocking worker that runs durable-storage I/O off the
//!   caller's thread

pub mod timer;
pub mod worker;

pub use timer::{TaskHandle, Timer};
