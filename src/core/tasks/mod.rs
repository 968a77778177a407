// src/core/tasks/mod.rs

//! Background task management: the deduplicating transcode work queue.

mod queue;

pub use queue::{start, stop, BackgroundQueue};
