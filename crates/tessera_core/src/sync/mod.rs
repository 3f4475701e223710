//! # Concurrency
//!
//! The entity system itself is single-threaded. Work that can run in
//! parallel, such as producing messages, goes through a [`JobQueue`].

mod job_queue;

pub use job_queue::{JobError, JobHandle, JobQueue};
