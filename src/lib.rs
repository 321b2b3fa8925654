//! A bounded thread pool for fallible tasks.
//!
//! Tasks are closures returning `Result<(), E>`. They run on a fixed number
//! of worker threads, and their errors are collected until the caller drains
//! the pool with [`WorkerPool::close_and_wait`].

pub mod error;
pub mod thread_pool;

pub use error::{Error, ErrorKind, Result};
pub use thread_pool::{Config, Submitter, WorkerPool};
