use crate::error::{ErrorKind, Result};
use slog::{o, Discard, Logger};

mod aggregator;
mod pool;
pub use pool::{Submitter, WorkerPool};

/// A unit of work: runs once on whichever worker picks it up.
pub type Job<E> = Box<dyn FnOnce() -> std::result::Result<(), E> + Send + 'static>;

// what workers tell the aggregator
pub(crate) enum Report<E> {
    // a task returned an error
    Failed(E),
    // a task panicked, the context is handed over so the worker can be revived
    Dead(pool::WorkerContext<E>),
}

/// Settings a [`WorkerPool`] is built from.
///
/// ```
/// use workerpool::thread_pool::Config;
///
/// let config = Config::new(4).thread_name("uploader");
/// assert_eq!(config.concurrency(), 4);
/// assert!(config.validate().is_ok());
/// assert!(Config::new(0).validate().is_err());
/// ```
#[derive(Clone)]
pub struct Config {
    concurrency: usize,
    thread_name: String,
    logger: Logger,
}

impl Config {
    const DEFAULT_THREAD_NAME: &'static str = "workerpool";

    /// Pool of `concurrency` workers, silent logger, default thread names.
    pub fn new(concurrency: usize) -> Self {
        Config {
            concurrency,
            thread_name: Config::DEFAULT_THREAD_NAME.to_string(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// Prefix of the worker thread names, workers are `{name}-{id}`.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ErrorKind::InvalidConcurrency(self.concurrency).into());
        }
        Ok(())
    }
}
