use super::aggregator::{Aggregator, Collected};
use super::{Config, Job, Report};
use crate::error::Result;
use crossbeam::channel::{unbounded, Receiver, Sender};
use crossbeam::sync::{ShardedLock, WaitGroup};
use slog::{debug, error, info, o, Logger};
use std::io;
use std::panic;
use std::sync::{Arc, PoisonError};
use std::thread::{self, JoinHandle};

/// Runs fallible tasks on a fixed number of threads and collects every error.
///
/// All workers are spawned by [`WorkerPool::new`], together with one
/// aggregator thread that receives the errors. Tasks are queued without
/// bound, a failing task never stops its siblings, and
/// [`WorkerPool::close_and_wait`] is the single point where the caller
/// blocks: it returns once every submitted task has run.
///
/// The order of the returned errors is the order in which tasks failed,
/// which is not the submission order.
///
/// # Example
///
/// ```
/// use failure::format_err;
/// use workerpool::thread_pool::WorkerPool;
///
/// let pool = WorkerPool::new(2).unwrap();
/// for i in 0..4 {
///     pool.submit(move || {
///         if i == 2 {
///             return Err(format_err!("replica {} unreachable", i));
///         }
///         Ok(())
///     });
/// }
///
/// let errors = pool.close_and_wait();
/// assert_eq!(errors.len(), 1);
/// assert_eq!(errors[0].to_string(), "replica 2 unreachable");
/// ```
///
/// # Misuse
///
/// Building a pool with a concurrency of 0 panics, and so does submitting
/// through a [`Submitter`] once the pool is closed. A task that never returns
/// keeps its worker busy forever and `close_and_wait` never returns either.
pub struct WorkerPool<E = failure::Error> {
    intake: ClosingIntake<E>,
    reports: Sender<Report<E>>,
    // one slot per live worker
    workers: WaitGroup,
    aggregator: JoinHandle<Collected<E>>,
    concurrency: usize,
    logger: Logger,
}

impl<E: Send + 'static> WorkerPool<E> {
    /// Spawns `concurrency` workers with the default [`Config`].
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is 0.
    pub fn new(concurrency: usize) -> Result<Self> {
        WorkerPool::with_config(Config::new(concurrency))
    }

    /// # Panics
    ///
    /// Panics if the configured concurrency is 0.
    pub fn with_config(config: Config) -> Result<Self> {
        if let Err(err) = config.validate() {
            panic!("{}", err);
        }
        let Config {
            concurrency,
            thread_name,
            logger,
        } = config;

        let (job_sender, job_receiver) = unbounded::<Job<E>>();
        let (report_sender, report_receiver) = unbounded::<Report<E>>();
        let workers = WaitGroup::new();

        let aggregator = Aggregator::spawn(&thread_name, report_receiver, logger.clone())?;

        for id in 0..concurrency {
            let context = WorkerContext {
                id,
                jobs: job_receiver.clone(),
                reports: report_sender.clone(),
                _slot: workers.clone(),
                thread_name: thread_name.clone(),
                logger: logger.new(o!("worker" => id)),
            };
            // on failure the workers already running see a closed queue and exit
            Worker::spawn(context)?;
        }
        info!(logger, "worker pool started"; "concurrency" => concurrency);

        Ok(WorkerPool {
            intake: ClosingIntake::new(job_sender),
            reports: report_sender,
            workers,
            aggregator,
            concurrency,
            logger,
        })
    }

    /// Queues `task` for the first free worker. Its error, if any, shows up
    /// in the result of [`WorkerPool::close_and_wait`].
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
    {
        self.intake.submit(Box::new(task));
    }

    /// A handle that submits to this pool from elsewhere, for example
    /// another thread.
    pub fn submitter(&self) -> Submitter<E> {
        Submitter {
            intake: Arc::clone(&self.intake.inner),
        }
    }

    /// Stops intake, waits for every queued and running task, and returns the
    /// errors they produced.
    ///
    /// # Panics
    ///
    /// Panics after all tasks have finished if any of them panicked.
    pub fn close_and_wait(self) -> Vec<E> {
        let WorkerPool {
            intake,
            reports,
            workers,
            aggregator,
            logger,
            ..
        } = self;
        debug!(logger, "closing worker pool"; "queued" => intake.queued());

        // workers exit once the queue is drained
        drop(intake);
        workers.wait();

        // the aggregator stops when the last sender is gone
        drop(reports);
        let collected = match aggregator.join() {
            Ok(collected) => collected,
            Err(payload) => panic::resume_unwind(payload),
        };
        info!(logger, "worker pool closed";
            "errors" => collected.errors.len(),
            "panicked" => collected.panicked
        );

        if collected.panicked > 0 {
            panic!(
                "{} task(s) panicked in worker pool",
                collected.panicked
            );
        }
        collected.errors
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.intake.queued()
    }
}

/// Submits tasks to a [`WorkerPool`] it was taken from.
///
/// Submitting after the pool was closed panics.
pub struct Submitter<E = failure::Error> {
    intake: Arc<Intake<E>>,
}

impl<E> Submitter<E> {
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
    {
        self.intake.submit(Box::new(task));
    }
}

impl<E> Clone for Submitter<E> {
    fn clone(&self) -> Self {
        Submitter {
            intake: Arc::clone(&self.intake),
        }
    }
}

// sending side of the job queue, `None` once closed
struct Intake<E> {
    sender: ShardedLock<Option<Sender<Job<E>>>>,
}

impl<E> Intake<E> {
    fn submit(&self, job: Job<E>) {
        let outcome = match self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(sender) => sender
                .send(job)
                .map_err(|_| "worker pool has no live workers"),
            None => Err("task submitted to a closed worker pool"),
        };
        // guard is released here, panic without holding it
        if let Err(reason) = outcome {
            panic!("{}", reason);
        }
    }

    fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn queued(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Sender::len)
    }
}

// the pool's own share of the intake, closes it when dropped
struct ClosingIntake<E> {
    inner: Arc<Intake<E>>,
}

impl<E> ClosingIntake<E> {
    fn new(sender: Sender<Job<E>>) -> Self {
        ClosingIntake {
            inner: Arc::new(Intake {
                sender: ShardedLock::new(Some(sender)),
            }),
        }
    }

    fn submit(&self, job: Job<E>) {
        self.inner.submit(job)
    }

    fn queued(&self) -> usize {
        self.inner.queued()
    }
}

impl<E> Drop for ClosingIntake<E> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Everything a worker thread owns. Moves to the aggregator when the worker
/// dies so a replacement can take over the same slot.
pub(crate) struct WorkerContext<E> {
    pub(crate) id: usize,
    jobs: Receiver<Job<E>>,
    reports: Sender<Report<E>>,
    // released when the context is dropped
    _slot: WaitGroup,
    thread_name: String,
    pub(crate) logger: Logger,
}

pub(crate) struct Worker<E> {
    context: Option<WorkerContext<E>>,
}

impl<E: Send + 'static> Worker<E> {
    pub(crate) fn spawn(context: WorkerContext<E>) -> io::Result<()> {
        let name = format!("{}-{}", context.thread_name, context.id);
        thread::Builder::new().name(name).spawn(move || {
            let worker = Worker {
                context: Some(context),
            };
            worker.run();
        })?;
        Ok(())
    }

    fn run(&self) {
        let context = match self.context.as_ref() {
            Some(context) => context,
            None => return,
        };
        debug!(context.logger, "worker started");

        // ends once the intake is closed and the queue is empty
        while let Ok(job) = context.jobs.recv() {
            if let Err(err) = job() {
                if context.reports.send(Report::Failed(err)).is_err() {
                    error!(context.logger, "aggregator is gone, task error dropped");
                }
            }
        }
    }
}

impl<E> Drop for Worker<E> {
    fn drop(&mut self) {
        let context = match self.context.take() {
            Some(context) => context,
            None => return,
        };
        if !thread::panicking() {
            debug!(context.logger, "worker exited");
            return;
        }

        error!(context.logger, "task panicked, handing worker over for revival");
        let reports = context.reports.clone();
        // if nobody listens anymore the slot is released with the context
        let _ = reports.send(Report::Dead(context));
    }
}
