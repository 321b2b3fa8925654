use super::pool::Worker;
use super::Report;
use crossbeam::channel::Receiver;
use slog::{crit, debug, warn, Logger};
use std::io;
use std::thread::{self, JoinHandle};

pub(crate) struct Collected<E> {
    pub(crate) errors: Vec<E>,
    // tasks that panicked instead of returning
    pub(crate) panicked: usize,
}

/// Collects task errors and revives workers killed by a panicking task.
/// It is the only owner of the error list.
pub(crate) struct Aggregator<E> {
    reports: Receiver<Report<E>>,
    collected: Collected<E>,
    logger: Logger,
}

impl<E: Send + 'static> Aggregator<E> {
    pub(crate) fn spawn(
        thread_name: &str,
        reports: Receiver<Report<E>>,
        logger: Logger,
    ) -> io::Result<JoinHandle<Collected<E>>> {
        let aggregator = Aggregator {
            reports,
            collected: Collected {
                errors: Vec::new(),
                panicked: 0,
            },
            logger,
        };
        thread::Builder::new()
            .name(format!("{}-aggregator", thread_name))
            .spawn(move || aggregator.watch())
    }

    // runs until every report sender is dropped
    fn watch(mut self) -> Collected<E> {
        while let Ok(report) = self.reports.recv() {
            match report {
                Report::Failed(err) => self.collected.errors.push(err),
                Report::Dead(context) => {
                    self.collected.panicked += 1;
                    let id = context.id;
                    let logger = context.logger.clone();
                    warn!(logger, "reviving worker");
                    // the replacement inherits the dead worker's slot
                    if let Err(err) = Worker::spawn(context) {
                        crit!(logger, "unable to revive worker"; "worker" => id, "error" => %err);
                    }
                }
            }
        }
        debug!(self.logger, "aggregator finished"; "errors" => self.collected.errors.len());
        self.collected
    }
}
