use clap::{crate_authors, crate_version, Parser};
use failure::format_err;
use slog::*;
use std::{process::exit, thread, time::Duration};
use workerpool::{Config, WorkerPool};

/// Runs a synthetic fan-out through the worker pool and prints every error.
#[derive(Parser)]
#[clap(version = crate_version!(), author = crate_authors!())]
struct Options {
    /// Number of worker threads
    #[clap(long, short, default_value = "4")]
    concurrency: usize,

    /// Number of tasks to submit
    #[clap(long, short, default_value = "20")]
    tasks: usize,

    /// Task i fails when i is a multiple of this, 0 never fails
    #[clap(long, short, default_value = "2")]
    fail_every: usize,

    /// How long each task sleeps before finishing
    #[clap(long, short, default_value = "100")]
    delay_ms: u64,

    /// Exit with status 1 when any task failed
    #[clap(long)]
    strict: bool,
}

fn main() {
    let options = Options::parse();
    let logger = logger();
    let code = run(&options, &logger);
    // flush the async drain before leaving
    drop(logger);
    exit(code);
}

fn logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, o!())
}

fn run(options: &Options, logger: &Logger) -> i32 {
    info!(logger, "workerpool starting";
        "version" => crate_version!(),
        "concurrency" => options.concurrency,
        "tasks" => options.tasks
    );

    let config = Config::new(options.concurrency).logger(logger.new(o!("pool" => "fanout")));
    if let Err(e) = config.validate() {
        error!(logger, "{}", e);
        return 1;
    }
    let pool = match WorkerPool::with_config(config) {
        Ok(pool) => pool,
        Err(e) => {
            error!(logger, "unable to start worker pool"; "error" => %e);
            return 1;
        }
    };

    let delay = Duration::from_millis(options.delay_ms);
    for i in 0..options.tasks {
        let fail = options.fail_every != 0 && i % options.fail_every == 0;
        pool.submit(move || {
            thread::sleep(delay);
            if fail {
                return Err(format_err!("error {}", i));
            }
            Ok(())
        });
    }

    let errors = pool.close_and_wait();
    for e in &errors {
        println!("{}", e);
    }
    info!(logger, "workerpool finished";
        "tasks" => options.tasks,
        "failed" => errors.len()
    );

    if options.strict && !errors.is_empty() {
        return 1;
    }
    0
}
