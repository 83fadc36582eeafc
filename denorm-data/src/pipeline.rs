//! Bounded fan-out from the decoding thread to a pool of workers.
//!
//! The calling thread streams the source and pushes every primitive into a
//! bounded queue; it blocks whenever the workers fall behind. Workers run in
//! a thread scope and own any per-thread state built by the factory passed to
//! [`Stage::run`]. Closing the queue is the only shutdown signal: once the
//! source is exhausted the sender is dropped, the workers drain what is left
//! and exit, and only then does `run` return. Anything a worker captured
//! (an output sender, for example) is therefore released exactly once, after
//! the last primitive of the pass was handled.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use denorm_core::{Primitive, PrimitiveSource};
use log::{debug, trace};

use crate::error::DenormError;
use crate::report::PassKind;

const PROGRESS_INTERVAL: u64 = 1_000_000;

/// One pass over the source, fanned out to `workers` threads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Stage {
    pass: PassKind,
    workers: usize,
    queue_capacity: usize,
}

impl Stage {
    pub(crate) fn new(pass: PassKind, workers: usize, queue_capacity: usize) -> Self {
        Self {
            pass,
            workers: workers.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Stream `source` through the worker pool.
    ///
    /// `make_worker` runs once on each worker thread and returns the handler
    /// for that thread. The first error raised by a handler, a factory or the
    /// source stops the decoder at the next primitive and is returned once
    /// every worker has joined. Source errors take precedence.
    pub(crate) fn run<S, F, W>(&self, source: &S, make_worker: F) -> Result<u64, DenormError>
    where
        S: PrimitiveSource + ?Sized,
        F: Fn(usize) -> Result<W, DenormError> + Sync,
        W: FnMut(Primitive) -> Result<(), DenormError>,
    {
        let (sender, receiver) = bounded::<Primitive>(self.queue_capacity);
        let failed = AtomicBool::new(false);
        debug!(
            "{} stage starting with {} workers (queue capacity {})",
            self.pass, self.workers, self.queue_capacity
        );

        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|index| {
                    let receiver = receiver.clone();
                    let make_worker = &make_worker;
                    let failed = &failed;
                    scope.spawn(move || -> Result<u64, DenormError> {
                        let mut handle = make_worker(index).inspect_err(|_| {
                            failed.store(true, Ordering::Release);
                        })?;
                        let mut handled = 0_u64;
                        for primitive in &receiver {
                            if let Err(err) = handle(primitive) {
                                failed.store(true, Ordering::Release);
                                return Err(err);
                            }
                            handled += 1;
                        }
                        trace!("{} worker {index} handled {handled} primitives", self.pass);
                        Ok(handled)
                    })
                })
                .collect();
            drop(receiver);

            let mut streamed = 0_u64;
            let streaming = source.for_each_primitive(&mut |primitive| {
                if failed.load(Ordering::Acquire) || sender.send(primitive).is_err() {
                    return ControlFlow::Break(());
                }
                streamed += 1;
                if streamed % PROGRESS_INTERVAL == 0 {
                    debug!("{}: {streamed} primitives queued", self.pass);
                }
                ControlFlow::Continue(())
            });
            drop(sender);

            let mut handled = 0_u64;
            let mut worker_error = None;
            for handle in handles {
                match handle.join() {
                    Ok(Ok(count)) => handled += count,
                    Ok(Err(err)) => {
                        worker_error.get_or_insert(err);
                    }
                    Err(_) => {
                        worker_error.get_or_insert(DenormError::WorkerPanicked { pass: self.pass });
                    }
                }
            }

            match (streaming, worker_error) {
                (Err(err), _) => Err(DenormError::Source(err)),
                (Ok(()), Some(err)) => Err(err),
                (Ok(()), None) => Ok(handled),
            }
        })
    }
}
