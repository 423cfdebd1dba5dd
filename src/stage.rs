use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};

use crate::buffer::BufferQueue;
use crate::envelope::Envelope;
use crate::error::{PipelineError, Result, StageError};
use crate::metrics::StageMetrics;
use crate::topology::{Filtered, Hatchable};

type OpResult<T> = std::result::Result<T, StageError>;

/// The user callable of a stage, normalized to one of five kinds.
///
/// Infallible callables are wrapped into the fallible shape at construction
/// so the worker loop has a single error path: a callable error, or a panic
/// from a callable with no `Result` to return, drops the current item and
/// keeps the stage alive.
pub(crate) enum Op<I, O> {
    Generator(Box<dyn FnMut() -> OpResult<Option<O>> + Send>),
    Transform(Box<dyn FnMut(I) -> OpResult<O> + Send>),
    Filter(Box<dyn FnMut(I) -> Filtered<O> + Send>),
    Hatch(Box<dyn FnMut(Hatchable<I>) -> Hatchable<O> + Send>),
    Sink(Box<dyn FnMut(I) -> OpResult<()> + Send>),
}

impl<I, O> Op<I, O> {
    fn kind(&self) -> &'static str {
        match self {
            Op::Generator(_) => "generator",
            Op::Transform(_) => "transform",
            Op::Filter(_) => "filter",
            Op::Hatch(_) => "hatch",
            Op::Sink(_) => "sink",
        }
    }
}

fn panic_to_error(panic: Box<dyn Any + Send>) -> StageError {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).into()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone().into()
    } else {
        "stage callable panicked".into()
    }
}

/// Invoke a callable, converting a panic into the per-item error path.
///
/// A panic must not unwind out of the worker thread: it would kill the
/// stage while its neighboring buffers stay open, stalling the rest of the
/// pipeline.
fn guard<T>(call: impl FnOnce() -> OpResult<T>) -> OpResult<T> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|panic| Err(panic_to_error(panic)))
}

/// Run one iteration of a stage worker. Returns whether to keep processing.
///
/// End-of-stream is forwarded downstream exactly once and stops the loop; a
/// closed buffer stops the loop without forwarding anything; a callable
/// error or panic drops the item and the loop continues with the next
/// input.
fn process_one<I, O>(
    op: &mut Op<I, O>,
    input: Option<&BufferQueue<Envelope<I>>>,
    output: Option<&BufferQueue<Envelope<O>>>,
    metrics: &StageMetrics,
) -> bool {
    match op {
        Op::Generator(produce) => {
            let Some(output) = output else { return false };
            match guard(|| produce()) {
                Ok(Some(value)) => {
                    if output.push(Envelope::Item(value)).is_err() {
                        return false;
                    }
                    metrics.record_processed();
                    true
                }
                Ok(None) => {
                    // Exhausted. Forward the marker; a closed buffer makes
                    // no difference to the outcome.
                    let _ = output.push(Envelope::End);
                    false
                }
                Err(error) => {
                    tracing::debug!(%error, stage = "generator", "callable failed; item dropped");
                    metrics.record_fault();
                    true
                }
            }
        }
        Op::Transform(apply) => {
            let (Some(input), Some(output)) = (input, output) else {
                return false;
            };
            let value = match input.pop() {
                Ok(Envelope::Item(value)) => value,
                Ok(Envelope::End) => {
                    let _ = output.push(Envelope::End);
                    return false;
                }
                Err(_) => return false,
            };
            match guard(|| apply(value)) {
                Ok(out) => {
                    if output.push(Envelope::Item(out)).is_err() {
                        return false;
                    }
                    metrics.record_processed();
                    true
                }
                Err(error) => {
                    tracing::debug!(%error, stage = "transform", "callable failed; item dropped");
                    metrics.record_fault();
                    true
                }
            }
        }
        Op::Filter(test) => {
            let (Some(input), Some(output)) = (input, output) else {
                return false;
            };
            let value = match input.pop() {
                Ok(Envelope::Item(value)) => value,
                Ok(Envelope::End) => {
                    let _ = output.push(Envelope::End);
                    return false;
                }
                Err(_) => return false,
            };
            match guard(|| Ok(test(value))) {
                Ok(envelope) => match envelope.into_inner() {
                    Some(out) => {
                        if output.push(Envelope::Item(out)).is_err() {
                            return false;
                        }
                        metrics.record_processed();
                        true
                    }
                    // Dropping an item still means "keep processing".
                    None => {
                        metrics.record_filtered();
                        true
                    }
                },
                Err(error) => {
                    tracing::debug!(%error, stage = "filter", "callable failed; item dropped");
                    metrics.record_fault();
                    true
                }
            }
        }
        Op::Hatch(hatch) => {
            let (Some(input), Some(output)) = (input, output) else {
                return false;
            };
            let value = match input.pop() {
                Ok(Envelope::Item(value)) => value,
                Ok(Envelope::End) => {
                    let _ = output.push(Envelope::End);
                    return false;
                }
                Err(_) => return false,
            };
            // First call sees the input; follow-up calls get the empty ping
            // until the callable reports it is done hatching.
            let mut arg = Hatchable::new(value);
            loop {
                let envelope = match guard(|| Ok(hatch(arg))) {
                    Ok(envelope) => envelope,
                    Err(error) => {
                        tracing::debug!(%error, stage = "hatch", "callable failed; item dropped");
                        metrics.record_fault();
                        return true;
                    }
                };
                match envelope.into_inner() {
                    Some(out) => {
                        if output.push(Envelope::Item(out)).is_err() {
                            return false;
                        }
                        metrics.record_processed();
                        arg = Hatchable::empty();
                    }
                    None => break,
                }
            }
            true
        }
        Op::Sink(consume) => {
            let Some(input) = input else { return false };
            let value = match input.pop() {
                Ok(Envelope::Item(value)) => value,
                Ok(Envelope::End) => return false,
                Err(_) => return false,
            };
            match guard(|| consume(value)) {
                Ok(()) => {
                    metrics.record_processed();
                    true
                }
                Err(error) => {
                    tracing::debug!(%error, stage = "sink", "callable failed; item dropped");
                    metrics.record_fault();
                    true
                }
            }
        }
    }
}

/// A single pipeline stage: one user callable driven by one worker thread.
///
/// The worker pops from the input buffer and pushes to the output buffer
/// (either may be absent for the generator/sink ends). The callable is moved
/// into the worker on `start` and recovered through the join handle, so a
/// stopped stage can be started again.
pub struct Stage<I, O> {
    op: Option<Op<I, O>>,
    input: Option<BufferQueue<Envelope<I>>>,
    output: Option<BufferQueue<Envelope<O>>>,
    worker: Option<JoinHandle<Op<I, O>>>,
    alive: Arc<AtomicBool>,
    metrics: StageMetrics,
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn from_op(op: Op<I, O>) -> Self {
        Self {
            op: Some(op),
            input: None,
            output: None,
            worker: None,
            alive: Arc::new(AtomicBool::new(false)),
            metrics: StageMetrics::new(),
        }
    }

    /// A transform stage: one output per input.
    pub fn transform<F>(mut apply: F) -> Self
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        Self::from_op(Op::Transform(Box::new(move |value| Ok(apply(value)))))
    }

    /// A transform stage whose callable may fail; failures drop the item.
    pub fn try_transform<F>(apply: F) -> Self
    where
        F: FnMut(I) -> OpResult<O> + Send + 'static,
    {
        Self::from_op(Op::Transform(Box::new(apply)))
    }

    /// A filter stage: at most one output per input.
    pub fn filter<F, R>(mut test: F) -> Self
    where
        F: FnMut(I) -> R + Send + 'static,
        R: Into<Filtered<O>>,
    {
        Self::from_op(Op::Filter(Box::new(move |value| test(value).into())))
    }

    /// A hatch stage: one or more outputs per input.
    pub fn hatch<F, R>(mut hatch: F) -> Self
    where
        F: FnMut(Hatchable<I>) -> R + Send + 'static,
        R: Into<Hatchable<O>>,
    {
        Self::from_op(Op::Hatch(Box::new(move |arg| hatch(arg).into())))
    }

    /// Install the buffers and spawn the worker.
    ///
    /// Idempotent: starting an alive stage is a no-op. The generator end is
    /// started with `input = None`, the sink end with `output = None`.
    pub fn start(
        &mut self,
        input: Option<BufferQueue<Envelope<I>>>,
        output: Option<BufferQueue<Envelope<O>>>,
    ) {
        if self.alive.load(Ordering::Relaxed) {
            return;
        }
        let Some(mut op) = self.op.take() else {
            // Only reachable after a worker panic lost the callable.
            tracing::warn!("stage has no callable; worker not started");
            return;
        };
        tracing::debug!(stage = op.kind(), "stage starting");

        self.input = input;
        self.output = output;
        let input = self.input.clone();
        let output = self.output.clone();
        let alive = Arc::clone(&self.alive);
        let metrics = self.metrics.clone();

        self.alive.store(true, Ordering::Relaxed);
        self.worker = Some(spawn(move || {
            while alive.load(Ordering::Relaxed) {
                if !process_one(&mut op, input.as_ref(), output.as_ref(), &metrics) {
                    // Exited on end-of-stream or a closed buffer. The stage
                    // still counts as alive until it is stopped or consumed.
                    break;
                }
            }
            op
        }));
    }

    /// Clear the alive flag without joining.
    ///
    /// The worker exits before its next iteration; if it is blocked inside a
    /// buffer operation it only notices once that buffer is closed, which is
    /// why pipeline shutdown closes all buffers between `halt` and `join`.
    pub(crate) fn halt(&self) {
        self.alive.store(false, Ordering::Relaxed);
    }

    /// Join the worker and recover the callable for a later restart.
    pub(crate) fn join(&mut self) -> Result<()> {
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(op) => self.op = Some(op),
                Err(_) => {
                    // Callable panics are caught inside the worker, so this
                    // is a runtime bug. The callable is gone with the
                    // unwind; the stage cannot be restarted.
                    tracing::error!("stage worker panicked; stage is disabled");
                    return Err(PipelineError::WorkerPanicked);
                }
            }
        }
        Ok(())
    }

    /// Stop the stage: clear the alive flag and join the worker.
    ///
    /// Safe to call at any time, including on a never-started or already
    /// exited stage. If the worker is blocked on a buffer, close that buffer
    /// first or the join will wait for it.
    pub fn stop(&mut self) -> Result<()> {
        self.halt();
        self.join()
    }

    /// Wait for the worker to exit naturally (end-of-stream driven).
    pub fn consume(&mut self) -> Result<()> {
        let joined = self.join();
        self.alive.store(false, Ordering::Relaxed);
        joined
    }

    /// A shared handle to this stage's counters.
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.clone()
    }
}

impl<O> Stage<(), O>
where
    O: Send + 'static,
{
    /// A generator stage. `None` signals end-of-stream.
    pub fn generator<F>(mut produce: F) -> Self
    where
        F: FnMut() -> Option<O> + Send + 'static,
    {
        Self::from_op(Op::Generator(Box::new(move || Ok(produce()))))
    }

    /// A generator whose callable may fail; failures produce nothing.
    pub fn try_generator<F>(produce: F) -> Self
    where
        F: FnMut() -> OpResult<Option<O>> + Send + 'static,
    {
        Self::from_op(Op::Generator(Box::new(produce)))
    }
}

impl<I> Stage<I, ()>
where
    I: Send + 'static,
{
    /// A sink stage: consumes items, produces nothing.
    pub fn sink<F>(mut consume: F) -> Self
    where
        F: FnMut(I) + Send + 'static,
    {
        Self::from_op(Op::Sink(Box::new(move |value| {
            consume(value);
            Ok(())
        })))
    }

    /// A sink whose callable may fail; failures drop the item.
    pub fn try_sink<F>(consume: F) -> Self
    where
        F: FnMut(I) -> OpResult<()> + Send + 'static,
    {
        Self::from_op(Op::Sink(Box::new(consume)))
    }
}

impl<I, O> Drop for Stage<I, O> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferMode;
    use std::sync::Mutex;

    #[test]
    fn generator_stage_produces_in_order_then_ends() {
        let out: BufferQueue<Envelope<u32>> = BufferQueue::unbounded();

        let mut seq = 0u32;
        let mut stage = Stage::generator(move || {
            seq += 1;
            (seq <= 100).then_some(seq)
        });
        stage.start(None, Some(out.clone()));

        for expected in 1..=100 {
            assert_eq!(out.pop().unwrap(), Envelope::Item(expected));
        }
        stage.consume().unwrap();

        // The queue ends with the end-of-stream marker.
        assert_eq!(out.pop().unwrap(), Envelope::End);
        assert_eq!(stage.metrics().processed(), 100);

        // Stopping a consumed stage is a no-op.
        stage.stop().unwrap();
    }

    #[test]
    fn sink_stage_drains_until_end() {
        let input: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        for i in 1..=100 {
            input.push(Envelope::Item(i)).unwrap();
        }
        input.push(Envelope::End).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sunk = Arc::clone(&seen);
        let mut stage = Stage::sink(move |value: i32| sunk.lock().unwrap().push(value));

        stage.start(Some(input.clone()), None);
        stage.consume().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 100);
        assert!(seen.iter().enumerate().all(|(i, v)| *v == i as i32 + 1));
        assert!(input.is_empty());
    }

    #[test]
    fn transform_stage_forwards_end_marker() {
        let input: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        let output: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        input.push(Envelope::Item(21)).unwrap();
        input.push(Envelope::End).unwrap();

        let mut stage = Stage::transform(|v: i32| v * 2);
        stage.start(Some(input), Some(output.clone()));

        assert_eq!(output.pop().unwrap(), Envelope::Item(42));
        assert_eq!(output.pop().unwrap(), Envelope::End);
        stage.consume().unwrap();
    }

    #[test]
    fn callable_errors_drop_only_the_failing_item() {
        let input: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        let output: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        for i in 1..=6 {
            input.push(Envelope::Item(i)).unwrap();
        }
        input.push(Envelope::End).unwrap();

        let mut stage = Stage::try_transform(|v: i32| {
            if v % 2 == 0 {
                Err(format!("even input {v}").into())
            } else {
                Ok(v)
            }
        });
        stage.start(Some(input), Some(output.clone()));
        stage.consume().unwrap();

        assert_eq!(output.pop().unwrap(), Envelope::Item(1));
        assert_eq!(output.pop().unwrap(), Envelope::Item(3));
        assert_eq!(output.pop().unwrap(), Envelope::Item(5));
        assert_eq!(output.pop().unwrap(), Envelope::End);
        assert_eq!(stage.metrics().faults(), 3);
        assert_eq!(stage.metrics().processed(), 3);
    }

    #[test]
    fn callable_panics_drop_only_the_failing_item() {
        let input: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        let output: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        for i in 1..=3 {
            input.push(Envelope::Item(i)).unwrap();
        }
        input.push(Envelope::End).unwrap();

        // An infallible callable has no Err to return; a panic is its only
        // failure mode and must not take the worker down.
        let mut stage = Stage::transform(|v: i32| {
            assert_ne!(v, 2, "two is not welcome here");
            v * 10
        });
        stage.start(Some(input), Some(output.clone()));
        stage.consume().unwrap();

        assert_eq!(output.pop().unwrap(), Envelope::Item(10));
        assert_eq!(output.pop().unwrap(), Envelope::Item(30));
        assert_eq!(output.pop().unwrap(), Envelope::End);
        assert_eq!(stage.metrics().faults(), 1);
        assert_eq!(stage.metrics().processed(), 2);
    }

    #[test]
    fn closing_the_input_stops_a_blocked_worker() {
        let input: BufferQueue<Envelope<i32>> = BufferQueue::unbounded();
        let mut stage = Stage::sink(|_: i32| {});
        stage.start(Some(input.clone()), None);

        // The worker is blocked on the empty input; stop would deadlock
        // without the close.
        input.set_mode(BufferMode::Closed);
        stage.stop().unwrap();
    }
}
