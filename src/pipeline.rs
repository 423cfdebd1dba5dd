use parking_lot::Mutex;

use crate::buffer::{BufferControl, BufferMode, BufferQueue};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::metrics::{MetricsSnapshot, StageMetrics};
use crate::stage::Stage;
use crate::topology::{Filtered, Hatchable};

type OpResult<T> = std::result::Result<T, crate::error::StageError>;

/// Result of a pipeline lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The requested transition happened.
    Ok,
    /// The pipeline was already in the requested state.
    NoOp,
    /// A stage worker panicked while being joined.
    Error,
}

/// Externally observable pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Paused,
}

/// Lifecycle control over a stage whose item types have been erased.
///
/// `start` hands the stage the buffer handles captured at composition time,
/// which is what lets the untyped pipeline drive a heterogeneously typed
/// stage list.
trait StageControl: Send {
    fn start(&mut self);
    fn halt(&self);
    fn join(&mut self) -> Result<()>;
    fn drain(&mut self) -> Result<()>;
}

struct WiredStage<I, O> {
    stage: Stage<I, O>,
    input: Option<BufferQueue<Envelope<I>>>,
    output: Option<BufferQueue<Envelope<O>>>,
}

impl<I, O> StageControl for WiredStage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn start(&mut self) {
        self.stage.start(self.input.clone(), self.output.clone());
    }

    fn halt(&self) {
        self.stage.halt();
    }

    fn join(&mut self) -> Result<()> {
        self.stage.join()
    }

    fn drain(&mut self) -> Result<()> {
        self.stage.consume()
    }
}

/// Entry point for composing a pipeline.
///
/// A pipeline is an ordered chain: one generator, any number of transforms,
/// one sink. Appending the generator yields a typed [`StageChain`] which
/// enforces that each stage's input type equals the previous stage's output
/// type; appending the sink closes the chain into a [`Pipeline`].
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    capacity: Option<usize>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every inter-stage buffer to `capacity` elements.
    ///
    /// A full buffer blocks its producer, which is the only backpressure the
    /// pipeline applies. Buffers are unbounded by default.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Open the chain with a generator. `None` signals end-of-stream.
    pub fn generator<O, F>(self, produce: F) -> StageChain<O>
    where
        O: Send + 'static,
        F: FnMut() -> Option<O> + Send + 'static,
    {
        StageChain::first(self.capacity, Stage::generator(produce))
    }

    /// Open the chain with a fallible generator; failures produce nothing.
    pub fn try_generator<O, F>(self, produce: F) -> StageChain<O>
    where
        O: Send + 'static,
        F: FnMut() -> OpResult<Option<O>> + Send + 'static,
    {
        StageChain::first(self.capacity, Stage::try_generator(produce))
    }
}

/// A partially composed pipeline whose last stage outputs `T`.
pub struct StageChain<T> {
    capacity: Option<usize>,
    stages: Vec<Box<dyn StageControl>>,
    buffers: Vec<Box<dyn BufferControl>>,
    metrics: Vec<StageMetrics>,
    tail: BufferQueue<Envelope<T>>,
}

impl<T> StageChain<T>
where
    T: Send + 'static,
{
    fn first(capacity: Option<usize>, stage: Stage<(), T>) -> Self {
        let tail: BufferQueue<Envelope<T>> = BufferQueue::with_capacity(capacity);
        Self {
            capacity,
            metrics: vec![stage.metrics()],
            buffers: vec![Box::new(tail.clone())],
            stages: vec![Box::new(WiredStage {
                stage,
                input: None,
                output: Some(tail.clone()),
            })],
            tail,
        }
    }

    fn append<O>(mut self, stage: Stage<T, O>) -> StageChain<O>
    where
        O: Send + 'static,
    {
        let next: BufferQueue<Envelope<O>> = BufferQueue::with_capacity(self.capacity);
        self.metrics.push(stage.metrics());
        self.buffers.push(Box::new(next.clone()));
        self.stages.push(Box::new(WiredStage {
            stage,
            input: Some(self.tail),
            output: Some(next.clone()),
        }));
        StageChain {
            capacity: self.capacity,
            stages: self.stages,
            buffers: self.buffers,
            metrics: self.metrics,
            tail: next,
        }
    }

    /// Append a transform stage: one output per input.
    pub fn transform<O, F>(self, apply: F) -> StageChain<O>
    where
        O: Send + 'static,
        F: FnMut(T) -> O + Send + 'static,
    {
        self.append(Stage::transform(apply))
    }

    /// Append a fallible transform; failures drop the item.
    pub fn try_transform<O, F>(self, apply: F) -> StageChain<O>
    where
        O: Send + 'static,
        F: FnMut(T) -> OpResult<O> + Send + 'static,
    {
        self.append(Stage::try_transform(apply))
    }

    /// Append a filter stage: at most one output per input.
    ///
    /// The callable may return either [`Filtered<O>`] or a plain
    /// `Option<O>`.
    pub fn filter<O, R, F>(self, test: F) -> StageChain<O>
    where
        O: Send + 'static,
        R: Into<Filtered<O>>,
        F: FnMut(T) -> R + Send + 'static,
    {
        self.append(Stage::filter(test))
    }

    /// Append a hatch stage: one or more outputs per input.
    ///
    /// The callable first receives the input wrapped in a [`Hatchable`];
    /// while it returns a value-carrying envelope it is re-invoked with
    /// [`Hatchable::empty`] to hatch follow-up outputs. It may return either
    /// `Hatchable<O>` or a plain `Option<O>`.
    pub fn hatch<O, R, F>(self, hatch: F) -> StageChain<O>
    where
        O: Send + 'static,
        R: Into<Hatchable<O>>,
        F: FnMut(Hatchable<T>) -> R + Send + 'static,
    {
        self.append(Stage::hatch(hatch))
    }

    /// Close the chain with a sink, producing a runnable [`Pipeline`].
    pub fn sink<F>(mut self, consume: F) -> Pipeline
    where
        F: FnMut(T) + Send + 'static,
    {
        let stage = Stage::sink(consume);
        self.metrics.push(stage.metrics());
        self.stages.push(Box::new(WiredStage {
            stage,
            input: Some(self.tail),
            output: None,
        }));
        Pipeline::assemble(self.stages, self.buffers, self.metrics)
    }

    /// Close the chain with a fallible sink; failures drop the item.
    pub fn try_sink<F>(mut self, consume: F) -> Pipeline
    where
        F: FnMut(T) -> OpResult<()> + Send + 'static,
    {
        let stage = Stage::try_sink(consume);
        self.metrics.push(stage.metrics());
        self.stages.push(Box::new(WiredStage {
            stage,
            input: Some(self.tail),
            output: None,
        }));
        Pipeline::assemble(self.stages, self.buffers, self.metrics)
    }
}

struct Inner {
    stages: Vec<Box<dyn StageControl>>,
    buffers: Vec<Box<dyn BufferControl>>,
    metrics: Vec<StageMetrics>,
    state: PipelineState,
}

/// A composed pipeline: one worker thread per stage, connected by shared
/// FIFO buffers.
///
/// All lifecycle methods serialize on an internal command lock and may be
/// called from any thread. They must **not** be called from inside one of
/// the pipeline's own stage callables: the calling worker would wait on
/// itself being joined.
///
/// Dropping the pipeline stops it, so no worker outlives the value.
pub struct Pipeline {
    inner: Mutex<Inner>,
}

impl Pipeline {
    fn assemble(
        stages: Vec<Box<dyn StageControl>>,
        buffers: Vec<Box<dyn BufferControl>>,
        metrics: Vec<StageMetrics>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                stages,
                buffers,
                metrics,
                state: PipelineState::Idle,
            }),
        }
    }

    fn run_locked(inner: &mut Inner) -> Outcome {
        match inner.state {
            PipelineState::Idle => {
                for stage in &mut inner.stages {
                    stage.start();
                }
                inner.state = PipelineState::Running;
                tracing::debug!("pipeline running");
                Outcome::Ok
            }
            PipelineState::Paused => {
                for buffer in &inner.buffers {
                    buffer.set_mode(BufferMode::WaitOnEmpty);
                }
                inner.state = PipelineState::Running;
                tracing::debug!("pipeline resumed");
                Outcome::Ok
            }
            PipelineState::Running => Outcome::NoOp,
        }
    }

    /// Start the pipeline, or resume it from a pause.
    ///
    /// Data frozen in the buffers by [`pause`](Pipeline::pause) is preserved
    /// and flows again after the resume.
    pub fn run(&self) -> Outcome {
        Self::run_locked(&mut self.inner.lock())
    }

    /// Freeze every buffer, suspending the flow without losing data.
    ///
    /// A stage that is mid-callable completes that one call and may push its
    /// result before blocking, so at most one further item per stage flows
    /// after `pause` returns.
    pub fn pause(&self) -> Outcome {
        let mut inner = self.inner.lock();
        if inner.state != PipelineState::Running {
            return Outcome::NoOp;
        }
        for buffer in &inner.buffers {
            buffer.set_mode(BufferMode::Frozen);
        }
        inner.state = PipelineState::Paused;
        tracing::debug!("pipeline paused");
        Outcome::Ok
    }

    /// Stop the pipeline, discarding items in flight.
    ///
    /// Shutdown is two-phase: every stage's alive flag is cleared first so
    /// workers exit between items, then every buffer is closed so workers
    /// blocked inside a buffer operation fail out with `BufferClosed`. Only
    /// then are the workers joined. Afterwards the buffers are cleared and
    /// reset, leaving the pipeline ready to run again.
    pub fn stop(&self) -> Outcome {
        let mut inner = self.inner.lock();
        if inner.state == PipelineState::Idle {
            return Outcome::NoOp;
        }

        for stage in &inner.stages {
            stage.halt();
        }
        for buffer in &inner.buffers {
            buffer.set_mode(BufferMode::Closed);
        }

        let mut outcome = Outcome::Ok;
        for stage in &mut inner.stages {
            if stage.join().is_err() {
                outcome = Outcome::Error;
            }
        }

        for buffer in &inner.buffers {
            buffer.clear();
            buffer.set_mode(BufferMode::WaitOnEmpty);
        }
        inner.state = PipelineState::Idle;
        tracing::debug!("pipeline stopped");
        outcome
    }

    /// Run the pipeline to natural exhaustion and wait for it to drain.
    ///
    /// Starts (or resumes) the pipeline if needed, then joins every stage in
    /// order: the generator's end-of-stream marker flows down the chain and
    /// releases each worker in turn. Does not return while the generator is
    /// still producing.
    pub fn consume(&self) -> Outcome {
        let mut inner = self.inner.lock();
        if inner.state != PipelineState::Running {
            Self::run_locked(&mut inner);
        }

        let mut outcome = Outcome::Ok;
        for stage in &mut inner.stages {
            if stage.drain().is_err() {
                outcome = Outcome::Error;
            }
        }
        inner.state = PipelineState::Idle;
        tracing::debug!("pipeline drained");
        outcome
    }

    /// The current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.inner.lock().state
    }

    /// Number of stages in the chain.
    pub fn stage_count(&self) -> usize {
        self.inner.lock().stages.len()
    }

    /// A snapshot of the counters of stage `index` (composition order).
    pub fn stage_metrics(&self, index: usize) -> Option<MetricsSnapshot> {
        self.inner.lock().metrics.get(index).map(StageMetrics::snapshot)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
