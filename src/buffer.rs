use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Controls how push and pop behave on a buffer.
///
/// `WaitOnEmpty` is the steady state. `Frozen` implements pause: both sides
/// block and the buffered data is conserved. `Closed` implements shutdown:
/// both sides fail immediately with [`PipelineError::BufferClosed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    /// Pop blocks until an element is available; push enqueues.
    WaitOnEmpty,
    /// Both pop and push block, even when elements are available.
    Frozen,
    /// Both pop and push fail with `BufferClosed`.
    Closed,
}

struct Inner<T> {
    contents: VecDeque<T>,
    mode: BufferMode,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    bell: Condvar,
    capacity: Option<usize>,
}

/// A thread-safe FIFO queue connecting two adjacent pipeline stages.
///
/// Handles are reference counted: the producing stage, the consuming stage
/// and the owning pipeline all hold clones of the same queue. Every mode
/// transition wakes all waiters, which re-evaluate their wait condition.
pub struct BufferQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BufferQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for BufferQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> BufferQueue<T> {
    /// Create a queue without a capacity bound.
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue that holds at most `capacity` elements.
    ///
    /// A push on a full queue blocks until a pop makes room, which is the
    /// only backpressure the pipeline applies.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity.max(1)))
    }

    pub(crate) fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    contents: VecDeque::new(),
                    mode: BufferMode::WaitOnEmpty,
                }),
                bell: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Append `value` at the tail.
    ///
    /// Blocks while the queue is `Frozen` or while a bounded queue is full.
    /// Fails with [`PipelineError::BufferClosed`] once the queue is closed;
    /// the value is dropped in that case.
    pub fn push(&self, value: T) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        loop {
            match inner.mode {
                BufferMode::Closed => return Err(PipelineError::BufferClosed),
                BufferMode::Frozen => self.shared.bell.wait(&mut inner),
                BufferMode::WaitOnEmpty => {
                    if let Some(cap) = self.shared.capacity {
                        if inner.contents.len() >= cap {
                            self.shared.bell.wait(&mut inner);
                            continue;
                        }
                    }
                    inner.contents.push_back(value);
                    drop(inner);
                    self.shared.bell.notify_all();
                    return Ok(());
                }
            }
        }
    }

    /// Remove and return the head element.
    ///
    /// Blocks while the queue is `Frozen`, or empty in `WaitOnEmpty` mode.
    /// Fails with [`PipelineError::BufferClosed`] once the queue is closed.
    pub fn pop(&self) -> Result<T> {
        let mut inner = self.shared.inner.lock();
        loop {
            match inner.mode {
                BufferMode::Closed => return Err(PipelineError::BufferClosed),
                BufferMode::Frozen => self.shared.bell.wait(&mut inner),
                BufferMode::WaitOnEmpty => match inner.contents.pop_front() {
                    Some(value) => {
                        drop(inner);
                        // Only bounded producers wait for room.
                        if self.shared.capacity.is_some() {
                            self.shared.bell.notify_all();
                        }
                        return Ok(value);
                    }
                    None => self.shared.bell.wait(&mut inner),
                },
            }
        }
    }

    /// Discard all buffered elements. Waiters are woken and re-evaluate.
    pub fn clear(&self) {
        self.shared.inner.lock().contents.clear();
        self.shared.bell.notify_all();
    }

    /// Switch the queue to `mode`, waking every waiter.
    pub fn set_mode(&self, mode: BufferMode) {
        self.shared.inner.lock().mode = mode;
        self.shared.bell.notify_all();
        tracing::trace!(?mode, "buffer mode set");
    }

    /// The current mode.
    pub fn mode(&self) -> BufferMode {
        self.shared.inner.lock().mode
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().contents.len()
    }

    /// Whether the queue holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity bound, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity
    }
}

/// Mode control over a buffer whose element type has been erased.
///
/// The pipeline holds one of these per inter-stage buffer so that a single
/// pass can freeze, close or reset a heterogeneously typed buffer list.
pub(crate) trait BufferControl: Send {
    fn set_mode(&self, mode: BufferMode);
    fn clear(&self);
}

impl<T: Send> BufferControl for BufferQueue<T> {
    fn set_mode(&self, mode: BufferMode) {
        BufferQueue::set_mode(self, mode);
    }

    fn clear(&self) {
        BufferQueue::clear(self);
    }
}
