use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type returned by fallible user callables.
///
/// Any error a stage callable produces — a returned `Err` or a caught
/// panic — is logged, counted against the stage and dropped together with
/// the item that caused it; it never travels between stages.
pub type StageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the pipeline runtime.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A push or pop was attempted on a closed buffer.
    ///
    /// This is a control signal rather than a failure: the pipeline closes
    /// every buffer during shutdown to unblock workers, and each worker
    /// treats it as "exit cleanly".
    #[error("buffer is closed")]
    BufferClosed,

    /// A stage worker panicked and was discovered at join time.
    ///
    /// Panics raised by stage callables are caught inside the worker and
    /// swallowed per item, so this reports a panic in the runtime itself.
    #[error("stage worker panicked")]
    WorkerPanicked,
}
