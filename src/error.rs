//! Error types for mixdown.
//!
//! Errors are split by audience:
//! - **Fatal errors** ([`EngineError`]): prevent the engine or a stream from
//!   being created, or reject an invalid argument.
//! - **Sink errors** ([`SinkError`]): failures inside a sink implementation;
//!   the mixer gives the sink one recovery attempt before exiting.
//! - **Source errors** ([`SourceError`]): a terminal failure reported by an
//!   input callback; the affected stream drains and ends, the engine
//!   continues.

use std::path::PathBuf;

/// Fatal errors returned from engine and stream creation or from invalid
/// transport arguments.
///
/// Runtime trouble (a stream's source failing, the sink hiccuping) is not
/// reported here; it is surfaced through [`StreamEvent`](crate::StreamEvent)
/// callbacks and the mixer's own recovery path.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The output configuration is unusable.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// The sink could not be opened.
    #[error("sink failed to open: {0}")]
    SinkOpen(#[source] SinkError),

    /// A stream's input parameters are unusable.
    #[error("invalid stream parameters: {0}")]
    InvalidStream(String),

    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The mixer thread disappeared before reporting startup.
    #[error("mixer thread exited before startup completed")]
    MixerUnavailable,

    /// A cache argument was rejected.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Invalid arguments to cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Caches must hold at least one sample.
    #[error("cache capacity must be non-zero")]
    ZeroCapacity,

    /// A cache cannot shrink below its current fill level.
    #[error("cache capacity {requested} is below current fill {fill}")]
    CapacityBelowFill {
        /// The capacity that was requested.
        requested: usize,
        /// Samples currently buffered.
        fill: usize,
    },

    /// The OS refused to spawn the producer thread.
    #[error("failed to spawn cache producer thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Errors that can occur within an [`AudioSink`](crate::AudioSink)
/// implementation.
///
/// A failed write earns the sink exactly one `recover` attempt; if the
/// retry also fails, the mixer exits cleanly and the engine remains
/// closable.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// No usable output device was found.
    #[error("no output device available")]
    NoDevice,

    /// An error from the underlying audio backend.
    #[error("audio backend error: {0}")]
    Backend(String),

    /// File I/O error.
    #[error("file error: {path}: {source}")]
    File {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The sink was written to before `prepare` was called.
    #[error("sink not prepared")]
    NotPrepared,
}

impl SinkError {
    /// Creates a write-failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a backend error with the given message.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Creates a file error for the given path.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

/// Terminal failure reported by an input callback.
///
/// Once a source errors it is never called again: the stream drains
/// whatever its cache still holds, then ends with a
/// [`StreamEvent::Ended`](crate::StreamEvent::Ended) notification.
#[derive(Debug, Clone, thiserror::Error)]
#[error("audio source failed: {reason}")]
pub struct SourceError {
    reason: String,
}

impl SourceError {
    /// Creates a source error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::SinkOpen(SinkError::NoDevice);
        assert_eq!(
            err.to_string(),
            "sink failed to open: no output device available"
        );
    }

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::CapacityBelowFill {
            requested: 100,
            fill: 250,
        };
        assert_eq!(
            err.to_string(),
            "cache capacity 100 is below current fill 250"
        );
    }

    #[test]
    fn test_sink_error_write_failed() {
        let err = SinkError::write_failed("ring full");
        assert_eq!(err.to_string(), "write failed: ring full");
    }

    #[test]
    fn test_sink_error_file() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = SinkError::file("/tmp/out.wav", io_err);
        assert!(err.to_string().contains("/tmp/out.wav"));
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::new("decoder gave up");
        assert_eq!(err.to_string(), "audio source failed: decoder gave up");
    }
}
