//! Runtime events for monitoring stream health.
//!
//! Events are non-fatal notifications about a single stream's buffering
//! lifecycle. The engine keeps running after any event; they exist for
//! UI feedback and logging, not error handling.

use std::sync::Arc;

/// Runtime events emitted for a stream.
///
/// Register a callback via
/// [`MixerEngine::set_event_callback`](crate::MixerEngine::set_event_callback)
/// to receive them. `Buffering` and `Ready` are edge-triggered: each is
/// emitted once per transition, never repeated while the state holds.
///
/// Callbacks are invoked from the mixer thread after it releases the
/// engine lock, so they may call back into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream's cache ran empty and is refilling; the mixer is
    /// skipping this stream until the cache reports ready again.
    Buffering,

    /// The stream's cache reached ready and samples are flowing again.
    Ready,

    /// The stream's source reported a terminal failure. Remaining buffered
    /// samples were drained; the stream stays in the engine until
    /// explicitly removed, but will never produce audio again.
    Ended,
}

/// Callback type for receiving stream events.
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use mixdown::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     if event == StreamEvent::Buffering {
///         tracing::info!("stream is rebuffering");
///     }
/// });
/// # let _ = callback;
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
