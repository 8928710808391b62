//! SSE connection stream.
//!
//! Per-connection state machine: subscribe, emit a `connected` event
//! immediately, then loop waiting for the next queued event with the
//! heartbeat timeout — a timeout yields a protocol-level heartbeat (an
//! SSE comment frame, invisible to the client's event parser), an event
//! yields a data frame. The [`Subscription`] moves into the stream, so
//! whichever way the stream ends (client disconnect, cancellation, error)
//! its drop runs the unsubscribe exactly once.

use crate::events::BroadcastEvent;
use crate::registry::Subscription;
use async_stream::stream;
use futures::stream::Stream;
use std::time::Duration;
use tokio::time::timeout;

/// One frame on an SSE connection.
#[derive(Clone, Debug, PartialEq)]
pub enum SseFrame {
    /// The initial liveness event.
    Connected(BroadcastEvent),
    /// A broadcast event delivered to this subscriber.
    Data(BroadcastEvent),
    /// Emitted when no event arrived within the heartbeat interval.
    Heartbeat,
}

impl SseFrame {
    /// Render the frame as `text/event-stream` bytes: data events are
    /// `data: <json>\n\n` records, heartbeats are the comment frame
    /// `: heartbeat\n\n`.
    pub fn to_wire(&self) -> String {
        match self {
            SseFrame::Connected(event) | SseFrame::Data(event) => {
                match serde_json::to_string(event) {
                    Ok(json) => format!("data: {json}\n\n"),
                    Err(e) => {
                        // Best-effort path: a malformed event must not
                        // tear down the connection.
                        tracing::warn!("failed to serialise SSE event: {e}");
                        ": serialisation-error\n\n".to_string()
                    }
                }
            }
            SseFrame::Heartbeat => ": heartbeat\n\n".to_string(),
        }
    }
}

/// Build the frame stream for one connection.
///
/// Takes ownership of the subscription; emits `Connected` first, then
/// data frames as events arrive, with a `Heartbeat` whenever `heartbeat`
/// elapses without one. Ends only if the registry side is torn down —
/// inactivity alone never closes the stream.
pub fn event_stream(
    mut subscription: Subscription,
    heartbeat: Duration,
) -> impl Stream<Item = SseFrame> {
    stream! {
        yield SseFrame::Connected(BroadcastEvent::connected(subscription.channel()));

        loop {
            match timeout(heartbeat, subscription.recv()).await {
                Ok(Some(event)) => yield SseFrame::Data(event),
                // Registry torn down; nothing more will arrive.
                Ok(None) => break,
                Err(_elapsed) => yield SseFrame::Heartbeat,
            }
        }
    }
}
