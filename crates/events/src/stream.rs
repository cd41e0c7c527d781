//! Pull-side adapter from [`EventBus`] to a push transport.
//!
//! [`frames`] turns the bus into a stream of [`StreamFrame`]s: a keep-alive
//! whenever nothing arrived within the poll interval, one message per
//! progress event, and a final [`StreamFrame::Done`] after which the stream
//! ends. Dropping the stream (observer disconnected) simply stops consuming;
//! the session carries on without an audience.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::bus::{EventBus, SessionEvent};

/// Literal text sent to observers after the terminal event.
pub const TERMINAL_MARKER: &str = "[DONE]";

/// One unit handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    /// Nothing happened during the poll interval; keep the connection open.
    KeepAlive,
    /// A rendered progress line.
    Message(String),
    /// The session ended; no more frames follow.
    Done,
}

/// Stream the bus to one observer, polling every `poll`.
pub fn frames(bus: Arc<EventBus>, poll: Duration) -> impl Stream<Item = StreamFrame> {
    futures::stream::unfold(Some(bus), move |bus| async move {
        let bus = bus?;
        match bus.consume_blocking(poll).await {
            None => Some((StreamFrame::KeepAlive, Some(bus))),
            Some(SessionEvent::Progress(event)) => {
                Some((StreamFrame::Message(event.to_string()), Some(bus)))
            }
            Some(SessionEvent::Terminal(outcome)) => {
                tracing::debug!(%outcome, "Stream reached terminal event");
                Some((StreamFrame::Done, None))
            }
        }
    })
}
