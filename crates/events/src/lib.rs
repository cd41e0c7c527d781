//! Session event channel between the restart coordinator and observers.
//!
//! - [`EventBus`]: ordered, bounded queue of [`SessionEvent`]s with a
//!   single terminal event per session.
//! - [`stream::frames`]: adapter turning the bus into keep-alive / message /
//!   done frames for a long-lived transport.

pub mod bus;
pub mod stream;

pub use bus::{EventBus, SessionEvent};
pub use stream::{frames, StreamFrame, TERMINAL_MARKER};
