//! # CareLink Realtime
//!
//! The live notification/eventing core: a per-process channel registry
//! with pub/sub fan-out, the broadcast API, and the Server-Sent-Events
//! connection stream with heartbeats and guaranteed unsubscribe.
//!
//! The registry is an explicitly constructed instance owned by the
//! serving process (no hidden global state); task workers reach it only
//! through the [`Broadcaster`] trait, which is the architectural boundary
//! between the request-serving process and the worker pool.

#![warn(rust_2018_idioms)]

pub mod channel;
pub mod events;
pub mod registry;
pub mod stream;

pub use channel::ChannelKey;
pub use events::{AlertSeverity, BroadcastEvent};
pub use registry::{Broadcaster, ChannelRegistry, Subscription};
pub use stream::{event_stream, SseFrame};
