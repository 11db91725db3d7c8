//! Emitter Core - stream emission for the event-mesh broker.
//!
//! This crate pushes responses to connected clients over long-lived
//! streams. Every producer in the broker shares one [`StreamEmitter`];
//! each client connection is a [`SessionHandle`] with its own bounded
//! queue and a single drain task that owns the connection's [`Transport`].
//!
//! # Architecture
//!
//! - [`session`]: per-client handles, lifecycle state, and the registry
//! - [`emitter`]: the [`EventEmitter`] trait and the stream emitter
//! - [`transport`]: the write seam and a length-prefixed framing
//! - [`message`]: request headers, status codes, and the wire envelope
//! - [`sweeper`]: background expiry of idle sessions
//! - [`config`]: queue, backpressure and timeout settings
//! - [`error`]: error types surfaced to producers
//!
//! # Guarantees
//!
//! - Messages to one session are written in the order they were accepted,
//!   one at a time, never interleaved.
//! - A stalled or failed session never delays sends to other sessions.
//! - A session whose stream fails is removed once, and its transport is
//!   closed once, no matter how many producers observe the failure.
//!
//! # Abstraction Traits
//!
//! - [`Transport`]: writing one frame to a client connection
//! - [`TaskSpawner`]: spawning drain and sweep tasks
//! - [`EventEmitter`]: per-connection response seam for request processors

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod emitter;
pub mod error;
pub mod message;
pub mod runtime;
pub mod session;
pub mod sweeper;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod test_fixtures;

pub use config::{BackpressureMode, EmitterConfig};
pub use emitter::{
    EventEmitter, LoggingEventEmitter, NoopEventEmitter, SessionEmitter, StreamEmitter,
};
pub use error::{ConfigError, EmitError, EmitResult, ErrorCode, TransportError};
pub use message::{OutboundMessage, RequestHeader, StatusCode};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{
    ClientInfo, GroupDistribution, Purpose, RemovalReason, SendOptions, SessionEvent,
    SessionHandle, SessionId, SessionRegistry, SessionState,
};
pub use sweeper::IdleSweeper;
pub use transport::{FramedTransport, Transport};
pub use utils::now_millis;
