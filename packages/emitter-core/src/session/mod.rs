//! Client sessions: the per-connection outbound handle and the registry
//! that owns them.
//!
//! - [`SessionHandle`]: bounded FIFO queue + single drain task per client
//! - [`SessionRegistry`]: concurrent id → handle map with idempotent removal
//! - [`SessionEvent`]: lifecycle notifications broadcast by the registry

mod client;
mod events;
mod handle;
mod registry;
mod state;

pub use client::{ClientInfo, Purpose, SessionId};
pub use events::{RemovalReason, SessionEvent};
pub use handle::{SendOptions, SessionHandle};
pub use registry::{GroupDistribution, SessionRegistry};
pub use state::SessionState;
