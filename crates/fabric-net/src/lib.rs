//! Transport-agnostic network layer: backends implement [`NetworkModule`],
//! and the rest of the runtime talks to them through [`Network`].

pub mod error;
pub mod message;
pub mod module;
pub mod network;
pub mod segment;

#[cfg(test)]
mod mock;

pub use error::{NetError, Result};
pub use message::ActiveMessage;
pub use module::{ActiveMessageImpl, ActiveMessageParams, NetworkModule, RemoteMemory};
pub use network::{ModuleState, Network, NetworkBuilder};
pub use segment::NetworkSegment;
