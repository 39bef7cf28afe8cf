//! Active-message plumbing shared by every network backend: the handler
//! table that maps wire ids to callables, and the payload sources that
//! describe outgoing message bodies.

pub mod config;
pub mod handler;
pub mod hash;
pub mod payload;
pub mod stats;

pub use config::ActiveMessageConfig;
pub use handler::{
    HandlerEntry, HandlerRegistration, HandlerRegistry, HandlerReport, HandlerTable,
    MessageHandler,
};
pub use hash::handler_hash;
pub use payload::{ContiguousPayload, PayloadMode, PayloadSource, SpanPayload, TwoDPayload};
pub use stats::{HandlerStats, StatsSnapshot};
