#[macro_use]
pub mod strong_type;

pub mod ids;
pub mod node_set;

pub use ids::{MemoryId, MemoryKind, MessageId, NodeId};
pub use node_set::NodeSet;
