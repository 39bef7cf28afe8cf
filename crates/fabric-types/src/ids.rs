use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

strong_type!(
    /// Rank of a process in the job. Dense, starting at 0.
    NodeId,
    u32
);

strong_type!(
    /// Index of an active-message handler in the sorted handler table.
    ///
    /// Only meaningful between processes built from the same set of handlers;
    /// never persist it or compare it across builds.
    MessageId,
    u16
);

strong_type!(
    /// Identity of a memory the runtime exposes to remote nodes.
    MemoryId,
    u64
);

impl NodeId {
    /// The node that logs run-wide diagnostics.
    pub const ROOT: NodeId = NodeId(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl MessageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of a memory that may be proxied on a remote node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum MemoryKind {
    /// Ordinary pageable host memory.
    System = 0,
    /// Host memory pinned and registered with the network.
    Registered = 1,
    /// Device framebuffer memory.
    Gpu = 2,
    /// Memory backed by a file mapping.
    File = 3,
    /// Memory backed by a block device.
    Disk = 4,
    Other = 255,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::System => write!(f, "SYSTEM_MEM"),
            MemoryKind::Registered => write!(f, "REGDMA_MEM"),
            MemoryKind::Gpu => write!(f, "GPU_FB_MEM"),
            MemoryKind::File => write!(f, "FILE_MEM"),
            MemoryKind::Disk => write!(f, "DISK_MEM"),
            MemoryKind::Other => write!(f, "OTHER_MEM"),
        }
    }
}
