//! Contract every network backend implements.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fabric_types::{MemoryId, MemoryKind, MessageId, NodeId, NodeSet};

use crate::error::Result;
use crate::segment::NetworkSegment;

/// Shape of an outgoing active message.
#[derive(Debug, Clone)]
pub struct ActiveMessageParams {
    pub msgid: MessageId,
    pub header_size: usize,
    pub max_payload_size: usize,
    /// Where the payload should land on the target, for backends that can
    /// write it there directly. Single-target messages only.
    pub dest_payload_addr: Option<u64>,
    /// Caller-provided space for building the message, if any.
    pub storage: Option<BytesMut>,
}

impl ActiveMessageParams {
    pub fn new(msgid: MessageId, header_size: usize, max_payload_size: usize) -> Self {
        Self {
            msgid,
            header_size,
            max_payload_size,
            dest_payload_addr: None,
            storage: None,
        }
    }

    pub fn with_dest_payload_addr(mut self, addr: u64) -> Self {
        self.dest_payload_addr = Some(addr);
        self
    }

    pub fn with_storage(mut self, storage: BytesMut) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// A backend's send object for one message, being filled in.
pub trait ActiveMessageImpl: Send {
    /// Header bytes, exactly `header_size` long.
    fn header_mut(&mut self) -> &mut [u8];

    /// Payload space, `max_payload_size` long.
    fn payload_mut(&mut self) -> &mut [u8];

    /// Send the header and the first `payload_size` payload bytes.
    fn commit(self: Box<Self>, payload_size: usize);

    /// Release the send object without sending anything.
    fn cancel(self: Box<Self>);
}

/// A local proxy for memory that lives on another node.
pub trait RemoteMemory: Send + Sync {
    fn memory(&self) -> MemoryId;
    fn size(&self) -> usize;
    fn kind(&self) -> MemoryKind;
    /// Binding info the owning node's backend recorded for the memory.
    fn rdma_info(&self) -> &Bytes;
}

/// A network transport.
///
/// Collective methods (`attach`, `detach`, `barrier`, `broadcast`, `gather`)
/// must be called by every node using this backend, in the same order.
#[async_trait]
pub trait NetworkModule: Send + Sync + 'static {
    /// Unique name of the backend. Also the key for its segment binding info.
    fn name(&self) -> &str;

    /// Consume the backend's own arguments from `cmdline`.
    fn parse_command_line(&self, cmdline: &mut Vec<String>) -> Result<()> {
        let _ = cmdline;
        Ok(())
    }

    /// Bind `segments`, calling [`NetworkSegment::add_rdma_info`] on each one
    /// bound successfully.
    async fn attach(&self, segments: &mut [NetworkSegment]) -> Result<()>;

    /// Release whatever `attach` acquired.
    async fn detach(&self, segments: &mut [NetworkSegment]) -> Result<()>;

    async fn barrier(&self) -> Result<()>;

    /// Copy `val_in` on `root` into `val_out` on every node.
    async fn broadcast(&self, root: NodeId, val_in: &[u8], val_out: &mut [u8]) -> Result<()>;

    /// Collect `val_in` from every node. On `root`, `vals_out` holds one
    /// `val_in.len()` slot per node, indexed by node id.
    async fn gather(&self, root: NodeId, val_in: &[u8], vals_out: Option<&mut [u8]>)
        -> Result<()>;

    fn create_remote_memory(
        &self,
        memory: MemoryId,
        size: usize,
        kind: MemoryKind,
        rdma_info: Bytes,
    ) -> Result<Box<dyn RemoteMemory>>;

    fn create_active_message_impl(
        &self,
        target: NodeId,
        params: ActiveMessageParams,
    ) -> Result<Box<dyn ActiveMessageImpl>>;

    fn create_multicast_message_impl(
        &self,
        targets: &NodeSet,
        params: ActiveMessageParams,
    ) -> Result<Box<dyn ActiveMessageImpl>>;
}
