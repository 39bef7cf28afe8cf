//! In-process backend for tests: every "node" is a `Network` in the same
//! process, and the nodes of one world meet through shared state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use fabric_activemsg::HandlerTable;
use fabric_types::{MemoryId, MemoryKind, MessageId, NodeId, NodeSet};
use parking_lot::Mutex;
use tokio::sync::Barrier;

use crate::error::{NetError, Result};
use crate::module::{ActiveMessageImpl, ActiveMessageParams, NetworkModule, RemoteMemory};
use crate::segment::NetworkSegment;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Delivery {
    pub backend: String,
    pub sender: NodeId,
    pub targets: Vec<NodeId>,
    pub msgid: MessageId,
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
}

pub(crate) struct MockWorld {
    barrier: Barrier,
    bcast: Mutex<Vec<u8>>,
    slots: Mutex<HashMap<NodeId, Vec<u8>>>,
    next_addr: AtomicU64,
    pub delivered: Mutex<Vec<Delivery>>,
    pub cancelled: AtomicUsize,
    /// Address of every caller-provided storage buffer a message was built in.
    pub storage_seen: Mutex<Vec<usize>>,
    tables: Mutex<HashMap<NodeId, Arc<HandlerTable>>>,
}

impl MockWorld {
    /// A world whose collectives wait for `participants` nodes.
    pub fn new(participants: usize) -> Arc<Self> {
        Arc::new(Self {
            barrier: Barrier::new(participants),
            bcast: Mutex::new(Vec::new()),
            slots: Mutex::new(HashMap::new()),
            next_addr: AtomicU64::new(0x1000_0000),
            delivered: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
            storage_seen: Mutex::new(Vec::new()),
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Dispatch messages committed to `node` through `table`.
    pub fn install_table(&self, node: NodeId, table: Arc<HandlerTable>) {
        self.tables.lock().insert(node, table);
    }

    pub fn take_delivered(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.delivered.lock())
    }

    fn deliver(&self, delivery: Delivery) {
        let tables: Vec<Arc<HandlerTable>> = {
            let tables = self.tables.lock();
            delivery
                .targets
                .iter()
                .filter_map(|t| tables.get(t).cloned())
                .collect()
        };
        for table in tables {
            table.dispatch(
                delivery.msgid,
                delivery.sender,
                &delivery.header,
                &delivery.payload,
            );
        }
        self.delivered.lock().push(delivery);
    }
}

pub(crate) struct MockModule {
    name: String,
    node: NodeId,
    world: Arc<MockWorld>,
    fail_attach: bool,
    scope: Option<NodeSet>,
    pub args: Mutex<Vec<String>>,
    pub collectives: AtomicUsize,
}

impl MockModule {
    pub fn new(name: &str, node: NodeId, world: &Arc<MockWorld>) -> Self {
        Self {
            name: name.to_string(),
            node,
            world: Arc::clone(world),
            fail_attach: false,
            scope: None,
            args: Mutex::new(Vec::new()),
            collectives: AtomicUsize::new(0),
        }
    }

    /// A backend that refuses collectives keyed to nodes outside `scope`.
    pub fn scoped(name: &str, node: NodeId, world: &Arc<MockWorld>, scope: NodeSet) -> Self {
        Self {
            scope: Some(scope),
            ..Self::new(name, node, world)
        }
    }

    fn enter_collective(&self, node: NodeId) -> Result<()> {
        self.collectives.fetch_add(1, Ordering::SeqCst);
        match &self.scope {
            Some(scope) if !scope.contains(node) => Err(NetError::CollectiveFailed(format!(
                "node {} is not served by {}",
                node, self.name
            ))),
            _ => Ok(()),
        }
    }

    pub fn failing(name: &str, node: NodeId, world: &Arc<MockWorld>) -> Self {
        Self {
            fail_attach: true,
            ..Self::new(name, node, world)
        }
    }

    fn message(
        &self,
        targets: Vec<NodeId>,
        params: ActiveMessageParams,
    ) -> Box<dyn ActiveMessageImpl> {
        let caller_storage = params.storage.is_some();
        let mut payload = params.storage.unwrap_or_default();
        payload.clear();
        payload.resize(params.max_payload_size, 0);
        if caller_storage {
            self.world
                .storage_seen
                .lock()
                .push(payload.as_ptr() as usize);
        }
        Box::new(MockMessage {
            backend: self.name.clone(),
            sender: self.node,
            targets,
            msgid: params.msgid,
            header: vec![0; params.header_size],
            payload,
            world: Arc::clone(&self.world),
        })
    }
}

#[async_trait]
impl NetworkModule for MockModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_command_line(&self, cmdline: &mut Vec<String>) -> Result<()> {
        let prefix = format!("-{}:", self.name);
        let mut consumed = self.args.lock();
        cmdline.retain(|arg| {
            if arg.starts_with(&prefix) {
                consumed.push(arg.clone());
                false
            } else {
                true
            }
        });
        Ok(())
    }

    async fn attach(&self, segments: &mut [NetworkSegment]) -> Result<()> {
        if self.fail_attach {
            return Err(NetError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "device unavailable",
            )));
        }
        for seg in segments.iter_mut() {
            let base = match seg.base() {
                Some(base) => base,
                None => {
                    let base = self
                        .world
                        .next_addr
                        .fetch_add(seg.bytes().max(1) as u64, Ordering::SeqCst);
                    seg.set_base(base);
                    base
                }
            };
            seg.add_rdma_info(&self.name, format!("{}@{:x}", self.name, base).as_bytes());
        }
        Ok(())
    }

    async fn detach(&self, segments: &mut [NetworkSegment]) -> Result<()> {
        for seg in segments.iter_mut() {
            seg.remove_rdma_info(&self.name);
        }
        Ok(())
    }

    async fn barrier(&self) -> Result<()> {
        self.enter_collective(self.node)?;
        self.world.barrier.wait().await;
        Ok(())
    }

    async fn broadcast(&self, root: NodeId, val_in: &[u8], val_out: &mut [u8]) -> Result<()> {
        self.enter_collective(root)?;
        if self.node == root {
            *self.world.bcast.lock() = val_in.to_vec();
        }
        self.world.barrier.wait().await;
        val_out.copy_from_slice(&self.world.bcast.lock());
        self.world.barrier.wait().await;
        Ok(())
    }

    async fn gather(
        &self,
        root: NodeId,
        val_in: &[u8],
        vals_out: Option<&mut [u8]>,
    ) -> Result<()> {
        self.enter_collective(root)?;
        self.world.slots.lock().insert(self.node, val_in.to_vec());
        self.world.barrier.wait().await;
        if self.node == root {
            let out = vals_out.ok_or_else(|| NetError::CollectiveFailed("no output".into()))?;
            let len = val_in.len();
            for (node, val) in self.world.slots.lock().iter() {
                let start = node.0 as usize * len;
                out[start..start + len].copy_from_slice(val);
            }
        }
        self.world.barrier.wait().await;
        Ok(())
    }

    fn create_remote_memory(
        &self,
        memory: MemoryId,
        size: usize,
        kind: MemoryKind,
        rdma_info: Bytes,
    ) -> Result<Box<dyn RemoteMemory>> {
        Ok(Box::new(MockRemoteMemory {
            memory,
            size,
            kind,
            rdma_info,
        }))
    }

    fn create_active_message_impl(
        &self,
        target: NodeId,
        params: ActiveMessageParams,
    ) -> Result<Box<dyn ActiveMessageImpl>> {
        Ok(self.message(vec![target], params))
    }

    fn create_multicast_message_impl(
        &self,
        targets: &NodeSet,
        params: ActiveMessageParams,
    ) -> Result<Box<dyn ActiveMessageImpl>> {
        Ok(self.message(targets.iter().collect(), params))
    }
}

struct MockMessage {
    backend: String,
    sender: NodeId,
    targets: Vec<NodeId>,
    msgid: MessageId,
    header: Vec<u8>,
    payload: BytesMut,
    world: Arc<MockWorld>,
}

impl ActiveMessageImpl for MockMessage {
    fn header_mut(&mut self) -> &mut [u8] {
        &mut self.header
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.payload
    }

    fn commit(self: Box<Self>, payload_size: usize) {
        let this = *self;
        this.world.deliver(Delivery {
            backend: this.backend,
            sender: this.sender,
            targets: this.targets,
            msgid: this.msgid,
            header: this.header,
            payload: this.payload[..payload_size].to_vec(),
        });
    }

    fn cancel(self: Box<Self>) {
        self.world.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockRemoteMemory {
    memory: MemoryId,
    size: usize,
    kind: MemoryKind,
    rdma_info: Bytes,
}

impl RemoteMemory for MockRemoteMemory {
    fn memory(&self) -> MemoryId {
        self.memory
    }

    fn size(&self) -> usize {
        self.size
    }

    fn kind(&self) -> MemoryKind {
        self.kind
    }

    fn rdma_info(&self) -> &Bytes {
        &self.rdma_info
    }
}
