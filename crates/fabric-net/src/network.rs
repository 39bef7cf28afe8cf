//! Process-wide view of the network.
//!
//! A [`Network`] knows this node's identity, the peers it can reach, and
//! which backend serves each of them. Every collective and send goes through
//! it so callers never name a transport. With a single backend (the usual
//! case) routing skips the per-node table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use fabric_types::{MemoryId, MemoryKind, NodeId, NodeSet};
use parking_lot::Mutex;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::error::{NetError, Result};
use crate::message::ActiveMessage;
use crate::module::{ActiveMessageParams, NetworkModule, RemoteMemory};
use crate::segment::NetworkSegment;

/// Lifecycle of a loaded backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Unattached,
    Attached,
    Detached,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleState::Unattached => "unattached",
            ModuleState::Attached => "attached",
            ModuleState::Detached => "detached",
        };
        f.write_str(s)
    }
}

struct LoadedModule {
    module: Arc<dyn NetworkModule>,
    nodes: NodeSet,
    state: Mutex<ModuleState>,
}

impl LoadedModule {
    fn name(&self) -> &str {
        self.module.name()
    }

    fn check_transition(&self, from: ModuleState, to: ModuleState) -> Result<()> {
        let state = *self.state.lock();
        if state != from {
            return Err(NetError::InvalidState(format!(
                "{} is {}, cannot become {}",
                self.name(),
                state,
                to
            )));
        }
        Ok(())
    }
}

/// Collects backends and the nodes each one serves.
pub struct NetworkBuilder {
    my_node: NodeId,
    max_node: NodeId,
    modules: Vec<(Arc<dyn NetworkModule>, NodeSet)>,
}

impl NetworkBuilder {
    /// Load `module` as the backend for `nodes`. Backends are attached,
    /// detached and asked to run collectives in the order they are added.
    pub fn add_module(mut self, module: Arc<dyn NetworkModule>, nodes: NodeSet) -> Self {
        self.modules.push((module, nodes));
        self
    }

    pub fn build(self) -> Result<Network> {
        if self.modules.is_empty() {
            return Err(NetError::NoBackends);
        }
        if self.my_node > self.max_node {
            return Err(NetError::NodeOutOfRange {
                node: self.my_node,
                max: self.max_node,
            });
        }

        let mut names = HashSet::new();
        let mut owners: HashMap<NodeId, usize> = HashMap::new();
        for (idx, (module, nodes)) in self.modules.iter().enumerate() {
            if !names.insert(module.name().to_string()) {
                return Err(NetError::DuplicateBackend(module.name().to_string()));
            }
            for node in nodes {
                if node > self.max_node {
                    return Err(NetError::NodeOutOfRange {
                        node,
                        max: self.max_node,
                    });
                }
                if let Some(&prev) = owners.get(&node) {
                    return Err(NetError::NodeAlreadyRouted {
                        node,
                        existing: self.modules[prev].0.name().to_string(),
                        backend: module.name().to_string(),
                    });
                }
                owners.insert(node, idx);
            }
        }

        let mut all_peers: NodeSet = owners.keys().copied().collect();
        all_peers.remove(self.my_node);

        // one backend needs no per-node table
        let routes = if self.modules.len() == 1 {
            HashMap::new()
        } else {
            owners
        };

        let modules: Vec<LoadedModule> = self
            .modules
            .into_iter()
            .map(|(module, nodes)| LoadedModule {
                module,
                nodes,
                state: Mutex::new(ModuleState::Unattached),
            })
            .collect();

        tracing::info!(
            my_node = %self.my_node,
            max_node = %self.max_node,
            peers = all_peers.len(),
            backends = modules.len(),
            "network initialized"
        );

        Ok(Network {
            my_node: self.my_node,
            max_node: self.max_node,
            all_peers,
            modules,
            routes,
        })
    }
}

/// The network as seen from one node.
pub struct Network {
    my_node: NodeId,
    max_node: NodeId,
    all_peers: NodeSet,
    modules: Vec<LoadedModule>,
    routes: HashMap<NodeId, usize>,
}

impl Network {
    pub fn builder(my_node: NodeId, max_node: NodeId) -> NetworkBuilder {
        NetworkBuilder {
            my_node,
            max_node,
            modules: Vec::new(),
        }
    }

    pub fn my_node(&self) -> NodeId {
        self.my_node
    }

    pub fn max_node(&self) -> NodeId {
        self.max_node
    }

    /// Every reachable node except this one.
    pub fn all_peers(&self) -> &NodeSet {
        &self.all_peers
    }

    /// The only backend, if exactly one is loaded.
    pub fn single_network(&self) -> Option<&Arc<dyn NetworkModule>> {
        match self.modules.as_slice() {
            [only] => Some(&only.module),
            _ => None,
        }
    }

    /// The backend responsible for `node`.
    pub fn get_network(&self, node: NodeId) -> Result<&Arc<dyn NetworkModule>> {
        Ok(&self.modules[self.module_index(node)?].module)
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.modules.iter().map(LoadedModule::name)
    }

    pub fn module_state(&self, name: &str) -> Option<ModuleState> {
        self.modules
            .iter()
            .find(|m| m.name() == name)
            .map(|m| *m.state.lock())
    }

    fn module_index(&self, node: NodeId) -> Result<usize> {
        if self.modules.len() == 1 {
            if node > self.max_node {
                return Err(NetError::UnknownNode(node));
            }
            return Ok(0);
        }
        self.routes
            .get(&node)
            .copied()
            .ok_or(NetError::UnknownNode(node))
    }

    /// Let each backend, in load order, consume its arguments.
    pub fn parse_command_line(&self, cmdline: &mut Vec<String>) -> Result<()> {
        for m in &self.modules {
            m.module.parse_command_line(cmdline)?;
        }
        Ok(())
    }

    /// Bind `segments` with every backend. Collective.
    pub async fn attach(&self, segments: &mut [NetworkSegment]) -> Result<()> {
        for m in &self.modules {
            m.check_transition(ModuleState::Unattached, ModuleState::Attached)?;
            if let Err(e) = m.module.attach(segments).await {
                tracing::error!(backend = m.name(), "attach failed: {}", e);
                return Err(NetError::AttachFailed {
                    backend: m.name().to_string(),
                    reason: e.to_string(),
                });
            }
            *m.state.lock() = ModuleState::Attached;
            tracing::info!(
                backend = m.name(),
                nodes = m.nodes.len(),
                segments = segments.len(),
                "network attached"
            );
        }
        Ok(())
    }

    /// Release every backend's bindings. Collective.
    pub async fn detach(&self, segments: &mut [NetworkSegment]) -> Result<()> {
        for m in &self.modules {
            m.check_transition(ModuleState::Attached, ModuleState::Detached)?;
            if let Err(e) = m.module.detach(segments).await {
                tracing::error!(backend = m.name(), "detach failed: {}", e);
                return Err(NetError::DetachFailed {
                    backend: m.name().to_string(),
                    reason: e.to_string(),
                });
            }
            *m.state.lock() = ModuleState::Detached;
            tracing::info!(backend = m.name(), "network detached");
        }
        Ok(())
    }

    fn ensure_attached(&self, op: &str) -> Result<()> {
        for m in &self.modules {
            let state = *m.state.lock();
            if state != ModuleState::Attached {
                return Err(NetError::InvalidState(format!(
                    "{} on {} backend {}",
                    op,
                    state,
                    m.name()
                )));
            }
        }
        Ok(())
    }

    fn check_root(&self, root: NodeId) -> Result<()> {
        if root > self.max_node {
            return Err(NetError::NodeOutOfRange {
                node: root,
                max: self.max_node,
            });
        }
        Ok(())
    }

    /// Backend that runs collectives keyed to `node`.
    fn collective_module(&self, node: NodeId) -> Result<&LoadedModule> {
        Ok(&self.modules[self.module_index(node)?])
    }

    /// Wait for every node served by this node's backend. Collective.
    pub async fn barrier(&self) -> Result<()> {
        self.ensure_attached("barrier")?;
        let m = self.collective_module(self.my_node)?;
        m.module.barrier().await.inspect_err(|e| {
            tracing::error!(backend = m.name(), "barrier failed: {}", e);
        })
    }

    /// Copy `val_in` on `root` into `val_out` on every node served by
    /// `root`'s backend. Collective.
    pub async fn broadcast_bytes(
        &self,
        root: NodeId,
        val_in: &[u8],
        val_out: &mut [u8],
    ) -> Result<()> {
        self.ensure_attached("broadcast")?;
        self.check_root(root)?;
        if val_in.len() != val_out.len() {
            return Err(NetError::SizeMismatch {
                expected: val_in.len(),
                actual: val_out.len(),
            });
        }
        let m = self.collective_module(root)?;
        m.module
            .broadcast(root, val_in, val_out)
            .await
            .inspect_err(|e| {
                tracing::error!(backend = m.name(), %root, "broadcast failed: {}", e);
            })
    }

    /// Collect `val_in` from every node served by `root`'s backend onto
    /// `root`. Collective.
    ///
    /// On `root`, `vals_out` must hold `max_node + 1` slots of
    /// `val_in.len()` bytes; slot `i` receives node `i`'s value, and slots of
    /// nodes on other backends are left untouched. Other nodes pass `None`.
    pub async fn gather_bytes(
        &self,
        root: NodeId,
        val_in: &[u8],
        mut vals_out: Option<&mut [u8]>,
    ) -> Result<()> {
        self.ensure_attached("gather")?;
        self.check_root(root)?;
        if self.my_node == root {
            let expected = val_in.len() * self.node_count();
            match vals_out.as_deref() {
                None => {
                    return Err(NetError::InvalidArgument(
                        "gather root must supply an output buffer".into(),
                    ))
                }
                Some(out) if out.len() != expected => {
                    return Err(NetError::SizeMismatch {
                        expected,
                        actual: out.len(),
                    })
                }
                Some(_) => {}
            }
        } else {
            vals_out = None;
        }
        let m = self.collective_module(root)?;
        m.module
            .gather(root, val_in, vals_out)
            .await
            .inspect_err(|e| {
                tracing::error!(backend = m.name(), %root, "gather failed: {}", e);
            })
    }

    /// Typed [`broadcast_bytes`](Self::broadcast_bytes): every node returns
    /// `root`'s `val`.
    pub async fn broadcast<T>(&self, root: NodeId, val: T) -> Result<T>
    where
        T: IntoBytes + FromBytes + Immutable,
    {
        let mut out = T::new_zeroed();
        self.broadcast_bytes(root, val.as_bytes(), out.as_mut_bytes())
            .await?;
        Ok(out)
    }

    /// Typed [`gather_bytes`](Self::gather_bytes). `root` gets every node's
    /// value, indexed by node id; other nodes get `None`.
    pub async fn gather<T>(&self, root: NodeId, val: T) -> Result<Option<Vec<T>>>
    where
        T: IntoBytes + FromBytes + Immutable,
    {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Err(NetError::InvalidArgument(
                "cannot gather zero-sized values".into(),
            ));
        }
        if self.my_node != root {
            self.gather_bytes(root, val.as_bytes(), None).await?;
            return Ok(None);
        }
        let mut buf = vec![0u8; size * self.node_count()];
        self.gather_bytes(root, val.as_bytes(), Some(buf.as_mut_slice()))
            .await?;
        let values = buf
            .chunks_exact(size)
            .map(|chunk| {
                T::read_from_bytes(chunk).map_err(|_| NetError::SizeMismatch {
                    expected: size,
                    actual: chunk.len(),
                })
            })
            .collect::<Result<Vec<T>>>()?;
        Ok(Some(values))
    }

    /// Contribute `val` to a gather on another node.
    pub async fn gather_to_root<T>(&self, root: NodeId, val: T) -> Result<()>
    where
        T: IntoBytes + Immutable,
    {
        if self.my_node == root {
            return Err(NetError::InvalidArgument(
                "gather root must collect the result".into(),
            ));
        }
        self.gather_bytes(root, val.as_bytes(), None).await
    }

    /// Start a message to `target`.
    pub fn create_active_message(
        &self,
        target: NodeId,
        params: ActiveMessageParams,
    ) -> Result<ActiveMessage> {
        let max_payload_size = params.max_payload_size;
        let part = self
            .get_network(target)?
            .create_active_message_impl(target, params)?;
        Ok(ActiveMessage::new(vec![part], max_payload_size))
    }

    /// Start a message to every node in `targets`. Targets served by
    /// different backends get one send object per backend.
    pub fn create_multicast_message(
        &self,
        targets: &NodeSet,
        params: ActiveMessageParams,
    ) -> Result<ActiveMessage> {
        if params.dest_payload_addr.is_some() {
            return Err(NetError::InvalidArgument(
                "multicast messages cannot name a destination payload address".into(),
            ));
        }
        if targets.is_empty() {
            return Err(NetError::InvalidArgument("empty multicast target set".into()));
        }

        let mut groups: BTreeMap<usize, NodeSet> = BTreeMap::new();
        for node in targets {
            groups
                .entry(self.module_index(node)?)
                .or_default()
                .insert(node);
        }

        let ActiveMessageParams {
            msgid,
            header_size,
            max_payload_size,
            dest_payload_addr,
            mut storage,
        } = params;
        let mut parts = Vec::with_capacity(groups.len());
        for (idx, nodes) in &groups {
            // caller storage can back only one send object
            let part_params = ActiveMessageParams {
                msgid,
                header_size,
                max_payload_size,
                dest_payload_addr,
                storage: storage.take(),
            };
            parts.push(
                self.modules[*idx]
                    .module
                    .create_multicast_message_impl(nodes, part_params)?,
            );
        }
        if parts.len() > 1 {
            tracing::debug!(
                msgid = %msgid,
                backends = parts.len(),
                "multicast split across backends"
            );
        }
        Ok(ActiveMessage::new(parts, max_payload_size))
    }

    /// Proxy for `memory`, which lives on `node`.
    pub fn create_remote_memory(
        &self,
        node: NodeId,
        memory: MemoryId,
        size: usize,
        kind: MemoryKind,
        rdma_info: Bytes,
    ) -> Result<Box<dyn RemoteMemory>> {
        self.get_network(node)?
            .create_remote_memory(memory, size, kind, rdma_info)
    }

    fn node_count(&self) -> usize {
        self.max_node.0 as usize + 1
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("my_node", &self.my_node)
            .field("max_node", &self.max_node)
            .field("all_peers", &self.all_peers)
            .field("backends", &self.module_names().collect::<Vec<_>>())
            .finish()
    }
}
