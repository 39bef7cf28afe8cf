//! Active-message handler registry and table.
//!
//! Handlers are registered into a [`HandlerRegistry`] during start-up, in
//! whatever order the components of the process happen to initialize. The
//! registry is then frozen into a [`HandlerTable`] whose entries are sorted by
//! each handler's content hash. Every node linking the same handlers computes
//! the same order, so an entry's index can be sent over the wire as its
//! [`MessageId`] without any exchange between nodes.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use fabric_config::ConfigManager;
use fabric_logging::AMHANDLER_TARGET;
use fabric_types::{MessageId, NodeId};

use crate::config::ActiveMessageConfig;
use crate::hash::handler_hash;
use crate::stats::{HandlerStats, StatsSnapshot};

/// Callable invoked on the receiving node with `(sender, header, payload)`.
pub type MessageHandler = Arc<dyn Fn(NodeId, &[u8], &[u8]) + Send + Sync>;

/// One pending handler, not yet assigned an id.
pub struct HandlerRegistration {
    hash: u64,
    name: Cow<'static, str>,
    handler: MessageHandler,
}

impl HandlerRegistration {
    /// Register `handler` under `name`; its hash is derived from the name.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(NodeId, &[u8], &[u8]) + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            hash: handler_hash(&name),
            name,
            handler: Arc::new(handler),
        }
    }

    /// Register with a caller-supplied hash. The hash must be computed the
    /// same way on every node.
    pub fn with_hash<F>(hash: u64, name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(NodeId, &[u8], &[u8]) + Send + Sync + 'static,
    {
        Self {
            hash,
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handlers collected before the table is built.
#[derive(Default)]
pub struct HandlerRegistry {
    pending: Vec<HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: HandlerRegistration) {
        self.pending.push(registration);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct HandlerEntry {
    hash: u64,
    name: Cow<'static, str>,
    handler: MessageHandler,
    stats: HandlerStats,
}

impl HandlerEntry {
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the name was allocated for this registration and is released
    /// with the table, as opposed to pointing at static text.
    pub fn must_free(&self) -> bool {
        matches!(self.name, Cow::Owned(_))
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }
}

/// Summary of one handler's recorded calls.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerReport {
    pub id: MessageId,
    pub name: String,
    pub count: u64,
    pub average: f64,
    pub stddev: f64,
    pub min: u64,
    pub max: u64,
}

impl HandlerReport {
    fn new(id: MessageId, name: &str, snap: &StatsSnapshot) -> Self {
        Self {
            id,
            name: name.to_string(),
            count: snap.count,
            average: snap.average(),
            stddev: snap.stddev(),
            min: snap.min,
            max: snap.max,
        }
    }
}

impl fmt::Display for HandlerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler {:x}: {} count={} avg={} dev={} min={} max={}",
            self.id, self.name, self.count, self.average, self.stddev, self.min, self.max
        )
    }
}

/// Sorted, immutable map from [`MessageId`] to handler.
pub struct HandlerTable {
    handlers: Vec<HandlerEntry>,
    config: Arc<ConfigManager<ActiveMessageConfig>>,
    epoch: Instant,
}

impl HandlerTable {
    /// Freeze `registry` into a table.
    ///
    /// Must run before any message is sent or received. The root node logs
    /// the resulting id assignment; other nodes compute the same one.
    ///
    /// # Panics
    ///
    /// If the same handler is registered twice, or if there are more
    /// handlers than message ids.
    pub fn construct(
        registry: HandlerRegistry,
        my_node: NodeId,
        config: Arc<ConfigManager<ActiveMessageConfig>>,
    ) -> Self {
        let mut handlers: Vec<HandlerEntry> = registry
            .pending
            .into_iter()
            .map(|reg| HandlerEntry {
                hash: reg.hash,
                name: reg.name,
                handler: reg.handler,
                stats: HandlerStats::new(),
            })
            .collect();

        // name breaks hash ties so the order stays total on every node
        handlers.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.name.cmp(&b.name)));

        for pair in handlers.windows(2) {
            assert!(
                pair[0].hash != pair[1].hash || pair[0].name != pair[1].name,
                "handler {} registered twice",
                pair[0].name
            );
        }
        assert!(
            handlers.len() <= u16::MAX as usize + 1,
            "{} handlers exceed the message id space",
            handlers.len()
        );

        if my_node.is_root() {
            for (i, entry) in handlers.iter().enumerate() {
                tracing::info!(target: AMHANDLER_TARGET, "handler {:x}: {}", i, entry.name);
            }
        }
        tracing::debug!(count = handlers.len(), "active message handler table built");

        Self {
            handlers,
            config,
            epoch: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn entries(&self) -> &[HandlerEntry] {
        &self.handlers
    }

    fn entry(&self, id: MessageId) -> &HandlerEntry {
        assert!(
            id.index() < self.handlers.len(),
            "message id {:x} out of range ({} handlers): peers disagree on the handler set or the message is corrupt",
            id,
            self.handlers.len()
        );
        &self.handlers[id.index()]
    }

    /// # Panics
    ///
    /// If `id` is not below [`len`](Self::len).
    pub fn lookup_handler(&self, id: MessageId) -> &MessageHandler {
        &self.entry(id).handler
    }

    /// # Panics
    ///
    /// If `id` is not below [`len`](Self::len).
    pub fn lookup_name(&self, id: MessageId) -> &str {
        &self.entry(id).name
    }

    /// Id assigned to the handler registered under `name`.
    pub fn lookup_id(&self, name: &str) -> Option<MessageId> {
        self.handlers
            .iter()
            .position(|e| e.name == name)
            .map(|i| MessageId(i as u16))
    }

    pub fn profiling_enabled(&self) -> bool {
        self.config.get().profile_handlers
    }

    /// Add one call to the handler's statistics. Callers check
    /// [`profiling_enabled`](Self::profiling_enabled) first.
    pub fn record_call(&self, id: MessageId, start: i64, end: i64) {
        self.entry(id).stats.record(start, end);
    }

    /// Run the handler for an incoming message, timing it when profiling is
    /// on.
    pub fn dispatch(&self, id: MessageId, sender: NodeId, header: &[u8], payload: &[u8]) {
        let entry = self.entry(id);
        if !self.profiling_enabled() {
            (entry.handler)(sender, header, payload);
            return;
        }
        let start = self.now_nanos();
        (entry.handler)(sender, header, payload);
        let end = self.now_nanos();
        entry.stats.record(start, end);
    }

    /// Log and return a summary for every handler that was called, if
    /// profiling is on. Returns nothing otherwise.
    pub fn report_stats(&self) -> Vec<HandlerReport> {
        if !self.profiling_enabled() {
            return Vec::new();
        }
        let mut reports = Vec::new();
        for (i, entry) in self.handlers.iter().enumerate() {
            let snap = entry.stats.snapshot();
            if snap.count == 0 {
                continue;
            }
            let report = HandlerReport::new(MessageId(i as u16), &entry.name, &snap);
            tracing::info!(target: AMHANDLER_TARGET, "{}", report);
            reports.push(report);
        }
        reports
    }

    fn now_nanos(&self) -> i64 {
        i64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|e| e.name.as_ref()))
            .finish()
    }
}
