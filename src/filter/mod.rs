//! # Stack Filter
//!
//! The filter driver: creates filter nodes above resources, routes every
//! request and fast-path call that reaches them, and tears them all down.
//!
//! ## Lifecycle
//!
//! ```text
//! new ──▶ load ──▶ Active ──unload──▶ Draining ──▶ Released
//!                    │
//!                    ├── attach_to_resource / attach_to_class (notifications)
//!                    └── dispatch / fast_io (host threads)
//! ```
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `attach` | node creation, bounded-retry insertion, class enumeration, detach by identity |
//! | `dispatch` | request path: open logging, keyboard read instrumentation, pass-through |
//! | `fast_path` | capability-probed fast-path forwarding and the detach hook |
//! | `teardown` | unload: notification removal, enumerate-and-detach loop |
//!
//! The filter never stores the host. Every operation takes it as a
//! `&dyn DeviceHost` argument, and the host keeps the filter alive through
//! its driver registration.

mod attach;
mod dispatch;
mod fast_path;
mod node;
mod teardown;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::info;

use crate::{
    Characteristics, DeviceHost, Driver, DriverId, FilterConfig, FilterError, NodeFlags, NodeId,
    NodeRef, QuiesceCounter,
};

pub use attach::ClassAttachReport;
pub use node::FilterNode;
pub use teardown::TeardownReport;

/// Lifecycle state of a [`StackFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterState {
    /// Accepting notifications and attachments.
    Active,
    /// Unloading: no new attachments, nodes being detached.
    Draining,
    /// All nodes released.
    Released,
}

impl FilterState {
    /// Lower-case name used in errors and logs.
    pub const fn name(self) -> &'static str {
        match self {
            FilterState::Active => "active",
            FilterState::Draining => "draining",
            FilterState::Released => "released",
        }
    }
}

impl fmt::Display for FilterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A filter driver owning at most one node per device stack.
///
/// # Example
///
/// ```rust
/// use stackfilter::{
///     Characteristics, DeviceHost, DeviceType, DriverId, FilterConfig, MemoryHost, NodeFlags,
///     StackFilter,
/// };
///
/// let host = MemoryHost::new();
/// let kbd = DriverId::new("Kbd");
/// host.add_terminal_driver(&kbd);
/// let keyboard = host
///     .create_node(&kbd, DeviceType::Keyboard, NodeFlags::BUFFERED_IO, Characteristics::empty())
///     .unwrap();
///
/// let filter = StackFilter::new(FilterConfig::default().with_name("KbdSpy")).unwrap();
/// filter.load(&host).unwrap();
///
/// let node = filter.attach_to_resource(&host, keyboard).unwrap();
/// assert!(filter.is_attached(&host, keyboard));
/// assert_eq!(filter.attached_nodes(), vec![node]);
///
/// filter.unload(&host).unwrap();
/// assert!(!filter.is_attached(&host, keyboard));
/// ```
pub struct StackFilter {
    id: DriverId,
    config: FilterConfig,
    nodes: RwLock<HashMap<NodeId, FilterNode>>,
    pending: Arc<QuiesceCounter>,
    state: Mutex<FilterState>,
}

impl StackFilter {
    /// Create a filter from a validated configuration.
    ///
    /// # Errors
    ///
    /// - [`FilterError::Config`] if the configuration is invalid
    pub fn new(config: FilterConfig) -> Result<Arc<Self>, FilterError> {
        config.validate()?;
        Ok(Arc::new(Self {
            id: DriverId::new(config.name.clone()),
            config,
            nodes: RwLock::new(HashMap::new()),
            pending: Arc::new(QuiesceCounter::new()),
            state: Mutex::new(FilterState::Active),
        }))
    }

    /// Register the filter with `host` and, if configured, subscribe to
    /// resource-class notifications.
    ///
    /// Classes that are already active are announced during this call and
    /// attached to before it returns.
    ///
    /// # Errors
    ///
    /// - [`FilterError::DriverAlreadyRegistered`] if the name is taken
    /// - [`FilterError::NotActive`] if the filter was unloaded
    pub fn load(self: &Arc<Self>, host: &dyn DeviceHost) -> Result<(), FilterError> {
        self.ensure_active()?;
        host.register_driver(self.id.clone(), Arc::clone(self) as Arc<dyn Driver>)?;
        if self.config.watch_resource_classes {
            if let Err(err) = host.register_resource_notification(&self.id) {
                host.unregister_driver(&self.id);
                return Err(err);
            }
        }
        info!("{} loaded", self.id);
        Ok(())
    }

    /// The driver identity owning every filter node.
    #[inline]
    pub fn id(&self) -> &DriverId {
        &self.id
    }

    /// The active configuration.
    #[inline]
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> FilterState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests forwarded with a completion routine still outstanding.
    pub fn pending(&self) -> usize {
        self.pending.pending()
    }

    /// The shared in-flight counter.
    pub fn quiesce_counter(&self) -> &Arc<QuiesceCounter> {
        &self.pending
    }

    /// Nodes currently attached by this filter, in id order.
    pub fn attached_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.read_nodes().keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// The bookkeeping of one of our nodes.
    pub fn node(&self, node: NodeId) -> Option<FilterNode> {
        self.read_nodes().get(&node).cloned()
    }

    /// Resolve one of our nodes from host state alone, with a counted
    /// reference on the node below it.
    ///
    /// The request and fast paths route through this and never touch the
    /// node table.
    fn route<'h>(
        &self,
        host: &'h dyn DeviceHost,
        node: NodeId,
    ) -> Option<(FilterNode, NodeRef<'h, dyn DeviceHost + 'h>)> {
        let info = host.node_info(node).ok().filter(|info| info.owner == self.id)?;
        let lower = NodeRef::adopt(host, host.reference_lower(node)?);
        let routed = FilterNode {
            id: node,
            lower: lower.id(),
            device_type: info.device_type,
            flags: info.flags & NodeFlags::MIRRORED,
            characteristics: info.characteristics & Characteristics::MIRRORED,
        };
        Some((routed, lower))
    }

    fn ensure_active(&self) -> Result<(), FilterError> {
        match self.state() {
            FilterState::Active => Ok(()),
            state => Err(FilterError::NotActive { state: state.name() }),
        }
    }

    fn set_state(&self, state: FilterState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NodeId, FilterNode>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NodeId, FilterNode>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for StackFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackFilter")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("nodes", &self.read_nodes().len())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryHost;

    #[test]
    fn new_rejects_invalid_config() {
        let err = StackFilter::new(FilterConfig::default().with_attach_attempts(0)).unwrap_err();
        assert!(matches!(err, FilterError::Config(_)));
    }

    #[test]
    fn load_registers_driver_once() {
        let host = MemoryHost::new();
        let filter = StackFilter::new(FilterConfig::default()).unwrap();
        filter.load(&host).unwrap();
        assert!(host.driver(filter.id()).is_some());

        let err = filter.load(&host).unwrap_err();
        assert!(matches!(err, FilterError::DriverAlreadyRegistered { .. }));
    }

    #[test]
    fn state_names() {
        assert_eq!(FilterState::Active.to_string(), "active");
        assert_eq!(FilterState::Draining.name(), "draining");
        assert_eq!(FilterState::Released.name(), "released");
    }

    #[test]
    fn fresh_filter_is_active_and_empty() {
        let filter = StackFilter::new(FilterConfig::default()).unwrap();
        assert_eq!(filter.state(), FilterState::Active);
        assert_eq!(filter.pending(), 0);
        assert!(filter.attached_nodes().is_empty());
    }
}
