//! The host side of a device stack.
//!
//! This module provides the [`DeviceHost`] trait: the primitives a filter
//! consumes from whoever owns the device stacks, plus [`NodeRef`], a counted
//! reference that releases itself.
//!
//! # Overview
//!
//! | Concern | Primitives |
//! |---------|------------|
//! | Drivers | `register_driver`, `unregister_driver`, `driver`, `driver_of` |
//! | Nodes | `node_info`, `create_node`, `clear_flags`, `release` |
//! | Chains | `attach`, `detach`, `reference_top`, `reference_lower`, `dereference` |
//! | Enumeration | `enumerate` |
//! | Notifications | `register_resource_notification`, `unregister_resource_notification` |
//! | Requests | `call` |
//! | Time | `delay` |
//!
//! # Thread Safety
//!
//! `DeviceHost` requires `Send + Sync` and takes `&self` everywhere. Hosts
//! must not hold internal locks while calling into a driver: drivers call
//! back into the host from their dispatch routines.

use std::sync::Arc;
use std::time::Duration;

use crate::{
    Characteristics, DeviceType, DriverId, Driver, FilterError, NodeFlags, NodeId, NodeInfo,
    Request, Status,
};

/// Primitives consumed from the owner of the device stacks.
pub trait DeviceHost: Send + Sync {
    /// Register a driver under `id`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::DriverAlreadyRegistered`] if `id` is taken
    fn register_driver(&self, id: DriverId, driver: Arc<dyn Driver>) -> Result<(), FilterError>;

    /// Forget a driver. Its nodes stay until released.
    fn unregister_driver(&self, id: &DriverId);

    /// Look up a registered driver.
    fn driver(&self, id: &DriverId) -> Option<Arc<dyn Driver>>;

    /// The driver owning `node`.
    fn driver_of(&self, node: NodeId) -> Option<Arc<dyn Driver>>;

    /// Attributes of `node`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NodeNotFound`] if the node does not exist
    fn node_info(&self, node: NodeId) -> Result<NodeInfo, FilterError>;

    /// Create a detached node owned by `owner`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::DriverNotFound`] if `owner` is not registered
    fn create_node(
        &self,
        owner: &DriverId,
        device_type: DeviceType,
        flags: NodeFlags,
        characteristics: Characteristics,
    ) -> Result<NodeId, FilterError>;

    /// Clear flags on `node`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NodeNotFound`] if the node does not exist
    fn clear_flags(&self, node: NodeId, flags: NodeFlags) -> Result<(), FilterError>;

    /// Delete `node`. The node disappears once its last reference is dropped.
    fn release(&self, node: NodeId);

    /// Insert `node` on top of the stack containing `target`.
    ///
    /// Returns the node `node` now sits directly above, which may be higher
    /// than `target` if others attached first.
    ///
    /// # Errors
    ///
    /// - [`FilterError::TargetInitializing`] if the stack top is not ready yet
    /// - [`FilterError::AlreadyAttached`] if `node` is already in a stack
    /// - [`FilterError::NodeNotFound`] if either node does not exist
    fn attach(&self, node: NodeId, target: NodeId) -> Result<NodeId, FilterError>;

    /// Unbind whatever node is attached directly above `lower`.
    fn detach(&self, lower: NodeId);

    /// Reference the top node of the stack containing `node`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NodeNotFound`] if the node does not exist
    fn reference_top(&self, node: NodeId) -> Result<NodeId, FilterError>;

    /// Reference the node directly below `node`, if any.
    fn reference_lower(&self, node: NodeId) -> Option<NodeId>;

    /// Drop a reference taken by `reference_*` or `enumerate`.
    fn dereference(&self, node: NodeId);

    /// List the nodes owned by `driver`.
    ///
    /// Writes at most `buffer.len()` referenced ids and returns the total
    /// number of nodes the driver owns, which may exceed the buffer.
    ///
    /// # Errors
    ///
    /// - [`FilterError::EnumerationFailed`] if the list cannot be produced
    fn enumerate(&self, driver: &DriverId, buffer: &mut [NodeId]) -> Result<usize, FilterError>;

    /// Subscribe `driver` to resource-class activation changes.
    ///
    /// # Errors
    ///
    /// - [`FilterError::DriverNotFound`] if `driver` is not registered
    fn register_resource_notification(&self, driver: &DriverId) -> Result<(), FilterError>;

    /// Unsubscribe `driver` from resource-class activation changes.
    fn unregister_resource_notification(&self, driver: &DriverId);

    /// Hand `request` to the driver owning `target`.
    fn call(&self, target: NodeId, request: Request) -> Status;

    /// Block the caller for `interval`.
    fn delay(&self, interval: Duration);
}

/// A counted reference to a node, dropped when the guard goes out of scope.
///
/// Wraps ids returned by [`DeviceHost::reference_top`],
/// [`DeviceHost::reference_lower`] and [`DeviceHost::enumerate`].
pub struct NodeRef<'h, H: DeviceHost + ?Sized> {
    host: &'h H,
    node: NodeId,
}

impl<'h, H: DeviceHost + ?Sized> NodeRef<'h, H> {
    /// Take over an already-counted reference to `node`.
    pub fn adopt(host: &'h H, node: NodeId) -> Self {
        Self { host, node }
    }

    /// The referenced node.
    #[inline]
    pub fn id(&self) -> NodeId {
        self.node
    }
}

impl<H: DeviceHost + ?Sized> Drop for NodeRef<'_, H> {
    fn drop(&mut self) {
        self.host.dereference(self.node);
    }
}

impl<H: DeviceHost + ?Sized> std::fmt::Debug for NodeRef<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeRef").field(&self.node).finish()
    }
}
