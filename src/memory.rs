//! # In-Memory Host
//!
//! [`MemoryHost`] owns every device stack, driver registration and
//! notification subscription in one registry object. It is constructed once,
//! passed by reference to everything that needs it and dropped at the end;
//! there is no global state.
//!
//! ## Test Controls
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`add_terminal_driver`](MemoryHost::add_terminal_driver) | Registers a driver that completes every request |
//! | [`keep_initializing`](MemoryHost::keep_initializing) | Makes a node reject attachment for N attempts or forever |
//! | [`fail_enumeration`](MemoryHost::fail_enumeration) | Makes enumeration of a driver fail |
//! | [`activate_class`](MemoryHost::activate_class) / [`deactivate_class`](MemoryHost::deactivate_class) | Delivers resource-class notifications |
//! | [`elapsed`](MemoryHost::elapsed) | Sum of all [`delay`](DeviceHost::delay) calls |
//! | [`outstanding_references`](MemoryHost::outstanding_references) | References not yet dropped |
//!
//! `delay` advances a simulated clock instead of sleeping, so retry
//! schedules are observable without waiting for them.
//!
//! ## Locking
//!
//! The registry sits behind one `RwLock`. It is never held while a driver
//! runs: drivers call straight back into the host.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use log::{debug, warn};

use crate::{
    Characteristics, DeviceHost, DeviceType, Driver, DriverId, FilterError, NodeFlags, NodeId,
    NodeInfo, Request, Status,
};

/// How long a node keeps rejecting attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    Attempts(u32),
    Forever,
}

#[derive(Debug)]
struct NodeEntry {
    info: NodeInfo,
    /// Node directly below.
    attached_to: Option<NodeId>,
    /// Node directly above.
    attached_device: Option<NodeId>,
    references: usize,
    deleted: bool,
    hold: Option<Hold>,
}

#[derive(Default)]
struct Registry {
    drivers: HashMap<DriverId, Arc<dyn Driver>>,
    nodes: BTreeMap<NodeId, NodeEntry>,
    next_id: u64,
    subscribers: Vec<DriverId>,
    active_classes: BTreeSet<NodeId>,
    failing_enumeration: HashSet<DriverId>,
    attach_attempts: u64,
}

impl Registry {
    fn live(&self, node: NodeId) -> Result<&NodeEntry, FilterError> {
        match self.nodes.get(&node) {
            Some(entry) if !entry.deleted => Ok(entry),
            _ => Err(FilterError::NodeNotFound { node }),
        }
    }

    fn live_mut(&mut self, node: NodeId) -> Result<&mut NodeEntry, FilterError> {
        match self.nodes.get_mut(&node) {
            Some(entry) if !entry.deleted => Ok(entry),
            _ => Err(FilterError::NodeNotFound { node }),
        }
    }

    fn top_of(&self, node: NodeId) -> NodeId {
        let mut top = node;
        while let Some(above) = self.nodes.get(&top).and_then(|e| e.attached_device) {
            top = above;
        }
        top
    }

    fn unlink_above(&mut self, lower: NodeId) -> Option<NodeId> {
        let upper = self.nodes.get_mut(&lower)?.attached_device.take()?;
        if let Some(entry) = self.nodes.get_mut(&upper) {
            entry.attached_to = None;
        }
        Some(upper)
    }

    /// Drop a deleted node once nothing references it.
    fn reap(&mut self, node: NodeId) {
        let reapable = self
            .nodes
            .get(&node)
            .is_some_and(|e| e.deleted && e.references == 0);
        if !reapable {
            return;
        }
        self.unlink_above(node);
        if let Some(lower) = self.nodes.get(&node).and_then(|e| e.attached_to) {
            self.unlink_above(lower);
        }
        self.nodes.remove(&node);
    }

    fn subscribed_drivers(&self) -> Vec<Arc<dyn Driver>> {
        self.subscribers
            .iter()
            .filter_map(|id| self.drivers.get(id).cloned())
            .collect()
    }
}

/// Completes every request it receives with [`Status::Success`].
struct TerminalDriver;

impl Driver for TerminalDriver {
    fn dispatch(&self, _host: &dyn DeviceHost, _node: NodeId, mut request: Request) -> Status {
        request.complete(Status::Success, 0)
    }
}

/// In-process device registry implementing [`DeviceHost`].
///
/// # Example
///
/// ```rust
/// use stackfilter::{Characteristics, DeviceHost, DeviceType, DriverId, MemoryHost, NodeFlags};
///
/// let host = MemoryHost::new();
/// let disk = DriverId::new("Disk");
/// host.add_terminal_driver(&disk);
///
/// let lower = host
///     .create_node(&disk, DeviceType::Disk, NodeFlags::empty(), Characteristics::empty())
///     .unwrap();
/// let upper = host
///     .create_node(&disk, DeviceType::Disk, NodeFlags::empty(), Characteristics::empty())
///     .unwrap();
/// assert_eq!(host.attach(upper, lower).unwrap(), lower);
/// ```
pub struct MemoryHost {
    registry: RwLock<Registry>,
    elapsed: Mutex<Duration>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.read();
        f.debug_struct("MemoryHost")
            .field("drivers", &registry.drivers.len())
            .field("nodes", &registry.nodes.len())
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

impl MemoryHost {
    /// An empty host.
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry {
                next_id: 1,
                ..Registry::default()
            }),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `id` as a driver that completes every request immediately.
    ///
    /// Does nothing if `id` is already registered.
    pub fn add_terminal_driver(&self, id: &DriverId) {
        self.write()
            .drivers
            .entry(id.clone())
            .or_insert_with(|| Arc::new(TerminalDriver));
    }

    /// Make `node` reject attachment above it.
    ///
    /// With `Some(n)` the next `n` attempts fail and the node becomes ready
    /// afterwards; with `None` it never becomes ready.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NodeNotFound`] if the node does not exist
    pub fn keep_initializing(&self, node: NodeId, attempts: Option<u32>) -> Result<(), FilterError> {
        let mut registry = self.write();
        let entry = registry.live_mut(node)?;
        match attempts {
            Some(0) => {
                entry.info.flags.remove(NodeFlags::DEVICE_INITIALIZING);
                entry.hold = None;
            }
            Some(n) => {
                entry.info.flags.insert(NodeFlags::DEVICE_INITIALIZING);
                entry.hold = Some(Hold::Attempts(n));
            }
            None => {
                entry.info.flags.insert(NodeFlags::DEVICE_INITIALIZING);
                entry.hold = Some(Hold::Forever);
            }
        }
        Ok(())
    }

    /// Make enumeration of `driver` fail (or succeed again).
    pub fn fail_enumeration(&self, driver: &DriverId, fail: bool) {
        let mut registry = self.write();
        if fail {
            registry.failing_enumeration.insert(driver.clone());
        } else {
            registry.failing_enumeration.remove(driver);
        }
    }

    /// Announce that the resource class behind `control` became active.
    ///
    /// Every subscribed driver is told; the errors they report are returned.
    pub fn activate_class(&self, control: NodeId) -> Vec<FilterError> {
        self.notify_class(control, true)
    }

    /// Announce that the resource class behind `control` went away.
    pub fn deactivate_class(&self, control: NodeId) -> Vec<FilterError> {
        self.notify_class(control, false)
    }

    fn notify_class(&self, control: NodeId, active: bool) -> Vec<FilterError> {
        let drivers = {
            let mut registry = self.write();
            if active {
                registry.active_classes.insert(control);
            } else {
                registry.active_classes.remove(&control);
            }
            registry.subscribed_drivers()
        };
        debug!("class {control} active={active}, notifying {} driver(s)", drivers.len());
        drivers
            .into_iter()
            .filter_map(|driver| driver.resource_class_changed(self, control, active).err())
            .collect()
    }

    /// Total simulated time spent in [`delay`](DeviceHost::delay).
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// References taken and not yet dropped, across all nodes.
    pub fn outstanding_references(&self) -> usize {
        self.read().nodes.values().map(|e| e.references).sum()
    }

    /// Number of [`attach`](DeviceHost::attach) calls made so far.
    pub fn attach_attempts(&self) -> u64 {
        self.read().attach_attempts
    }

    /// Number of live nodes owned by `driver`.
    pub fn node_count(&self, driver: &DriverId) -> usize {
        self.read()
            .nodes
            .values()
            .filter(|e| !e.deleted && &e.info.owner == driver)
            .count()
    }
}

impl DeviceHost for MemoryHost {
    fn register_driver(&self, id: DriverId, driver: Arc<dyn Driver>) -> Result<(), FilterError> {
        let mut registry = self.write();
        if registry.drivers.contains_key(&id) {
            return Err(FilterError::DriverAlreadyRegistered { driver: id });
        }
        registry.drivers.insert(id, driver);
        Ok(())
    }

    fn unregister_driver(&self, id: &DriverId) {
        let mut registry = self.write();
        registry.drivers.remove(id);
        registry.subscribers.retain(|s| s != id);
    }

    fn driver(&self, id: &DriverId) -> Option<Arc<dyn Driver>> {
        self.read().drivers.get(id).cloned()
    }

    fn driver_of(&self, node: NodeId) -> Option<Arc<dyn Driver>> {
        let registry = self.read();
        let owner = &registry.nodes.get(&node)?.info.owner;
        registry.drivers.get(owner).cloned()
    }

    fn node_info(&self, node: NodeId) -> Result<NodeInfo, FilterError> {
        self.read().live(node).map(|e| e.info.clone())
    }

    fn create_node(
        &self,
        owner: &DriverId,
        device_type: DeviceType,
        flags: NodeFlags,
        characteristics: Characteristics,
    ) -> Result<NodeId, FilterError> {
        let mut registry = self.write();
        if !registry.drivers.contains_key(owner) {
            return Err(FilterError::DriverNotFound {
                driver: owner.clone(),
            });
        }
        let id = NodeId(registry.next_id);
        registry.next_id += 1;
        registry.nodes.insert(
            id,
            NodeEntry {
                info: NodeInfo {
                    id,
                    owner: owner.clone(),
                    device_type,
                    flags,
                    characteristics,
                },
                attached_to: None,
                attached_device: None,
                references: 0,
                deleted: false,
                hold: None,
            },
        );
        Ok(id)
    }

    fn clear_flags(&self, node: NodeId, flags: NodeFlags) -> Result<(), FilterError> {
        let mut registry = self.write();
        let entry = registry.live_mut(node)?;
        entry.info.flags.remove(flags);
        if flags.contains(NodeFlags::DEVICE_INITIALIZING) {
            entry.hold = None;
        }
        Ok(())
    }

    fn release(&self, node: NodeId) {
        // whoever sits above a vanishing node hears about it first
        let upper = {
            let registry = self.read();
            registry
                .nodes
                .get(&node)
                .filter(|e| !e.deleted)
                .and_then(|e| e.attached_device)
                .and_then(|upper| {
                    let owner = &registry.nodes.get(&upper)?.info.owner;
                    Some((upper, registry.drivers.get(owner)?.clone()))
                })
        };
        if let Some((upper, driver)) = upper {
            debug!("{node} released under {upper}, notifying its owner");
            driver.fast_io_detach_device(self, upper, node);
        }

        let mut registry = self.write();
        if let Some(entry) = registry.nodes.get_mut(&node) {
            entry.deleted = true;
        }
        registry.reap(node);
    }

    fn attach(&self, node: NodeId, target: NodeId) -> Result<NodeId, FilterError> {
        let mut registry = self.write();
        registry.attach_attempts += 1;

        let entry = registry.live(node)?;
        if let Some(lower) = entry.attached_to {
            return Err(FilterError::AlreadyAttached { node, target: lower });
        }
        if entry.attached_device.is_some() {
            return Err(FilterError::Host(format!("{node} already has a node above it")));
        }
        registry.live(target)?;

        let top = registry.top_of(target);
        if top == node {
            return Err(FilterError::AlreadyAttached { node, target });
        }
        let top_entry = registry.live_mut(top)?;
        if top_entry.info.is_initializing() {
            match top_entry.hold {
                Some(Hold::Attempts(n)) if n <= 1 => {
                    top_entry.hold = None;
                    top_entry.info.flags.remove(NodeFlags::DEVICE_INITIALIZING);
                }
                Some(Hold::Attempts(n)) => top_entry.hold = Some(Hold::Attempts(n - 1)),
                Some(Hold::Forever) | None => {}
            }
            return Err(FilterError::TargetInitializing { target: top });
        }

        top_entry.attached_device = Some(node);
        if let Some(entry) = registry.nodes.get_mut(&node) {
            entry.attached_to = Some(top);
        }
        Ok(top)
    }

    fn detach(&self, lower: NodeId) {
        let mut registry = self.write();
        match registry.unlink_above(lower) {
            Some(upper) => {
                debug!("detached {upper} from {lower}");
                registry.reap(upper);
            }
            None => warn!("detach on {lower}: nothing attached above it"),
        }
    }

    fn reference_top(&self, node: NodeId) -> Result<NodeId, FilterError> {
        let mut registry = self.write();
        registry.live(node)?;
        let top = registry.top_of(node);
        if let Some(entry) = registry.nodes.get_mut(&top) {
            entry.references += 1;
        }
        Ok(top)
    }

    fn reference_lower(&self, node: NodeId) -> Option<NodeId> {
        let mut registry = self.write();
        let lower = registry.nodes.get(&node)?.attached_to?;
        registry.nodes.get_mut(&lower)?.references += 1;
        Some(lower)
    }

    fn dereference(&self, node: NodeId) {
        let mut registry = self.write();
        match registry.nodes.get_mut(&node) {
            Some(entry) if entry.references > 0 => entry.references -= 1,
            _ => {
                warn!("dereference of {node} without a reference");
                return;
            }
        }
        registry.reap(node);
    }

    fn enumerate(&self, driver: &DriverId, buffer: &mut [NodeId]) -> Result<usize, FilterError> {
        let mut registry = self.write();
        if registry.failing_enumeration.contains(driver) {
            return Err(FilterError::EnumerationFailed {
                driver: driver.clone(),
                reason: "injected failure".into(),
            });
        }
        let owned: Vec<NodeId> = registry
            .nodes
            .values()
            .filter(|e| !e.deleted && &e.info.owner == driver)
            .map(|e| e.info.id)
            .collect();
        for (slot, id) in buffer.iter_mut().zip(&owned) {
            *slot = *id;
            if let Some(entry) = registry.nodes.get_mut(id) {
                entry.references += 1;
            }
        }
        Ok(owned.len())
    }

    fn register_resource_notification(&self, driver: &DriverId) -> Result<(), FilterError> {
        let (subscriber, active) = {
            let mut registry = self.write();
            let Some(subscriber) = registry.drivers.get(driver).cloned() else {
                return Err(FilterError::DriverNotFound {
                    driver: driver.clone(),
                });
            };
            if !registry.subscribers.contains(driver) {
                registry.subscribers.push(driver.clone());
            }
            let active: Vec<NodeId> = registry.active_classes.iter().copied().collect();
            (subscriber, active)
        };
        // classes that are already up are announced right away
        for control in active {
            if let Err(err) = subscriber.resource_class_changed(self, control, true) {
                warn!("{driver} failed to handle existing class {control}: {err}");
            }
        }
        Ok(())
    }

    fn unregister_resource_notification(&self, driver: &DriverId) {
        self.write().subscribers.retain(|s| s != driver);
    }

    fn call(&self, target: NodeId, mut request: Request) -> Status {
        let driver = self.driver_of(target);
        request.enter(target);
        match driver {
            Some(driver) => driver.dispatch(self, target, request),
            None => {
                debug!("no driver for {target}, failing {:?}", request.major());
                request.complete(Status::InvalidDeviceRequest, 0)
            }
        }
    }

    fn delay(&self, interval: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(PoisonError::into_inner);
        *elapsed += interval;
    }
}
