//! Attachment: node creation, bounded-retry insertion, class enumeration and
//! detach by identity.

use log::{debug, info, warn};

use super::{FilterNode, StackFilter};
use crate::{
    Characteristics, DeviceHost, DeviceHostExt, EnumerationBuffer, FilterError, NodeFlags, NodeId,
    NodeRef,
};

/// Outcome of one class enumeration pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassAttachReport {
    /// Members the host reported.
    pub total: usize,
    /// Members examined (`total` clamped to the enumeration capacity).
    pub examined: usize,
    /// New filter nodes created.
    pub attached: usize,
    /// Members passed over: the control node, foreign device types, stacks
    /// already filtered.
    pub skipped: usize,
    /// Members whose attachment failed.
    pub failed: usize,
}

impl StackFilter {
    /// Attach a filter node above `target`.
    ///
    /// Returns the existing node if the stack already carries one of ours.
    /// Otherwise a new node mirroring the target's transfer flags and
    /// characteristics is created and inserted, retrying while the stack top
    /// is still initializing.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NotActive`] once unloading started
    /// - [`FilterError::NodeNotFound`] if `target` does not exist
    /// - [`FilterError::AttachFailed`] if every insertion attempt failed
    pub fn attach_to_resource(
        &self,
        host: &dyn DeviceHost,
        target: NodeId,
    ) -> Result<NodeId, FilterError> {
        self.ensure_active()?;
        if let Some(existing) = self.find_attached(host, target) {
            debug!("{target} already filtered by {existing}");
            return Ok(existing);
        }
        self.attach_new(host, target)
    }

    fn attach_new(&self, host: &dyn DeviceHost, target: NodeId) -> Result<NodeId, FilterError> {
        let info = host.node_info(target)?;
        let node = host.create_node(
            &self.id,
            info.device_type,
            (info.flags & NodeFlags::MIRRORED) | NodeFlags::DEVICE_INITIALIZING,
            info.characteristics & Characteristics::MIRRORED,
        )?;

        let attempts = self.config.attach_attempts;
        for attempt in 1..=attempts {
            match host.attach(node, target) {
                Ok(lower) => {
                    if let Err(err) = host.clear_flags(node, NodeFlags::DEVICE_INITIALIZING) {
                        warn!("{node} attached above {lower} but stayed initializing: {err}");
                        host.detach(lower);
                        host.release(node);
                        return Err(err);
                    }
                    self.write_nodes().insert(
                        node,
                        FilterNode {
                            id: node,
                            lower,
                            device_type: info.device_type,
                            flags: info.flags & NodeFlags::MIRRORED,
                            characteristics: info.characteristics & Characteristics::MIRRORED,
                        },
                    );
                    info!("attached {node} above {lower} (target {target}, attempt {attempt})");
                    return Ok(node);
                }
                Err(err) if err.is_transient() => {
                    debug!("attach {node} to {target}, attempt {attempt}/{attempts}: {err}");
                    host.delay(self.config.attach_retry_delay);
                }
                Err(err) => {
                    host.release(node);
                    return Err(err);
                }
            }
        }

        host.release(node);
        warn!("giving up on {target} after {attempts} attempts");
        Err(FilterError::AttachFailed { target, attempts })
    }

    /// Our node in the stack containing `target`, if any.
    ///
    /// Walks the stack from its top, holding a reference only on the node
    /// being inspected.
    pub fn find_attached(&self, host: &dyn DeviceHost, target: NodeId) -> Option<NodeId> {
        let top = host.reference_top(target).ok()?;
        let mut current = Some(NodeRef::adopt(host, top));
        while let Some(visited) = current {
            if host.is_owned_by(visited.id(), &self.id) {
                return Some(visited.id());
            }
            current = host
                .reference_lower(visited.id())
                .map(|lower| NodeRef::adopt(host, lower));
        }
        None
    }

    /// Returns `true` if the stack containing `target` carries one of our nodes.
    pub fn is_attached(&self, host: &dyn DeviceHost, target: NodeId) -> bool {
        self.find_attached(host, target).is_some()
    }

    /// Attach to every existing member of the class behind `control`.
    ///
    /// Lists the nodes of the control node's driver and attaches to each one
    /// that is not the control node, has the control node's device type and
    /// is not filtered yet. A member that fails to attach is logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NotActive`] once unloading started
    /// - [`FilterError::NodeNotFound`] if `control` does not exist
    /// - [`FilterError::EnumerationFailed`] if the member list cannot be read
    pub fn enumerate_and_attach(
        &self,
        host: &dyn DeviceHost,
        control: NodeId,
    ) -> Result<ClassAttachReport, FilterError> {
        self.ensure_active()?;
        let class = host.node_info(control)?;

        let mut buffer = EnumerationBuffer::new();
        let members = buffer.fill(host, &class.owner)?;
        if members.was_clamped() {
            debug!(
                "{} reported {} members, examining the first {}",
                class.owner,
                members.total(),
                members.len()
            );
        }

        let mut report = ClassAttachReport {
            total: members.total(),
            examined: members.len(),
            ..ClassAttachReport::default()
        };
        for member in members.iter() {
            let eligible = member != control
                && host
                    .node_info(member)
                    .is_ok_and(|info| info.device_type == class.device_type)
                && !self.is_attached(host, member);
            if !eligible {
                report.skipped += 1;
                continue;
            }
            match self.attach_new(host, member) {
                Ok(_) => report.attached += 1,
                Err(err) => {
                    warn!("skipping {member} of {}: {err}", class.owner);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Attach to a resource class control node and all of its members.
    ///
    /// A class whose control node already carries one of our nodes is left
    /// as it is and reports nothing. If the members cannot be listed, the
    /// control node attached by this call is detached again.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NotActive`] once unloading started
    /// - [`FilterError::AttachFailed`] if the control node cannot be attached
    /// - [`FilterError::EnumerationFailed`] if the member list cannot be read
    pub fn attach_to_class(
        &self,
        host: &dyn DeviceHost,
        control: NodeId,
    ) -> Result<ClassAttachReport, FilterError> {
        self.ensure_active()?;
        if let Some(existing) = self.find_attached(host, control) {
            debug!("class {control} already filtered by {existing}");
            return Ok(ClassAttachReport::default());
        }
        let node = self.attach_new(host, control)?;
        self.enumerate_and_attach(host, control).inspect_err(|err| {
            warn!("rolling back attach to class {control}: {err}");
            self.detach_node(host, node);
        })
    }

    /// Detach our node from the class behind `control`.
    ///
    /// Member volumes keep their nodes; they go away with their volumes or
    /// at unload.
    pub fn detach_from_class(&self, host: &dyn DeviceHost, control: NodeId) -> bool {
        self.detach_from_resource(host, control)
    }

    /// Find our node in the stack containing `target` and detach it.
    ///
    /// Returns `false`, changing nothing, if the stack carries no node of
    /// ours.
    pub fn detach_from_resource(&self, host: &dyn DeviceHost, target: NodeId) -> bool {
        match self.find_attached(host, target) {
            Some(node) => {
                self.detach_node(host, node);
                true
            }
            None => {
                // Unclear whether this is "already detached" or a missed
                // detach; nothing is unbound either way.
                warn!("no {} node found in the stack of {target}", self.id);
                false
            }
        }
    }

    pub(super) fn resource_class_event(
        &self,
        host: &dyn DeviceHost,
        control: NodeId,
        active: bool,
    ) -> Result<(), FilterError> {
        if active {
            let report = self.attach_to_class(host, control)?;
            info!(
                "class {control} active: {} attached, {} skipped, {} failed",
                report.attached, report.skipped, report.failed
            );
        } else {
            self.detach_from_class(host, control);
            info!("class {control} inactive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DeviceType, Driver, DriverId, FilterConfig, MemoryHost, NodeInfo, Request, Status,
    };
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// A [`MemoryHost`] whose chain insertion or flag clearing can be made
    /// to fail.
    struct FaultyHost {
        inner: MemoryHost,
        attach_error: Option<FilterError>,
        clear_fails: bool,
        attaches: AtomicUsize,
    }

    impl FaultyHost {
        fn new(attach_error: Option<FilterError>, clear_fails: bool) -> Self {
            Self {
                inner: MemoryHost::new(),
                attach_error,
                clear_fails,
                attaches: AtomicUsize::new(0),
            }
        }
    }

    impl DeviceHost for FaultyHost {
        fn register_driver(&self, id: DriverId, driver: Arc<dyn Driver>) -> Result<(), FilterError> {
            self.inner.register_driver(id, driver)
        }

        fn unregister_driver(&self, id: &DriverId) {
            self.inner.unregister_driver(id);
        }

        fn driver(&self, id: &DriverId) -> Option<Arc<dyn Driver>> {
            self.inner.driver(id)
        }

        fn driver_of(&self, node: NodeId) -> Option<Arc<dyn Driver>> {
            self.inner.driver_of(node)
        }

        fn node_info(&self, node: NodeId) -> Result<NodeInfo, FilterError> {
            self.inner.node_info(node)
        }

        fn create_node(
            &self,
            owner: &DriverId,
            device_type: DeviceType,
            flags: NodeFlags,
            characteristics: Characteristics,
        ) -> Result<NodeId, FilterError> {
            self.inner.create_node(owner, device_type, flags, characteristics)
        }

        fn clear_flags(&self, node: NodeId, flags: NodeFlags) -> Result<(), FilterError> {
            if self.clear_fails {
                return Err(FilterError::Host("flags are locked".into()));
            }
            self.inner.clear_flags(node, flags)
        }

        fn release(&self, node: NodeId) {
            self.inner.release(node);
        }

        fn attach(&self, node: NodeId, target: NodeId) -> Result<NodeId, FilterError> {
            self.attaches.fetch_add(1, Ordering::SeqCst);
            match &self.attach_error {
                Some(err) => Err(err.clone()),
                None => self.inner.attach(node, target),
            }
        }

        fn detach(&self, lower: NodeId) {
            self.inner.detach(lower);
        }

        fn reference_top(&self, node: NodeId) -> Result<NodeId, FilterError> {
            self.inner.reference_top(node)
        }

        fn reference_lower(&self, node: NodeId) -> Option<NodeId> {
            self.inner.reference_lower(node)
        }

        fn dereference(&self, node: NodeId) {
            self.inner.dereference(node);
        }

        fn enumerate(&self, driver: &DriverId, buffer: &mut [NodeId]) -> Result<usize, FilterError> {
            self.inner.enumerate(driver, buffer)
        }

        fn register_resource_notification(&self, driver: &DriverId) -> Result<(), FilterError> {
            self.inner.register_resource_notification(driver)
        }

        fn unregister_resource_notification(&self, driver: &DriverId) {
            self.inner.unregister_resource_notification(driver);
        }

        fn call(&self, target: NodeId, request: Request) -> Status {
            self.inner.call(target, request)
        }

        fn delay(&self, interval: Duration) {
            self.inner.delay(interval);
        }
    }

    fn faulty_setup(host: &FaultyHost) -> (Arc<StackFilter>, NodeId) {
        let fs = DriverId::new("Fs");
        host.inner.add_terminal_driver(&fs);
        let filter = StackFilter::new(FilterConfig::default().with_watch_resource_classes(false))
            .unwrap();
        filter.load(host).unwrap();
        (filter, volume(&host.inner, &fs))
    }

    fn setup() -> (MemoryHost, Arc<StackFilter>, DriverId) {
        let host = MemoryHost::new();
        let fs = DriverId::new("Fs");
        host.add_terminal_driver(&fs);
        let filter = StackFilter::new(FilterConfig::default().with_watch_resource_classes(false))
            .unwrap();
        filter.load(&host).unwrap();
        (host, filter, fs)
    }

    fn volume(host: &MemoryHost, fs: &DriverId) -> NodeId {
        host.create_node(
            fs,
            DeviceType::DiskFileSystem,
            NodeFlags::DIRECT_IO,
            Characteristics::SECURE_OPEN | Characteristics::REMOVABLE_MEDIA,
        )
        .unwrap()
    }

    #[test]
    fn attach_mirrors_flags_and_characteristics() {
        let (host, filter, fs) = setup();
        let vol = volume(&host, &fs);
        let node = filter.attach_to_resource(&host, vol).unwrap();

        let info = host.node_info(node).unwrap();
        assert_eq!(info.flags, NodeFlags::DIRECT_IO);
        assert_eq!(info.characteristics, Characteristics::SECURE_OPEN);
        assert_eq!(info.device_type, DeviceType::DiskFileSystem);
        assert!(!info.is_initializing());
        assert_eq!(filter.node(node).unwrap().lower, vol);
    }

    #[test]
    fn attach_twice_is_a_no_op() {
        let (host, filter, fs) = setup();
        let vol = volume(&host, &fs);
        let first = filter.attach_to_resource(&host, vol).unwrap();
        let second = filter.attach_to_resource(&host, vol).unwrap();
        assert_eq!(first, second);
        assert_eq!(host.node_count(filter.id()), 1);
        assert_eq!(host.outstanding_references(), 0);
    }

    #[test]
    fn attach_retries_while_initializing() {
        let (host, filter, fs) = setup();
        let vol = volume(&host, &fs);
        host.keep_initializing(vol, Some(3)).unwrap();

        filter.attach_to_resource(&host, vol).unwrap();
        assert_eq!(host.attach_attempts(), 4);
        assert_eq!(host.elapsed(), Duration::from_millis(1500));
    }

    #[test]
    fn attach_gives_up_and_releases_node() {
        let (host, filter, fs) = setup();
        let vol = volume(&host, &fs);
        host.keep_initializing(vol, None).unwrap();

        let err = filter.attach_to_resource(&host, vol).unwrap_err();
        assert_eq!(err, FilterError::AttachFailed { target: vol, attempts: 8 });
        assert_eq!(host.node_count(filter.id()), 0);
        assert!(filter.attached_nodes().is_empty());
    }

    #[test]
    fn attach_to_missing_target_fails() {
        let (host, filter, _) = setup();
        let err = filter.attach_to_resource(&host, NodeId(999)).unwrap_err();
        assert_eq!(err, FilterError::NodeNotFound { node: NodeId(999) });
    }

    #[test]
    fn enumerate_skips_control_foreign_types_and_filtered() {
        let (host, filter, fs) = setup();
        let control = volume(&host, &fs);
        let mounted = volume(&host, &fs);
        let filtered = volume(&host, &fs);
        let foreign = host
            .create_node(&fs, DeviceType::Disk, NodeFlags::empty(), Characteristics::empty())
            .unwrap();
        filter.attach_to_resource(&host, filtered).unwrap();

        let report = filter.enumerate_and_attach(&host, control).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.attached, 1);
        assert_eq!(report.skipped, 3);
        assert!(filter.is_attached(&host, mounted));
        assert!(!filter.is_attached(&host, foreign));
        assert!(!filter.is_attached(&host, control));
        assert_eq!(host.outstanding_references(), 0);
    }

    #[test]
    fn member_failure_does_not_stop_the_batch() {
        let (host, filter, fs) = setup();
        let control = volume(&host, &fs);
        let stuck = volume(&host, &fs);
        let fine = volume(&host, &fs);
        host.keep_initializing(stuck, None).unwrap();

        let report = filter.enumerate_and_attach(&host, control).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.attached, 1);
        assert!(filter.is_attached(&host, fine));
    }

    #[test]
    fn class_attach_rolls_back_on_enumeration_failure() {
        let (host, filter, fs) = setup();
        let control = volume(&host, &fs);
        volume(&host, &fs);
        host.fail_enumeration(&fs, true);

        let err = filter.attach_to_class(&host, control).unwrap_err();
        assert!(matches!(err, FilterError::EnumerationFailed { .. }));
        assert!(!filter.is_attached(&host, control));
        assert_eq!(host.node_count(filter.id()), 0);
    }

    #[test]
    fn non_transient_insertion_error_is_not_retried() {
        let host = FaultyHost::new(
            Some(FilterError::AlreadyAttached {
                node: NodeId(0),
                target: NodeId(0),
            }),
            false,
        );
        let (filter, vol) = faulty_setup(&host);

        let err = filter.attach_to_resource(&host, vol).unwrap_err();
        assert!(matches!(err, FilterError::AlreadyAttached { .. }));
        assert_eq!(host.attaches.load(Ordering::SeqCst), 1);
        assert_eq!(host.inner.elapsed(), Duration::ZERO);
        assert_eq!(host.inner.node_count(filter.id()), 0);
        assert!(filter.attached_nodes().is_empty());
    }

    #[test]
    fn flag_clear_failure_undoes_the_insertion() {
        let host = FaultyHost::new(None, true);
        let (filter, vol) = faulty_setup(&host);

        let err = filter.attach_to_resource(&host, vol).unwrap_err();
        assert!(matches!(err, FilterError::Host(_)));
        assert!(filter.attached_nodes().is_empty());
        assert_eq!(host.inner.stack_of(vol), vec![vol]);
        assert_eq!(host.inner.node_count(filter.id()), 0);
        assert_eq!(host.inner.outstanding_references(), 0);
    }

    #[test]
    fn repeated_class_attach_keeps_existing_node() {
        let (host, filter, fs) = setup();
        let control = volume(&host, &fs);
        let vol = volume(&host, &fs);
        filter.attach_to_class(&host, control).unwrap();
        let node = filter.find_attached(&host, control).unwrap();

        host.fail_enumeration(&fs, true);
        let report = filter.attach_to_class(&host, control).unwrap();
        assert_eq!(report, ClassAttachReport::default());
        assert_eq!(filter.find_attached(&host, control), Some(node));
        assert!(filter.is_attached(&host, vol));
        assert_eq!(host.node_count(filter.id()), 2);
    }

    #[test]
    fn detach_from_unfiltered_stack_changes_nothing() {
        let (host, filter, fs) = setup();
        let vol = volume(&host, &fs);
        assert!(!filter.detach_from_resource(&host, vol));
        assert_eq!(host.stack_of(vol), vec![vol]);
    }
}
