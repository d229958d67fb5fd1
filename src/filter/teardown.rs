//! Unload: stop new attachments, then enumerate and detach until nothing is
//! left.

use log::{debug, info, warn};

use super::{FilterState, StackFilter};
use crate::{DeviceHost, DeviceHostExt, EnumerationBuffer, FilterError, NodeId};

/// Summary of an [`unload`](StackFilter::unload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    /// Enumeration passes, the final empty one included.
    pub passes: usize,
    /// Nodes detached and released.
    pub detached: usize,
}

impl StackFilter {
    /// Detach every node and release the driver.
    ///
    /// Unsubscribes from resource-class notifications first, then repeats
    /// enumerate-and-detach passes until a pass finds no node. Each detach
    /// waits for in-flight completions before releasing the node.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NotActive`] if unloading already started
    /// - [`FilterError::EnumerationFailed`] if a pass cannot list the nodes;
    ///   the filter stays draining and `unload` may not be retried
    pub fn unload(&self, host: &dyn DeviceHost) -> Result<TeardownReport, FilterError> {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state != FilterState::Active {
                return Err(FilterError::NotActive { state: state.name() });
            }
            *state = FilterState::Draining;
        }
        if self.config.watch_resource_classes {
            host.unregister_resource_notification(&self.id);
        }
        info!("{} draining", self.id);

        let mut report = TeardownReport::default();
        loop {
            report.passes += 1;
            let mut buffer = EnumerationBuffer::new();
            let members = buffer.fill(host, &self.id)?;
            if members.total() == 0 {
                break;
            }
            debug!(
                "teardown pass {}: {} of {} nodes",
                report.passes,
                members.len(),
                members.total()
            );
            for node in members.iter() {
                if self.detach_node(host, node) {
                    report.detached += 1;
                }
            }
            drop(members);
            host.delay(self.config.teardown_interval);
        }

        self.set_state(FilterState::Released);
        host.unregister_driver(&self.id);
        info!(
            "{} released: {} nodes in {} passes",
            self.id, report.detached, report.passes
        );
        Ok(report)
    }

    /// Unbind `node` from the node below it and release it.
    ///
    /// Blocks until no forwarded request is waiting for its completion
    /// routine. Returns `false`, changing nothing, if `node` is not one of
    /// ours.
    pub fn detach_node(&self, host: &dyn DeviceHost, node: NodeId) -> bool {
        if !host.is_owned_by(node, &self.id) {
            warn!("refusing to detach {node}: not owned by {}", self.id);
            return false;
        }
        let recorded = self.write_nodes().remove(&node).map(|n| n.lower);
        let lower = recorded.or_else(|| {
            let lower = host.reference_lower(node)?;
            host.dereference(lower);
            Some(lower)
        });
        match lower {
            Some(lower) => host.detach(lower),
            None => warn!("{node} is not attached to anything"),
        }

        if !self
            .pending
            .wait_until_zero_timeout(self.config.quiesce_poll_interval)
        {
            debug!("{node}: waiting for {} completion(s)", self.pending.pending());
            self.pending
                .wait_until_zero(self.config.quiesce_poll_interval);
        }
        host.release(node);
        info!("detached and released {node}");
        true
    }
}
