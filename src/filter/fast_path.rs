//! Fast path: probe the lower driver's table, forward or decline.
//!
//! Nothing here blocks. A declined call returns `false` and the host retries
//! the operation as a request.

use log::{debug, info, trace};

use super::StackFilter;
use crate::{DeviceHost, FastIoCall, FastIoSet, FastIoTable, NodeId};

impl StackFilter {
    /// The table the filter publishes: every slot of the current layout.
    pub(super) fn published_fast_io_table(&self) -> FastIoTable {
        FastIoTable::full(FastIoSet::all())
    }

    pub(super) fn forward_fast_io(
        &self,
        host: &dyn DeviceHost,
        node: NodeId,
        call: FastIoCall<'_>,
    ) -> bool {
        let kind = call.kind();
        let Some((_, lower_ref)) = self.route(host, node) else {
            debug!("{kind:?} on unknown {node}, declined");
            return false;
        };
        let lower = lower_ref.id();
        let Some(driver) = host.driver_of(lower) else {
            return false;
        };
        if !FastIoTable::handler_valid(driver.fast_io_table().as_ref(), kind) {
            debug!("{kind:?}: {lower} has no usable handler, declined");
            return false;
        }

        trace!("{kind:?} {node} -> {lower}");
        match call {
            FastIoCall::QueryOpen { request, info } => {
                let mut redirected = request.redirect(lower, node);
                driver.fast_io(
                    host,
                    lower,
                    FastIoCall::QueryOpen {
                        request: &mut *redirected,
                        info,
                    },
                )
            }
            call => driver.fast_io(host, lower, call),
        }
    }

    /// The node below `source` is going away: unbind and release `source`.
    pub(super) fn detach_on_notice(&self, host: &dyn DeviceHost, source: NodeId, target: NodeId) {
        if self.write_nodes().remove(&source).is_none() {
            debug!("detach notice for {source}, not one of ours");
            return;
        }
        host.detach(target);
        host.release(source);
        info!("{source} detached from vanishing {target}");
    }
}
