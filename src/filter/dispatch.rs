//! Request path.
//!
//! | Request | Handling |
//! |---------|----------|
//! | any, on a node we do not know | completed with [`Status::InvalidParameter`] |
//! | `Create` | file name logged, then passed through |
//! | `Read` on a keyboard node | forwarded with a completion routine that logs keystrokes |
//! | everything else | passed through untouched |

use std::sync::Arc;

use log::{debug, info};

use super::{FilterNode, StackFilter};
use crate::{
    DeviceHost, Driver, FastIoCall, FastIoTable, FilterError, KeyboardInputData, MajorFunction,
    NodeId, QuiesceCounter, Request, Status,
};

impl Driver for StackFilter {
    fn dispatch(&self, host: &dyn DeviceHost, node: NodeId, mut request: Request) -> Status {
        let Some((filter_node, _lower)) = self.route(host, node) else {
            debug!("{:?} on unknown {node}", request.major());
            return request.complete(Status::InvalidParameter, 0);
        };
        match request.major() {
            MajorFunction::Create => self.dispatch_create(host, &filter_node, request),
            MajorFunction::Read if filter_node.is_input_stream() => {
                self.dispatch_key_read(host, &filter_node, request)
            }
            _ => pass_through(host, &filter_node, request),
        }
    }

    fn fast_io_table(&self) -> Option<FastIoTable> {
        Some(self.published_fast_io_table())
    }

    fn fast_io(&self, host: &dyn DeviceHost, node: NodeId, call: FastIoCall<'_>) -> bool {
        self.forward_fast_io(host, node, call)
    }

    fn fast_io_detach_device(&self, host: &dyn DeviceHost, source: NodeId, target: NodeId) {
        self.detach_on_notice(host, source, target);
    }

    fn resource_class_changed(
        &self,
        host: &dyn DeviceHost,
        control: NodeId,
        active: bool,
    ) -> Result<(), FilterError> {
        self.resource_class_event(host, control, active)
    }
}

impl StackFilter {
    fn dispatch_create(
        &self,
        host: &dyn DeviceHost,
        node: &FilterNode,
        request: Request,
    ) -> Status {
        if self.config.log_opens {
            match request.file() {
                Some(file) => info!("open {} via {}", file.name, node.id),
                None => info!("open (no file) via {}", node.id),
            }
        }
        pass_through(host, node, request)
    }

    fn dispatch_key_read(
        &self,
        host: &dyn DeviceHost,
        node: &FilterNode,
        mut request: Request,
    ) -> Status {
        request.copy_current_location_to_next();
        let pending = Arc::clone(&self.pending);
        request.set_completion(move |request| log_keystrokes(&pending, request));
        let in_flight = self.pending.begin_async();
        debug!("read on {} forwarded to {}, {in_flight} in flight", node.id, node.lower);
        host.call(node.lower, request)
    }
}

fn pass_through(host: &dyn DeviceHost, node: &FilterNode, mut request: Request) -> Status {
    request.skip_current_location();
    host.call(node.lower, request)
}

fn log_keystrokes(pending: &QuiesceCounter, request: &mut Request) {
    let status = request.io_status();
    if status.status.is_success() {
        for key in KeyboardInputData::decode_all(request.buffer(), status.information) {
            info!("scan code 0x{:02x} {}", key.make_code, key.flags.label());
        }
    }
    pending.on_complete();
}
