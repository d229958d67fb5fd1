//! The driver side of a device stack.
//!
//! Every node belongs to a [`Driver`]. The host hands requests, fast-path
//! calls and resource-class notifications to the owning driver together with
//! a reference to itself, so drivers never keep the host alive on their own.

use crate::{DeviceHost, FastIoCall, FastIoTable, FilterError, NodeId, Request, Status};

/// Owner of a set of nodes.
///
/// # Request path
///
/// [`dispatch`](Driver::dispatch) receives every request addressed to one of
/// the driver's nodes. It either completes the request, forwards it with
/// [`DeviceHost::call`], or keeps it and returns [`Status::Pending`].
///
/// # Fast path
///
/// A driver that services fast-path calls publishes a [`FastIoTable`] and
/// implements [`fast_io`](Driver::fast_io). Callers must probe the table with
/// [`FastIoTable::handler_valid`] before calling; a driver without a table
/// keeps the default implementations.
///
/// # Example
///
/// ```rust
/// use stackfilter::{DeviceHost, Driver, NodeId, Request, Status};
///
/// /// Completes every request immediately.
/// struct NullDriver;
///
/// impl Driver for NullDriver {
///     fn dispatch(&self, _host: &dyn DeviceHost, _node: NodeId, mut request: Request) -> Status {
///         request.complete(Status::Success, 0)
///     }
/// }
/// ```
pub trait Driver: Send + Sync {
    /// Service a request addressed to `node`.
    fn dispatch(&self, host: &dyn DeviceHost, node: NodeId, request: Request) -> Status;

    /// The driver's published fast-path table, if any.
    fn fast_io_table(&self) -> Option<FastIoTable> {
        None
    }

    /// Service a fast-path call made on `node`.
    ///
    /// Returns `false` if the call was not handled and the caller must fall
    /// back to the request path.
    fn fast_io(&self, host: &dyn DeviceHost, node: NodeId, call: FastIoCall<'_>) -> bool {
        let _ = (host, node, call);
        false
    }

    /// The node `target` that `source` is attached to is going away.
    fn fast_io_detach_device(&self, host: &dyn DeviceHost, source: NodeId, target: NodeId) {
        let _ = (host, source, target);
    }

    /// A resource class control node became active or inactive.
    ///
    /// Only called for drivers that registered with
    /// [`DeviceHost::register_resource_notification`].
    ///
    /// # Errors
    ///
    /// Whatever the driver's attach/detach logic reports; the host passes it
    /// on to whoever triggered the notification.
    fn resource_class_changed(
        &self,
        host: &dyn DeviceHost,
        control: NodeId,
        active: bool,
    ) -> Result<(), FilterError> {
        let _ = (host, control, active);
        Ok(())
    }
}
