//! Error types for filter attachment, enumeration and teardown.

use crate::{DriverId, NodeId, Status};

/// Filter error type with contextual variants.
///
/// Every variant names the node, driver or operation involved. Uses
/// `#[non_exhaustive]` for forward compatibility.
///
/// A missing fast-path capability is *not* an error: fast-path handlers
/// answer `false` and the host falls back to the request path.
///
/// # Examples
///
/// ```rust
/// use stackfilter::{FilterError, NodeId};
///
/// let err = FilterError::AttachFailed { target: NodeId(7), attempts: 8 };
/// assert_eq!(err.to_string(), "attach to node#7 failed after 8 attempts");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    // Attachment Errors
    /// Chain insertion kept failing until the retry bound was exhausted.
    #[error("attach to {target} failed after {attempts} attempts")]
    AttachFailed {
        /// The node we tried to attach above.
        target: NodeId,
        /// Number of insertion attempts made.
        attempts: u32,
    },

    /// The target is still initializing; insertion may succeed later.
    #[error("{target} is still initializing")]
    TargetInitializing {
        /// The node that is not ready yet.
        target: NodeId,
    },

    /// The node is already part of a stack.
    #[error("{node} is already attached above {target}")]
    AlreadyAttached {
        /// The node that was asked to attach.
        node: NodeId,
        /// The node it is already attached to.
        target: NodeId,
    },

    // Lookup Errors
    /// The host could not list the objects of a driver.
    #[error("enumeration of {driver} failed: {reason}")]
    EnumerationFailed {
        /// The driver whose objects were being listed.
        driver: DriverId,
        /// Host-provided reason.
        reason: String,
    },

    /// The node does not exist (or was already released).
    #[error("node not found: {node}")]
    NodeNotFound {
        /// The missing node.
        node: NodeId,
    },

    /// The driver is not registered with the host.
    #[error("driver not found: {driver}")]
    DriverNotFound {
        /// The missing driver.
        driver: DriverId,
    },

    /// A driver with the same identity is already registered.
    #[error("driver already registered: {driver}")]
    DriverAlreadyRegistered {
        /// The duplicate identity.
        driver: DriverId,
    },

    // Lifecycle Errors
    /// The filter is draining or released and no longer accepts attachments.
    #[error("filter is not active (state: {state})")]
    NotActive {
        /// The state the filter was in.
        state: &'static str,
    },

    /// The operation has no handler on this node.
    #[error("{operation}: invalid parameter")]
    InvalidParameter {
        /// The operation that was rejected.
        operation: &'static str,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Generic host failure.
    #[error("host error: {0}")]
    Host(String),
}

impl FilterError {
    /// Returns `true` for failures that may go away if the operation is retried.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, FilterError::TargetInitializing { .. })
    }
}

impl From<&FilterError> for Status {
    fn from(error: &FilterError) -> Self {
        match error {
            FilterError::InvalidParameter { .. } | FilterError::NodeNotFound { .. } => {
                Status::InvalidParameter
            }
            FilterError::DriverNotFound { .. } => Status::InvalidDeviceRequest,
            _ => Status::Unsuccessful,
        }
    }
}
