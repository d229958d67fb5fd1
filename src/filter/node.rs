//! Per-node bookkeeping.

use crate::{Characteristics, DeviceType, NodeFlags, NodeId};

/// What the filter remembers about one of its nodes.
///
/// `lower` is an observing handle: the filter forwards to it but never owns
/// its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterNode {
    /// The filter node itself.
    pub id: NodeId,
    /// The node directly below, as returned by the insertion.
    pub lower: NodeId,
    /// Device type copied from the target.
    pub device_type: DeviceType,
    /// Transfer flags mirrored from the target.
    pub flags: NodeFlags,
    /// Characteristics mirrored from the target.
    pub characteristics: Characteristics,
}

impl FilterNode {
    /// Returns `true` if requests on this node carry keystroke records.
    #[inline]
    pub fn is_input_stream(&self) -> bool {
        self.device_type == DeviceType::Keyboard
    }
}
