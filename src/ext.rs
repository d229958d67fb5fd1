//! # Extension Traits
//!
//! Convenience walks over device stacks.
//!
//! ## Overview
//!
//! [`DeviceHostExt`] provides commonly-needed utility methods built only on
//! the [`DeviceHost`] primitives. They are default methods with a blanket
//! implementation, so every host gets them for free, `dyn DeviceHost`
//! included.
//!
//! ## Available Methods
//!
//! | Method | Description |
//! |--------|-------------|
//! | [`owner_of`](DeviceHostExt::owner_of) | Driver that created a node |
//! | [`is_owned_by`](DeviceHostExt::is_owned_by) | Ownership check, `false` for missing nodes |
//! | [`stack_of`](DeviceHostExt::stack_of) | All nodes of a stack, top first |

use crate::{DeviceHost, DriverId, FilterError, NodeId, NodeRef};

/// Extension methods for any device host.
///
/// # Example
///
/// ```rust
/// use stackfilter::{DeviceHost, DeviceHostExt, DriverId, NodeId};
///
/// fn filtered_by(host: &dyn DeviceHost, volume: NodeId, filter: &DriverId) -> bool {
///     host.stack_of(volume)
///         .into_iter()
///         .any(|node| host.is_owned_by(node, filter))
/// }
/// ```
pub trait DeviceHostExt: DeviceHost {
    /// The driver that created `node`.
    ///
    /// # Errors
    ///
    /// - [`FilterError::NodeNotFound`] if the node does not exist
    fn owner_of(&self, node: NodeId) -> Result<DriverId, FilterError> {
        self.node_info(node).map(|info| info.owner)
    }

    /// Returns `true` if `node` exists and was created by `driver`.
    fn is_owned_by(&self, node: NodeId, driver: &DriverId) -> bool {
        match self.node_info(node) {
            Ok(info) => &info.owner == driver,
            Err(_) => false,
        }
    }

    /// Every node of the stack containing `node`, top of the stack first.
    ///
    /// Returns an empty list if the node does not exist. References taken
    /// during the walk are dropped before returning.
    fn stack_of(&self, node: NodeId) -> Vec<NodeId> {
        let mut stack = Vec::new();
        let Ok(top) = self.reference_top(node) else {
            return stack;
        };
        let mut current = Some(NodeRef::adopt(self, top));
        while let Some(visited) = current {
            stack.push(visited.id());
            current = self
                .reference_lower(visited.id())
                .map(|lower| NodeRef::adopt(self, lower));
        }
        stack
    }
}

// Blanket implementation - every host gets DeviceHostExt for free
impl<H: DeviceHost + ?Sized> DeviceHostExt for H {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Characteristics, DeviceType, MemoryHost, NodeFlags};

    #[test]
    fn ext_is_available_on_trait_objects() {
        fn _check(host: &dyn DeviceHost) -> Vec<NodeId> {
            host.stack_of(NodeId(1))
        }
    }

    #[test]
    fn stack_of_missing_node_is_empty() {
        let host = MemoryHost::new();
        assert!(host.stack_of(NodeId(99)).is_empty());
    }

    #[test]
    fn stack_of_lists_top_first_and_releases_references() {
        let host = MemoryHost::new();
        let disk = DriverId::new("Disk");
        host.add_terminal_driver(&disk);
        let bottom = host
            .create_node(&disk, DeviceType::Disk, NodeFlags::empty(), Characteristics::empty())
            .unwrap();
        let middle = host
            .create_node(&disk, DeviceType::Disk, NodeFlags::empty(), Characteristics::empty())
            .unwrap();
        host.attach(middle, bottom).unwrap();

        assert_eq!(host.stack_of(bottom), vec![middle, bottom]);
        assert_eq!(host.stack_of(middle), vec![middle, bottom]);
        assert_eq!(host.outstanding_references(), 0);
        assert!(host.is_owned_by(middle, &disk));
        assert!(!host.is_owned_by(middle, &DriverId::new("Other")));
        assert_eq!(host.owner_of(bottom).unwrap(), disk);
    }
}
