//! Fixed-capacity enumeration of a driver's nodes.
//!
//! The host may own more nodes than the buffer holds. [`EnumerationBuffer`]
//! keeps the reported total but only ever hands out the entries that fit.

use crate::{DeviceHost, DriverId, FilterError, NodeId};

/// Number of entries one enumeration pass can return.
pub const ENUMERATION_CAPACITY: usize = 64;

/// Storage for one enumeration pass.
///
/// # Example
///
/// ```rust
/// use stackfilter::{DeviceHost, DriverId, EnumerationBuffer, FilterError, ENUMERATION_CAPACITY};
///
/// fn count_nodes(host: &dyn DeviceHost, driver: &DriverId) -> Result<usize, FilterError> {
///     let mut buffer = EnumerationBuffer::new();
///     let members = buffer.fill(host, driver)?;
///     assert!(members.len() <= ENUMERATION_CAPACITY);
///     Ok(members.total())
/// }
/// ```
#[derive(Debug)]
pub struct EnumerationBuffer {
    slots: [NodeId; ENUMERATION_CAPACITY],
}

impl Default for EnumerationBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnumerationBuffer {
    /// An empty buffer.
    pub fn new() -> Self {
        Self {
            slots: [NodeId(0); ENUMERATION_CAPACITY],
        }
    }

    /// List the nodes owned by `driver`.
    ///
    /// The returned view holds a reference on every listed node and drops
    /// them all when it goes out of scope.
    ///
    /// # Errors
    ///
    /// Whatever [`DeviceHost::enumerate`] reports.
    pub fn fill<'a, H: DeviceHost + ?Sized>(
        &'a mut self,
        host: &'a H,
        driver: &DriverId,
    ) -> Result<Enumerated<'a, H>, FilterError> {
        let total = host.enumerate(driver, &mut self.slots)?;
        let len = total.min(ENUMERATION_CAPACITY);
        Ok(Enumerated {
            host,
            entries: &self.slots[..len],
            total,
        })
    }
}

/// Result of [`EnumerationBuffer::fill`].
pub struct Enumerated<'a, H: DeviceHost + ?Sized> {
    host: &'a H,
    entries: &'a [NodeId],
    total: usize,
}

impl<H: DeviceHost + ?Sized> Enumerated<'_, H> {
    /// The listed nodes, at most [`ENUMERATION_CAPACITY`] of them.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().copied()
    }

    /// Number of listed nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was listed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of nodes the host reported, which may exceed [`len`](Self::len).
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Returns `true` if the host owned more nodes than fit.
    #[inline]
    pub fn was_clamped(&self) -> bool {
        self.total > self.entries.len()
    }
}

impl<H: DeviceHost + ?Sized> Drop for Enumerated<'_, H> {
    fn drop(&mut self) {
        for &node in self.entries {
            self.host.dereference(node);
        }
    }
}

impl<H: DeviceHost + ?Sized> std::fmt::Debug for Enumerated<'_, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enumerated")
            .field("entries", &self.entries)
            .field("total", &self.total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Characteristics, DeviceType, MemoryHost, NodeFlags};

    fn host_with_nodes(driver: &DriverId, count: usize) -> MemoryHost {
        let host = MemoryHost::new();
        host.add_terminal_driver(driver);
        for _ in 0..count {
            host.create_node(
                driver,
                DeviceType::DiskFileSystem,
                NodeFlags::empty(),
                Characteristics::empty(),
            )
            .unwrap();
        }
        host
    }

    #[test]
    fn small_driver_fits() {
        let fs = DriverId::new("Fs");
        let host = host_with_nodes(&fs, 3);
        let mut buffer = EnumerationBuffer::new();
        let members = buffer.fill(&host, &fs).unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(members.total(), 3);
        assert!(!members.was_clamped());
        assert_eq!(host.outstanding_references(), 3);
        drop(members);
        assert_eq!(host.outstanding_references(), 0);
    }

    #[test]
    fn large_driver_is_clamped() {
        let fs = DriverId::new("Fs");
        let host = host_with_nodes(&fs, 100);
        let mut buffer = EnumerationBuffer::new();
        let members = buffer.fill(&host, &fs).unwrap();
        assert_eq!(members.len(), ENUMERATION_CAPACITY);
        assert_eq!(members.iter().count(), ENUMERATION_CAPACITY);
        assert_eq!(members.total(), 100);
        assert!(members.was_clamped());
        assert_eq!(host.outstanding_references(), ENUMERATION_CAPACITY);
        drop(members);
        assert_eq!(host.outstanding_references(), 0);
    }

    #[test]
    fn failure_takes_no_references() {
        let fs = DriverId::new("Fs");
        let host = host_with_nodes(&fs, 5);
        host.fail_enumeration(&fs, true);
        let mut buffer = EnumerationBuffer::new();
        let err = buffer.fill(&host, &fs).unwrap_err();
        assert!(matches!(err, FilterError::EnumerationFailed { .. }));
        assert_eq!(host.outstanding_references(), 0);
    }

    #[test]
    fn unknown_driver_lists_nothing() {
        let host = MemoryHost::new();
        let mut buffer = EnumerationBuffer::new();
        let members = buffer.fill(&host, &DriverId::new("Nobody")).unwrap();
        assert!(members.is_empty());
        assert_eq!(members.total(), 0);
    }
}
