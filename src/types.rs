//! Core types shared by hosts, drivers and the filter.

use std::fmt;

/// Identity of a node inside a host's device registry.
///
/// Nodes are referenced by handle, never by pointer. Holding a `NodeId`
/// does not keep the node alive; see [`NodeRef`](crate::NodeRef) for a
/// counted reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identity of a driver (the owner of a set of nodes).
///
/// Ownership checks compare driver identities: a node belongs to this
/// filter when its owner equals the filter's `DriverId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DriverId(String);

impl DriverId {
    /// Create a driver identity from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The driver name.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of device a node represents.
///
/// Filter nodes take the device type of the node they attach above, and
/// volume enumeration only considers members whose type matches the
/// resource class control node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceType {
    /// Raw disk.
    Disk,
    /// Disk file system (control node or mounted volume).
    DiskFileSystem,
    /// CD-ROM file system.
    CdRomFileSystem,
    /// Network file system.
    NetworkFileSystem,
    /// Keyboard input stream.
    Keyboard,
    /// Mouse input stream.
    Mouse,
    /// Anything else.
    Unknown,
}

bitflags::bitflags! {
    /// Per-node transfer flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct NodeFlags: u32 {
        /// Requests carry a system buffer copy of the caller's data.
        const BUFFERED_IO = 0x0000_0004;
        /// Requests carry a locked page list of the caller's data.
        const DIRECT_IO = 0x0000_0010;
        /// The node is still being set up and refuses attachment.
        const DEVICE_INITIALIZING = 0x0000_0080;
    }
}

impl NodeFlags {
    /// Flags a filter node copies from the node it attaches above.
    pub const MIRRORED: Self = Self::BUFFERED_IO.union(Self::DIRECT_IO);
}

bitflags::bitflags! {
    /// Per-node device characteristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Characteristics: u32 {
        /// Media can be removed.
        const REMOVABLE_MEDIA = 0x0000_0001;
        /// Device is read-only.
        const READ_ONLY_DEVICE = 0x0000_0002;
        /// Security checks apply to every open, not just the volume root.
        const SECURE_OPEN = 0x0000_0100;
    }
}

impl Characteristics {
    /// Characteristics a filter node copies from the node it attaches above.
    pub const MIRRORED: Self = Self::SECURE_OPEN;
}

/// Snapshot of a node's attributes as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The node.
    pub id: NodeId,
    /// Driver that created the node.
    pub owner: DriverId,
    /// Device type.
    pub device_type: DeviceType,
    /// Transfer flags.
    pub flags: NodeFlags,
    /// Device characteristics.
    pub characteristics: Characteristics,
}

impl NodeInfo {
    /// Returns `true` if the node is still initializing.
    #[inline]
    pub fn is_initializing(&self) -> bool {
        self.flags.contains(NodeFlags::DEVICE_INITIALIZING)
    }
}

/// Completion status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Status {
    /// Completed successfully.
    #[default]
    Success,
    /// Accepted; completion will happen later.
    Pending,
    /// No handler for this operation on this node.
    InvalidParameter,
    /// The target cannot service this request.
    InvalidDeviceRequest,
    /// Generic failure.
    Unsuccessful,
    /// The request was cancelled.
    Cancelled,
}

impl Status {
    /// Returns `true` for [`Status::Success`].
    #[inline]
    pub const fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

/// Final status block of a request or fast-path call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStatus {
    /// Completion status.
    pub status: Status,
    /// Operation-specific count, usually bytes transferred.
    pub information: usize,
}

/// An opened file as seen by the request path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileObject {
    /// Name the file was opened with.
    pub name: String,
}

impl FileObject {
    /// Create a file object for the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Process identity used by byte-range locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

/// Opaque page list describing a locked buffer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mdl(pub Vec<u8>);

/// Timestamps and attributes of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileBasicInformation {
    /// Creation time (100ns ticks).
    pub creation_time: i64,
    /// Last access time.
    pub last_access_time: i64,
    /// Last write time.
    pub last_write_time: i64,
    /// Last change time.
    pub change_time: i64,
    /// Attribute bits.
    pub attributes: u32,
}

/// Size and link information of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStandardInformation {
    /// Allocated size in bytes.
    pub allocation_size: u64,
    /// Logical size in bytes.
    pub end_of_file: u64,
    /// Number of hard links.
    pub number_of_links: u32,
    /// A delete is pending.
    pub delete_pending: bool,
    /// The file is a directory.
    pub directory: bool,
}

/// Combined basic and standard information, as used by open queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileNetworkOpenInformation {
    /// Creation time (100ns ticks).
    pub creation_time: i64,
    /// Last access time.
    pub last_access_time: i64,
    /// Last write time.
    pub last_write_time: i64,
    /// Last change time.
    pub change_time: i64,
    /// Allocated size in bytes.
    pub allocation_size: u64,
    /// Logical size in bytes.
    pub end_of_file: u64,
    /// Attribute bits.
    pub attributes: u32,
}

/// Compression parameters of a compressed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompressedDataInfo {
    /// Compression format code.
    pub format: u16,
    /// Log2 of the chunk size.
    pub chunk_shift: u8,
    /// Compressed size of every chunk.
    pub chunk_sizes: Vec<u32>,
}

bitflags::bitflags! {
    /// Flags of one keyboard input record. An empty set is a key press.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyFlags: u16 {
        /// Key released.
        const BREAK = 0x0001;
        /// Extended scan code, `E0` prefix.
        const E0 = 0x0002;
        /// Extended scan code, `E1` prefix.
        const E1 = 0x0004;
    }
}

impl KeyFlags {
    /// Human readable label used in key logs.
    pub fn label(self) -> &'static str {
        match (self.contains(Self::BREAK), self.contains(Self::E0), self.contains(Self::E1)) {
            (false, false, false) => "KeyDown",
            (true, false, false) => "KeyUp",
            (false, true, _) => "KeyDown E0",
            (true, true, _) => "KeyUp E0",
            (false, false, true) => "KeyDown E1",
            (true, false, true) => "KeyUp E1",
        }
    }
}

/// One keystroke record returned by a keyboard read.
///
/// Records are packed back to back in the request buffer, little-endian,
/// [`KeyboardInputData::SIZE`] bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardInputData {
    /// Keyboard unit number.
    pub unit_id: u16,
    /// Scan code.
    pub make_code: u16,
    /// Press/release and prefix flags.
    pub flags: KeyFlags,
    /// Reserved.
    pub reserved: u16,
    /// Device specific data.
    pub extra_information: u32,
}

impl KeyboardInputData {
    /// Encoded record size in bytes.
    pub const SIZE: usize = 12;

    /// Encode the record into its wire layout.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..2].copy_from_slice(&self.unit_id.to_le_bytes());
        out[2..4].copy_from_slice(&self.make_code.to_le_bytes());
        out[4..6].copy_from_slice(&self.flags.bits().to_le_bytes());
        out[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        out[8..12].copy_from_slice(&self.extra_information.to_le_bytes());
        out
    }

    /// Decode one record. Returns `None` if `bytes` is shorter than a record.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE)?;
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        Some(Self {
            unit_id: u16_at(0),
            make_code: u16_at(2),
            flags: KeyFlags::from_bits_truncate(u16_at(4)),
            reserved: u16_at(6),
            extra_information: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }

    /// Decode the records covered by `information` bytes of `buffer`.
    ///
    /// Trailing partial records and anything past the end of `buffer` are
    /// ignored.
    pub fn decode_all(buffer: &[u8], information: usize) -> impl Iterator<Item = Self> + '_ {
        let covered = information.min(buffer.len());
        buffer[..covered]
            .chunks_exact(Self::SIZE)
            .filter_map(Self::decode)
    }
}
