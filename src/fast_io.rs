//! # Fast-Path Capability Table
//!
//! Drivers advertise which fast-path operations they service through a
//! versioned [`FastIoTable`]. A table has a fixed slot layout and a declared
//! byte size: an older, smaller table simply does not reach the later slots.
//!
//! ## Probing
//!
//! A handler slot may be used only if:
//!
//! 1. the driver publishes a table at all,
//! 2. the declared size covers the slot's offset plus one slot, and
//! 3. the slot is populated (the kind is in [`FastIoTable::supported`]).
//!
//! [`FastIoTable::handler_valid`] performs all three checks. A failed probe is
//! not an error; the caller answers "not handled" and the host falls back to
//! the request path.
//!
//! ```rust
//! use stackfilter::{FastIoKind, FastIoSet, FastIoTable};
//!
//! // An old table that only reaches the first five slots.
//! let table = FastIoTable::with_declared_size(FastIoSet::all(), FastIoTable::size_for_slots(5));
//! assert!(FastIoTable::handler_valid(Some(&table), FastIoKind::QueryStandardInfo));
//! assert!(!FastIoTable::handler_valid(Some(&table), FastIoKind::Lock));
//! assert!(!FastIoTable::handler_valid(None, FastIoKind::Read));
//! ```

use std::mem::size_of;

use crate::{
    CompressedDataInfo, FileBasicInformation, FileNetworkOpenInformation, FileObject,
    FileStandardInformation, IoStatus, Mdl, ProcessId, Request,
};

/// Fast-path operation kinds.
///
/// The discriminant is the slot index in the table layout. Slots 10, 11, 14,
/// 24, 25 and 26 are section, mod-write and cache-flush synchronization
/// callbacks which this crate never forwards; they keep their positions so
/// declared sizes line up with the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FastIoKind {
    /// Can a cached read/write proceed without blocking?
    CheckIfPossible = 0,
    /// Cached read.
    Read = 1,
    /// Cached write.
    Write = 2,
    /// Basic information query.
    QueryBasicInfo = 3,
    /// Standard information query.
    QueryStandardInfo = 4,
    /// Byte-range lock.
    Lock = 5,
    /// Release one byte-range lock.
    UnlockSingle = 6,
    /// Release all locks of a process.
    UnlockAll = 7,
    /// Release all locks of a process with a key.
    UnlockAllByKey = 8,
    /// Device control.
    DeviceControl = 9,
    /// Lower node is going away; unbind from it.
    DetachDevice = 12,
    /// Network open information query.
    QueryNetworkOpenInfo = 13,
    /// Page-list read.
    MdlRead = 15,
    /// Release pages of a page-list read.
    MdlReadComplete = 16,
    /// Prepare pages for a page-list write.
    PrepareMdlWrite = 17,
    /// Commit a page-list write.
    MdlWriteComplete = 18,
    /// Compressed read.
    ReadCompressed = 19,
    /// Compressed write.
    WriteCompressed = 20,
    /// Release pages of a compressed page-list read.
    MdlReadCompleteCompressed = 21,
    /// Commit a compressed page-list write.
    MdlWriteCompleteCompressed = 22,
    /// Open-query without building a full open request.
    QueryOpen = 23,
}

impl FastIoKind {
    /// Every fast-path kind, in slot order.
    pub const ALL: [FastIoKind; 21] = [
        Self::CheckIfPossible,
        Self::Read,
        Self::Write,
        Self::QueryBasicInfo,
        Self::QueryStandardInfo,
        Self::Lock,
        Self::UnlockSingle,
        Self::UnlockAll,
        Self::UnlockAllByKey,
        Self::DeviceControl,
        Self::DetachDevice,
        Self::QueryNetworkOpenInfo,
        Self::MdlRead,
        Self::MdlReadComplete,
        Self::PrepareMdlWrite,
        Self::MdlWriteComplete,
        Self::ReadCompressed,
        Self::WriteCompressed,
        Self::MdlReadCompleteCompressed,
        Self::MdlWriteCompleteCompressed,
        Self::QueryOpen,
    ];

    /// Slot index in the table layout.
    #[inline]
    pub const fn slot(self) -> usize {
        self as usize
    }

    /// The single-kind set for this kind.
    #[inline]
    pub const fn flag(self) -> FastIoSet {
        FastIoSet::from_bits_retain(1 << self.slot())
    }
}

bitflags::bitflags! {
    /// Set of populated fast-path slots, one bit per slot index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FastIoSet: u32 {
        /// See [`FastIoKind::CheckIfPossible`].
        const CHECK_IF_POSSIBLE = 1 << 0;
        /// See [`FastIoKind::Read`].
        const READ = 1 << 1;
        /// See [`FastIoKind::Write`].
        const WRITE = 1 << 2;
        /// See [`FastIoKind::QueryBasicInfo`].
        const QUERY_BASIC_INFO = 1 << 3;
        /// See [`FastIoKind::QueryStandardInfo`].
        const QUERY_STANDARD_INFO = 1 << 4;
        /// See [`FastIoKind::Lock`].
        const LOCK = 1 << 5;
        /// See [`FastIoKind::UnlockSingle`].
        const UNLOCK_SINGLE = 1 << 6;
        /// See [`FastIoKind::UnlockAll`].
        const UNLOCK_ALL = 1 << 7;
        /// See [`FastIoKind::UnlockAllByKey`].
        const UNLOCK_ALL_BY_KEY = 1 << 8;
        /// See [`FastIoKind::DeviceControl`].
        const DEVICE_CONTROL = 1 << 9;
        /// See [`FastIoKind::DetachDevice`].
        const DETACH_DEVICE = 1 << 12;
        /// See [`FastIoKind::QueryNetworkOpenInfo`].
        const QUERY_NETWORK_OPEN_INFO = 1 << 13;
        /// See [`FastIoKind::MdlRead`].
        const MDL_READ = 1 << 15;
        /// See [`FastIoKind::MdlReadComplete`].
        const MDL_READ_COMPLETE = 1 << 16;
        /// See [`FastIoKind::PrepareMdlWrite`].
        const PREPARE_MDL_WRITE = 1 << 17;
        /// See [`FastIoKind::MdlWriteComplete`].
        const MDL_WRITE_COMPLETE = 1 << 18;
        /// See [`FastIoKind::ReadCompressed`].
        const READ_COMPRESSED = 1 << 19;
        /// See [`FastIoKind::WriteCompressed`].
        const WRITE_COMPRESSED = 1 << 20;
        /// See [`FastIoKind::MdlReadCompleteCompressed`].
        const MDL_READ_COMPLETE_COMPRESSED = 1 << 21;
        /// See [`FastIoKind::MdlWriteCompleteCompressed`].
        const MDL_WRITE_COMPLETE_COMPRESSED = 1 << 22;
        /// See [`FastIoKind::QueryOpen`].
        const QUERY_OPEN = 1 << 23;
    }
}

impl FastIoSet {
    /// Returns `true` if the slot for `kind` is populated.
    #[inline]
    pub fn supports(self, kind: FastIoKind) -> bool {
        self.contains(kind.flag())
    }
}

impl FromIterator<FastIoKind> for FastIoSet {
    fn from_iter<I: IntoIterator<Item = FastIoKind>>(iter: I) -> Self {
        iter.into_iter()
            .fold(FastIoSet::empty(), |set, kind| set | kind.flag())
    }
}

/// A driver's published fast-path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FastIoTable {
    /// Declared size of the table in bytes, header included.
    pub size_of_table: usize,
    /// Populated slots.
    pub supported: FastIoSet,
}

impl FastIoTable {
    /// Width of one slot.
    pub const SLOT_WIDTH: usize = size_of::<usize>();

    /// Number of slots in the current layout, reserved ones included.
    pub const SLOT_COUNT: usize = 27;

    /// Size of the header preceding slot 0.
    pub const HEADER_SIZE: usize = Self::SLOT_WIDTH;

    /// Size of a table of the current layout.
    pub const FULL_SIZE: usize = Self::size_for_slots(Self::SLOT_COUNT);

    /// Declared size of a table that reaches exactly `slots` slots.
    #[inline]
    pub const fn size_for_slots(slots: usize) -> usize {
        Self::HEADER_SIZE + slots * Self::SLOT_WIDTH
    }

    /// Byte offset of the slot for `kind`.
    #[inline]
    pub const fn slot_offset(kind: FastIoKind) -> usize {
        Self::HEADER_SIZE + kind.slot() * Self::SLOT_WIDTH
    }

    /// A table of the current layout.
    pub const fn full(supported: FastIoSet) -> Self {
        Self {
            size_of_table: Self::FULL_SIZE,
            supported,
        }
    }

    /// A table that declares `size_of_table` bytes.
    pub const fn with_declared_size(supported: FastIoSet, size_of_table: usize) -> Self {
        Self {
            size_of_table,
            supported,
        }
    }

    /// Returns `true` if the declared size reaches the slot for `kind`.
    #[inline]
    pub const fn covers(&self, kind: FastIoKind) -> bool {
        self.size_of_table >= Self::slot_offset(kind) + Self::SLOT_WIDTH
    }

    /// Safe probe: may the handler for `kind` in `table` be called?
    pub fn handler_valid(table: Option<&FastIoTable>, kind: FastIoKind) -> bool {
        match table {
            Some(table) => table.covers(kind) && table.supported.supports(kind),
            None => false,
        }
    }
}

/// Arguments of one fast-path call.
///
/// Forwarding passes the value through untouched; only the target node
/// changes. Output arguments are `&mut` borrows of the caller's storage.
#[derive(Debug)]
pub enum FastIoCall<'a> {
    /// See [`FastIoKind::CheckIfPossible`].
    CheckIfPossible {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Caller may block.
        wait: bool,
        /// Byte-range lock key.
        lock_key: u32,
        /// Checking for a read rather than a write.
        check_for_read: bool,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::Read`].
    Read {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Caller may block.
        wait: bool,
        /// Byte-range lock key.
        lock_key: u32,
        /// Destination.
        buffer: &'a mut [u8],
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::Write`].
    Write {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Caller may block.
        wait: bool,
        /// Byte-range lock key.
        lock_key: u32,
        /// Source.
        buffer: &'a [u8],
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::QueryBasicInfo`].
    QueryBasicInfo {
        /// File.
        file: &'a FileObject,
        /// Caller may block.
        wait: bool,
        /// Destination.
        info: &'a mut FileBasicInformation,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::QueryStandardInfo`].
    QueryStandardInfo {
        /// File.
        file: &'a FileObject,
        /// Caller may block.
        wait: bool,
        /// Destination.
        info: &'a mut FileStandardInformation,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::Lock`].
    Lock {
        /// File.
        file: &'a FileObject,
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        length: u64,
        /// Owning process.
        process: ProcessId,
        /// Lock key.
        key: u32,
        /// Fail instead of waiting.
        fail_immediately: bool,
        /// Exclusive rather than shared.
        exclusive: bool,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::UnlockSingle`].
    UnlockSingle {
        /// File.
        file: &'a FileObject,
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        length: u64,
        /// Owning process.
        process: ProcessId,
        /// Lock key.
        key: u32,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::UnlockAll`].
    UnlockAll {
        /// File.
        file: &'a FileObject,
        /// Owning process.
        process: ProcessId,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::UnlockAllByKey`].
    UnlockAllByKey {
        /// File.
        file: &'a FileObject,
        /// Owning process.
        process: ProcessId,
        /// Lock key.
        key: u32,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::DeviceControl`].
    DeviceControl {
        /// File.
        file: &'a FileObject,
        /// Caller may block.
        wait: bool,
        /// Input payload.
        input: Option<&'a [u8]>,
        /// Output payload.
        output: Option<&'a mut [u8]>,
        /// Control code.
        control_code: u32,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::QueryNetworkOpenInfo`].
    QueryNetworkOpenInfo {
        /// File.
        file: &'a FileObject,
        /// Caller may block.
        wait: bool,
        /// Destination.
        info: &'a mut FileNetworkOpenInformation,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::MdlRead`].
    MdlRead {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Byte-range lock key.
        lock_key: u32,
        /// Receives the page list.
        mdl: &'a mut Option<Mdl>,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::MdlReadComplete`].
    MdlReadComplete {
        /// File.
        file: &'a FileObject,
        /// Page list returned by the read.
        mdl: &'a Mdl,
    },
    /// See [`FastIoKind::PrepareMdlWrite`].
    PrepareMdlWrite {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Byte-range lock key.
        lock_key: u32,
        /// Receives the page list.
        mdl: &'a mut Option<Mdl>,
        /// Result.
        status: &'a mut IoStatus,
    },
    /// See [`FastIoKind::MdlWriteComplete`].
    MdlWriteComplete {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Page list being committed.
        mdl: &'a Mdl,
    },
    /// See [`FastIoKind::ReadCompressed`].
    ReadCompressed {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Byte-range lock key.
        lock_key: u32,
        /// Destination.
        buffer: &'a mut [u8],
        /// Receives the page list.
        mdl: &'a mut Option<Mdl>,
        /// Result.
        status: &'a mut IoStatus,
        /// Receives compression parameters.
        compressed: &'a mut CompressedDataInfo,
    },
    /// See [`FastIoKind::WriteCompressed`].
    WriteCompressed {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Byte count.
        length: u32,
        /// Byte-range lock key.
        lock_key: u32,
        /// Source.
        buffer: &'a [u8],
        /// Receives the page list.
        mdl: &'a mut Option<Mdl>,
        /// Result.
        status: &'a mut IoStatus,
        /// Compression parameters of `buffer`.
        compressed: &'a CompressedDataInfo,
    },
    /// See [`FastIoKind::MdlReadCompleteCompressed`].
    MdlReadCompleteCompressed {
        /// File.
        file: &'a FileObject,
        /// Page list returned by the read.
        mdl: &'a Mdl,
    },
    /// See [`FastIoKind::MdlWriteCompleteCompressed`].
    MdlWriteCompleteCompressed {
        /// File.
        file: &'a FileObject,
        /// Byte offset.
        offset: u64,
        /// Page list being committed.
        mdl: &'a Mdl,
    },
    /// See [`FastIoKind::QueryOpen`].
    ///
    /// The request's addressed node must equal the node the call is made on.
    QueryOpen {
        /// The open request being short-circuited.
        request: &'a mut Request,
        /// Destination.
        info: &'a mut FileNetworkOpenInformation,
    },
}

impl FastIoCall<'_> {
    /// The kind of this call.
    pub fn kind(&self) -> FastIoKind {
        match self {
            FastIoCall::CheckIfPossible { .. } => FastIoKind::CheckIfPossible,
            FastIoCall::Read { .. } => FastIoKind::Read,
            FastIoCall::Write { .. } => FastIoKind::Write,
            FastIoCall::QueryBasicInfo { .. } => FastIoKind::QueryBasicInfo,
            FastIoCall::QueryStandardInfo { .. } => FastIoKind::QueryStandardInfo,
            FastIoCall::Lock { .. } => FastIoKind::Lock,
            FastIoCall::UnlockSingle { .. } => FastIoKind::UnlockSingle,
            FastIoCall::UnlockAll { .. } => FastIoKind::UnlockAll,
            FastIoCall::UnlockAllByKey { .. } => FastIoKind::UnlockAllByKey,
            FastIoCall::DeviceControl { .. } => FastIoKind::DeviceControl,
            FastIoCall::QueryNetworkOpenInfo { .. } => FastIoKind::QueryNetworkOpenInfo,
            FastIoCall::MdlRead { .. } => FastIoKind::MdlRead,
            FastIoCall::MdlReadComplete { .. } => FastIoKind::MdlReadComplete,
            FastIoCall::PrepareMdlWrite { .. } => FastIoKind::PrepareMdlWrite,
            FastIoCall::MdlWriteComplete { .. } => FastIoKind::MdlWriteComplete,
            FastIoCall::ReadCompressed { .. } => FastIoKind::ReadCompressed,
            FastIoCall::WriteCompressed { .. } => FastIoKind::WriteCompressed,
            FastIoCall::MdlReadCompleteCompressed { .. } => FastIoKind::MdlReadCompleteCompressed,
            FastIoCall::MdlWriteCompleteCompressed { .. } => FastIoKind::MdlWriteCompleteCompressed,
            FastIoCall::QueryOpen { .. } => FastIoKind::QueryOpen,
        }
    }
}
