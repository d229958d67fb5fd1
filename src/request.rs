//! # Requests
//!
//! A [`Request`] is one unit of work travelling down a device stack.
//!
//! ## Stack Locations
//!
//! Each level of the stack that sees the request gets a [`StackLocation`].
//! The location a driver is currently servicing is the *current* location;
//! its [`node`](StackLocation::node) is the request's addressed node.
//!
//! Before forwarding, a driver prepares the location the next level will use:
//!
//! | Call | Effect |
//! |------|--------|
//! | [`skip_current_location`](Request::skip_current_location) | Lower level reuses this location; no completion routine possible |
//! | [`copy_current_location_to_next`](Request::copy_current_location_to_next) | Lower level gets a copy; a completion routine may be set |
//!
//! ```text
//! originator ──▶ node#3 (filter) ──▶ node#2 (volume)
//!  location 0      location 0           location 1   (copied)
//!                  location 0           location 0   (skipped)
//! ```
//!
//! ## Completion
//!
//! [`Request::complete`] records the final status and runs the completion
//! routines from the deepest location up to location 0. A driver that
//! returns [`Status::Pending`] keeps the request and completes it later.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::{FileObject, IoStatus, NodeId, Status};

/// Request-path operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MajorFunction {
    /// Open a file or device.
    Create = 0x00,
    /// Create a named pipe.
    CreateNamedPipe = 0x01,
    /// Last handle closed and file object released.
    Close = 0x02,
    /// Read data.
    Read = 0x03,
    /// Write data.
    Write = 0x04,
    /// Query file information.
    QueryInformation = 0x05,
    /// Set file information.
    SetInformation = 0x06,
    /// Query extended attributes.
    QueryEa = 0x07,
    /// Set extended attributes.
    SetEa = 0x08,
    /// Flush buffers.
    FlushBuffers = 0x09,
    /// Query volume information.
    QueryVolumeInformation = 0x0a,
    /// Set volume information.
    SetVolumeInformation = 0x0b,
    /// Directory enumeration and change notification.
    DirectoryControl = 0x0c,
    /// File system control (mount, verify, ...).
    FileSystemControl = 0x0d,
    /// Device control.
    DeviceControl = 0x0e,
    /// Internal device control.
    InternalDeviceControl = 0x0f,
    /// System shutdown.
    Shutdown = 0x10,
    /// Byte-range locks.
    LockControl = 0x11,
    /// Last handle closed.
    Cleanup = 0x12,
    /// Create a mailslot.
    CreateMailslot = 0x13,
    /// Query a security descriptor.
    QuerySecurity = 0x14,
    /// Set a security descriptor.
    SetSecurity = 0x15,
    /// Power management.
    Power = 0x16,
    /// Management instrumentation.
    SystemControl = 0x17,
    /// Device change.
    DeviceChange = 0x18,
    /// Query quota.
    QueryQuota = 0x19,
    /// Set quota.
    SetQuota = 0x1a,
    /// Plug and play.
    Pnp = 0x1b,
}

impl MajorFunction {
    /// Every request-path operation, in code order.
    pub const ALL: [MajorFunction; 28] = [
        Self::Create,
        Self::CreateNamedPipe,
        Self::Close,
        Self::Read,
        Self::Write,
        Self::QueryInformation,
        Self::SetInformation,
        Self::QueryEa,
        Self::SetEa,
        Self::FlushBuffers,
        Self::QueryVolumeInformation,
        Self::SetVolumeInformation,
        Self::DirectoryControl,
        Self::FileSystemControl,
        Self::DeviceControl,
        Self::InternalDeviceControl,
        Self::Shutdown,
        Self::LockControl,
        Self::Cleanup,
        Self::CreateMailslot,
        Self::QuerySecurity,
        Self::SetSecurity,
        Self::Power,
        Self::SystemControl,
        Self::DeviceChange,
        Self::QueryQuota,
        Self::SetQuota,
        Self::Pnp,
    ];

    /// Numeric operation code.
    #[inline]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up an operation by code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

/// Routine run when the level below completes the request.
pub type CompletionRoutine = Box<dyn FnOnce(&mut Request) + Send>;

/// Per-level view of a request.
#[derive(Default)]
pub struct StackLocation {
    /// Node servicing this location, once the request reached it.
    pub node: Option<NodeId>,
    /// File the operation applies to.
    pub file: Option<FileObject>,
    completion: Option<CompletionRoutine>,
}

impl StackLocation {
    fn copied_from(other: &StackLocation) -> Self {
        Self {
            node: None,
            file: other.file.clone(),
            completion: None,
        }
    }

    /// Returns `true` if a completion routine is registered at this location.
    #[inline]
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }
}

impl fmt::Debug for StackLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackLocation")
            .field("node", &self.node)
            .field("file", &self.file)
            .field("completion", &self.completion.is_some())
            .finish()
    }
}

/// A unit of work flowing through a device stack.
///
/// # Example
///
/// ```rust
/// use stackfilter::{FileObject, MajorFunction, Request, Status};
///
/// let mut request = Request::new(MajorFunction::Create).with_file(FileObject::new("\\a.txt"));
/// assert_eq!(request.major(), MajorFunction::Create);
/// assert_eq!(request.complete(Status::Success, 0), Status::Success);
/// assert!(request.is_completed());
/// ```
pub struct Request {
    major: MajorFunction,
    locations: Vec<StackLocation>,
    current: usize,
    next: usize,
    buffer: Vec<u8>,
    io_status: IoStatus,
    completed: bool,
}

impl Request {
    /// Create a request for the given operation.
    pub fn new(major: MajorFunction) -> Self {
        Self {
            major,
            locations: vec![StackLocation::default()],
            current: 0,
            next: 0,
            buffer: Vec::new(),
            io_status: IoStatus::default(),
            completed: false,
        }
    }

    /// Attach a file object to the first location.
    pub fn with_file(mut self, file: FileObject) -> Self {
        self.locations[0].file = Some(file);
        self
    }

    /// Attach a system buffer.
    pub fn with_buffer(mut self, buffer: Vec<u8>) -> Self {
        self.buffer = buffer;
        self
    }

    /// Register a routine that runs once the whole request has completed.
    pub fn on_completion(mut self, routine: impl FnOnce(&mut Request) + Send + 'static) -> Self {
        self.locations[0].completion = Some(Box::new(routine));
        self
    }

    /// The operation code.
    #[inline]
    pub fn major(&self) -> MajorFunction {
        self.major
    }

    /// Index of the current location.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// The location being serviced.
    #[inline]
    pub fn current_location(&self) -> &StackLocation {
        &self.locations[self.current]
    }

    /// The node the request currently belongs to.
    #[inline]
    pub fn addressed(&self) -> Option<NodeId> {
        self.locations[self.current].node
    }

    /// Overwrite the node the current location belongs to.
    #[inline]
    pub fn set_addressed(&mut self, node: NodeId) {
        self.locations[self.current].node = Some(node);
    }

    /// File of the current location.
    #[inline]
    pub fn file(&self) -> Option<&FileObject> {
        self.locations[self.current].file.as_ref()
    }

    /// All locations, top level first.
    pub fn locations(&self) -> &[StackLocation] {
        &self.locations
    }

    /// The system buffer.
    #[inline]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Mutable system buffer.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// The final status block (meaningful once completed).
    #[inline]
    pub fn io_status(&self) -> IoStatus {
        self.io_status
    }

    /// Returns `true` once [`complete`](Self::complete) ran.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Let the next level reuse the current location.
    pub fn skip_current_location(&mut self) {
        self.next = self.current;
    }

    /// Give the next level its own copy of the current location.
    pub fn copy_current_location_to_next(&mut self) {
        let index = self.current + 1;
        let copy = StackLocation::copied_from(&self.locations[self.current]);
        if index < self.locations.len() {
            self.locations[index] = copy;
        } else {
            self.locations.push(copy);
        }
        self.next = index;
    }

    /// Register a routine that runs when the next level completes.
    ///
    /// Copies the current location to the next one first if that was not done.
    pub fn set_completion(&mut self, routine: impl FnOnce(&mut Request) + Send + 'static) {
        let index = self.current + 1;
        if self.next != index || index >= self.locations.len() {
            self.copy_current_location_to_next();
        }
        self.locations[index].completion = Some(Box::new(routine));
    }

    /// Move the request to the prepared location and address it to `node`.
    ///
    /// Hosts call this when handing the request to the next level.
    pub fn enter(&mut self, node: NodeId) {
        let index = self.next;
        if index >= self.locations.len() {
            let copy = StackLocation::copied_from(&self.locations[self.current]);
            self.locations.push(copy);
        }
        self.current = index;
        self.next = index + 1;
        self.locations[index].node = Some(node);
    }

    /// Complete the request and run completion routines bottom-up.
    ///
    /// Each routine sees the location of the level that registered it as
    /// the current location.
    ///
    /// Returns `status` for convenient tail calls from dispatch routines.
    pub fn complete(&mut self, status: Status, information: usize) -> Status {
        self.io_status = IoStatus {
            status,
            information,
        };
        self.completed = true;
        for index in (0..=self.current).rev() {
            if let Some(routine) = self.locations[index].completion.take() {
                // the routine runs in the context of the level that set it
                self.current = index.saturating_sub(1);
                routine(self);
            }
        }
        status
    }

    /// Temporarily address the current location to `target`.
    ///
    /// The returned guard dereferences to the request and writes `restore`
    /// back into the current location when dropped, whatever path the caller
    /// leaves by.
    pub fn redirect(&mut self, target: NodeId, restore: NodeId) -> AddressOverride<'_> {
        self.set_addressed(target);
        AddressOverride {
            request: self,
            restore,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("major", &self.major)
            .field("current", &self.current)
            .field("locations", &self.locations)
            .field("io_status", &self.io_status)
            .field("completed", &self.completed)
            .finish()
    }
}

/// Scoped override of a request's addressed node. See [`Request::redirect`].
pub struct AddressOverride<'a> {
    request: &'a mut Request,
    restore: NodeId,
}

impl Deref for AddressOverride<'_> {
    type Target = Request;

    fn deref(&self) -> &Request {
        self.request
    }
}

impl DerefMut for AddressOverride<'_> {
    fn deref_mut(&mut self) -> &mut Request {
        self.request
    }
}

impl Drop for AddressOverride<'_> {
    fn drop(&mut self) {
        self.request.set_addressed(self.restore);
    }
}
