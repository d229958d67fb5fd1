//! # stackfilter
//!
//! Attachable **filter nodes for ordered device stacks**.
//!
//! A device stack is a chain of nodes servicing one resource (a mounted
//! volume, a keyboard). Requests enter at the top and travel down. This
//! crate inserts one filter node per stack, forwards everything that reaches
//! it and takes every node out again on unload.
//!
//! ---
//!
//! ## Quick Start
//!
//! ```rust
//! use stackfilter::{
//!     Characteristics, DeviceHost, DeviceType, DriverId, FilterConfig, MemoryHost, NodeFlags,
//!     StackFilter,
//! };
//!
//! let host = MemoryHost::new();
//! let fs = DriverId::new("Fs");
//! host.add_terminal_driver(&fs);
//! let control = host
//!     .create_node(&fs, DeviceType::DiskFileSystem, NodeFlags::empty(), Characteristics::empty())
//!     .unwrap();
//! let volume = host
//!     .create_node(&fs, DeviceType::DiskFileSystem, NodeFlags::DIRECT_IO, Characteristics::empty())
//!     .unwrap();
//!
//! let filter = StackFilter::new(FilterConfig::default()).unwrap();
//! filter.load(&host).unwrap();
//!
//! // The file system announces itself: the filter attaches to it and to its volumes.
//! assert!(host.activate_class(control).is_empty());
//! assert!(filter.is_attached(&host, control));
//! assert!(filter.is_attached(&host, volume));
//!
//! let report = filter.unload(&host).unwrap();
//! assert_eq!(report.detached, 2);
//! ```
//!
//! ---
//!
//! ## Core Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`StackFilter`] | The filter driver: attach, dispatch, fast path, unload |
//! | [`DeviceHost`] | Primitives consumed from the stack owner |
//! | [`Driver`] | What every node owner implements |
//! | [`MemoryHost`] | In-process host with fault injection and a simulated clock |
//! | [`Request`] | A request with per-level stack locations and completion routines |
//! | [`FastIoTable`] | Declared-size capability table with a safe probe |
//! | [`QuiesceCounter`] | In-flight completion count teardown waits on |
//! | [`FilterConfig`] | Retry bounds, delays, notification and logging toggles |
//! | [`FilterError`] | Error type with node and driver context |
//!
//! ---
//!
//! ## Two Paths
//!
//! ```text
//! request path:  host.call(top) ──▶ StackFilter::dispatch ──▶ host.call(lower) ──▶ ...
//! fast path:     StackFilter::fast_io ──probe──▶ lower table ──▶ lower fast_io | false
//! ```
//!
//! The request path always forwards. The fast path forwards only when the
//! lower driver's table is large enough to hold the slot and the slot is
//! populated; otherwise it answers `false` and the host falls back to the
//! request path.
//!
//! ---
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync` and take `&self`. The request and fast
//! paths resolve the node below from host state and take no filter lock.
//! The filter's own node table sits behind a `RwLock` and only serves
//! attachment and teardown bookkeeping. No filter lock is held while
//! calling into the host.
//!
//! ---
//!
//! ## Logging
//!
//! Events go through the [`log`](https://docs.rs/log) facade: attach, detach,
//! unload, opened files and keystrokes at `info`, routing decisions at
//! `debug`, swallowed failures at `warn`, fast-path forwards at `trace`.
//!
//! ---
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | Serialization for [`FilterConfig`] and plain data types, plus JSON helpers |

// Private modules
mod config;
mod enumeration;
mod error;
mod ext;
mod fast_io;
mod filter;
mod memory;
mod quiesce;
mod request;
mod traits;
mod types;

// Public re-exports - error types
pub use error::FilterError;

// Public re-exports - core types
pub use types::{
    Characteristics, CompressedDataInfo, DeviceType, DriverId, FileBasicInformation,
    FileNetworkOpenInformation, FileObject, FileStandardInformation, IoStatus, KeyFlags,
    KeyboardInputData, Mdl, NodeFlags, NodeId, NodeInfo, ProcessId, Status,
};

// Public re-exports - requests
pub use request::{AddressOverride, CompletionRoutine, MajorFunction, Request, StackLocation};

// Public re-exports - fast path
pub use fast_io::{FastIoCall, FastIoKind, FastIoSet, FastIoTable};

// Public re-exports - traits
pub use traits::{DeviceHost, Driver, NodeRef};

// Public re-exports - filter
pub use filter::{ClassAttachReport, FilterNode, FilterState, StackFilter, TeardownReport};

// Public re-exports - infrastructure
pub use config::FilterConfig;
pub use enumeration::{ENUMERATION_CAPACITY, Enumerated, EnumerationBuffer};
pub use ext::DeviceHostExt;
pub use memory::MemoryHost;
pub use quiesce::QuiesceCounter;
