//! # Stack Traits
//!
//! The two seams of a device stack.
//!
//! | Trait | Implemented by | Role |
//! |-------|----------------|------|
//! | [`DeviceHost`] | the stack owner ([`MemoryHost`](crate::MemoryHost)) | nodes, chains, enumeration, request delivery |
//! | [`Driver`] | every node owner ([`StackFilter`](crate::StackFilter), volumes, class drivers) | request path, fast path, notifications |
//!
//! ```text
//! DeviceHost::call(target, request)
//!        │
//!        ▼
//! Driver::dispatch(host, target, request) ──▶ DeviceHost::call(lower, request) ──▶ ...
//! ```
//!
//! ## Object Safety
//!
//! Both traits are object-safe; drivers receive the host as `&dyn DeviceHost`
//! and hosts store drivers as `Arc<dyn Driver>`.

mod driver;
mod host;

pub use driver::Driver;
pub use host::{DeviceHost, NodeRef};
