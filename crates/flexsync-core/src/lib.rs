//! flexsync-core: errors, events, and guarded state cells for flexsync.
//!
//! This crate holds the protocol-agnostic pieces shared by the SmartSDR
//! backend, the test harness, and applications: the [`Error`] type, the
//! session and discovery event enums, and [`ConcurrentProperty`], the guarded
//! cell every shared field of the object graph is stored in.
//!
//! # Key types
//!
//! - [`ConcurrentProperty`] -- multi-reader/single-writer state cell
//! - [`RadioEvent`] / [`DiscoveryEvent`] -- asynchronous notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod property;

pub use error::{Error, Result};
pub use events::{ClientSession, DiscoveryEvent, RadioEvent, ResourceKind};
pub use property::{ConcurrentProperty, ObserverId, PropertyChange};
