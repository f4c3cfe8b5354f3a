//! FlexRadio SmartSDR synchronization engine.
//!
//! This crate keeps a local model of a FLEX-6000/8000 series radio in step
//! with the radio itself. It provides:
//!
//! - **Command channel** ([`command`]) -- sequence-numbered commands over
//!   TCP with reply correlation, bounded connect and handshake.
//! - **Keepalive** ([`keepalive`]) -- periodic pings and link-silence
//!   detection.
//! - **Object graph** ([`model`], [`status`]) -- slices, panadapters, DAX
//!   streams, meters and GUI clients created, updated and removed from
//!   `key=value` status lines by one generic lifecycle engine.
//! - **Streams** ([`stream`], [`vita49`]) -- VITA-49 decoding, class-code
//!   demultiplexing, per-stream loss counting and pooled frame delivery.
//! - **Discovery** ([`discovery`]) -- LAN announcement listener with radio
//!   roster and client-session diffing.
//! - **Session** ([`session`], [`builder`]) -- a [`Radio`] tying all of the
//!   above to one connection, built with [`RadioBuilder`].
//!
//! # Architecture
//!
//! The TCP receive task handles lines in arrival order: replies go to the
//! command channel, status lines to the status router. The UDP receive task
//! feeds the stream demux. The discovery task runs off its own socket. All
//! of them write into state held in
//! [`ConcurrentProperty`](flexsync_core::ConcurrentProperty) cells, which
//! applications read from any task.
//!
//! # Example
//!
//! ```no_run
//! use flexsync::{RadioBuilder, discovery};
//! use std::time::Duration;
//!
//! # async fn example() -> flexsync_core::Result<()> {
//! let radios = discovery::discover(Duration::from_secs(3)).await?;
//! if let Some(found) = radios.first() {
//!     let radio = RadioBuilder::new().radio(found).build().await?;
//!     for slice in radio.graph().slices().all() {
//!         println!("slice {} at {} Hz", slice.id(), slice.frequency_hz.read());
//!     }
//!     radio.disconnect().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod codec;
pub mod command;
pub mod discovery;
pub mod keepalive;
pub mod model;
pub mod session;
pub mod status;
pub mod stream;
pub mod vita49;

pub use builder::{FlexTransports, RadioBuilder};
pub use command::Reply;
pub use discovery::{DiscoveredRadio, Discovery, DiscoveryOptions};
pub use keepalive::KeepAliveConfig;
pub use model::ObjectGraph;
pub use session::{ClientOptions, Radio};
