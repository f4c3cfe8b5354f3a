//! flexsync-test-harness: a mock SmartSDR radio and VITA-49 packet builders
//! for flexsync tests.
//!
//! [`MockRadio`] listens on a loopback TCP port, performs the version/handle
//! handshake, answers commands according to simple prefix rules and lets a
//! test push status lines or close the connection. The [`vita`] module
//! builds stream and discovery datagrams byte by byte, independently of the
//! codec under test.

pub mod mock_radio;
pub mod vita;

pub use mock_radio::{MockRadio, RecordedCommand};
