//! Asynchronous session and discovery event types.
//!
//! Events are emitted through [`tokio::sync::broadcast`] channels owned by
//! the radio session and the discovery service. Applications subscribe to
//! learn when objects appear in or leave the object graph, when the link
//! warms up or goes silent, and when radios or client sessions come and go
//! on the network.
//!
//! Delivery is best effort: a slow subscriber that lags behind the bounded
//! channel misses events rather than stalling the receive loops.

use std::fmt;

/// The category of a radio resource tracked in the object graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A tuning slice (independent receiver).
    Slice,
    /// A panadapter display with its FFT stream.
    Panadapter,
    /// A DAX receive audio stream.
    DaxAudioStream,
    /// A DAX IQ stream bound to a panadapter.
    DaxIqStream,
    /// A radio meter fed by VITA-49 meter packets.
    Meter,
    /// Another GUI client session attached to the radio.
    GuiClient,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Slice => "slice",
            ResourceKind::Panadapter => "panadapter",
            ResourceKind::DaxAudioStream => "dax audio stream",
            ResourceKind::DaxIqStream => "dax iq stream",
            ResourceKind::Meter => "meter",
            ResourceKind::GuiClient => "gui client",
        };
        f.write_str(s)
    }
}

/// An event emitted by a connected radio session.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// The TCP handshake completed.
    Connected {
        /// Client handle assigned by the radio.
        handle: u32,
    },

    /// The session ended: remote close, read error, or local disconnect.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },

    /// The first keepalive ping reply arrived after pinging started.
    LinkEstablished,

    /// No keepalive reply arrived within the silence window.
    ///
    /// The session does not close the socket on its own; callers are expected
    /// to tear the connection down.
    KeepAliveTimeout,

    /// An object reached its minimum viable field set. Fires once per object
    /// lifetime.
    ObjectAdded {
        /// Resource category.
        kind: ResourceKind,
        /// Resource-scoped identifier, formatted the way the radio formats it.
        id: String,
    },

    /// An object is about to be erased from the object graph.
    ObjectRemoving {
        /// Resource category.
        kind: ResourceKind,
        /// Resource-scoped identifier.
        id: String,
    },
}

/// A client session attached to a radio, as announced in discovery packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
    /// 32-bit client handle.
    pub handle: u32,
    /// Station name (spaces restored).
    pub station: String,
    /// Client program name (e.g. "SmartSDR-Win").
    pub program: String,
    /// Host name the client connected from.
    pub host: String,
    /// IP address the client connected from, when announced.
    pub ip: String,
}

/// An event emitted by the discovery service.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A radio was seen for the first time.
    RadioAdded {
        /// Radio serial number.
        serial: String,
        /// Whether the record was learned over WAN.
        is_wan: bool,
    },

    /// A radio record was removed (sweep expiry or explicit WAN removal).
    RadioRemoved {
        /// Radio serial number.
        serial: String,
        /// Whether the record was learned over WAN.
        is_wan: bool,
    },

    /// A client session appeared on a radio's roster.
    ClientAdded {
        /// Serial number of the radio the client is attached to.
        serial: String,
        /// The new session.
        client: ClientSession,
    },

    /// A client session left a radio's roster.
    ClientRemoved {
        /// Serial number of the radio the client was attached to.
        serial: String,
        /// The departed session.
        client: ClientSession,
    },
}
