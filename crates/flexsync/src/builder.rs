//! RadioBuilder -- fluent builder for [`Radio`] sessions.
//!
//! Separates configuration from construction so that callers can set up
//! network parameters, subscriptions and keepalive behaviour before the TCP
//! connection is opened.
//!
//! # Example
//!
//! ```no_run
//! use flexsync::builder::RadioBuilder;
//!
//! # async fn example() -> flexsync_core::Result<()> {
//! let builder = RadioBuilder::new().host("192.168.1.100");
//! let mut events = builder.subscribe();
//! let radio = builder.build().await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # drop(radio);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;

use flexsync_core::{Error, RadioEvent, Result};

use crate::command::{self, Connector, DEFAULT_CONNECT_TIMEOUT};
use crate::discovery::DiscoveredRadio;
use crate::keepalive::KeepAliveConfig;
use crate::session::{ClientOptions, Radio};

/// Default SmartSDR TCP command port.
pub const DEFAULT_TCP_PORT: u16 = 4992;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Pre-connected async streams for building a [`Radio`] without a real TCP
/// connection, e.g. from [`tokio::io::duplex()`] in tests.
///
/// The builder wraps `tcp_read` in a `BufReader`; pass a raw reader.
pub struct FlexTransports {
    pub tcp_read: Box<dyn AsyncRead + Unpin + Send + 'static>,
    pub tcp_write: Box<dyn AsyncWrite + Unpin + Send + 'static>,
}

/// Fluent builder for [`Radio`].
pub struct RadioBuilder {
    host: Option<String>,
    tcp_port: u16,
    connect_timeout: Duration,
    options: ClientOptions,
    events: broadcast::Sender<RadioEvent>,
}

impl RadioBuilder {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        RadioBuilder {
            host: None,
            tcp_port: DEFAULT_TCP_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            options: ClientOptions::default(),
            events,
        }
    }

    /// Set the radio's IP address or hostname.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Set the SmartSDR TCP command port (default: 4992).
    pub fn tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Set the local VITA-49 UDP port (default: 4991, 0 for ephemeral).
    pub fn udp_port(mut self, port: u16) -> Self {
        self.options.udp_port = Some(port);
        self
    }

    /// Do not open a UDP stream receiver.
    pub fn without_udp(mut self) -> Self {
        self.options.udp_port = None;
        self
    }

    /// Set the client program name (default: "flexsync").
    pub fn client_name(mut self, name: &str) -> Self {
        self.options.client_name = name.to_string();
        self
    }

    /// Set the reply timeout for request-style commands (default: 2s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = timeout;
        self
    }

    /// Bound on TCP connect plus handshake (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replace the subscription list sent after connecting.
    pub fn subscriptions<I, S>(mut self, subs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.subscriptions = subs.into_iter().map(Into::into).collect();
        self
    }

    pub fn keepalive(mut self, config: KeepAliveConfig) -> Self {
        self.options.keepalive = config;
        self
    }

    /// Set the keepalive ping period, keeping the other keepalive settings.
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.options.keepalive.period = period;
        self
    }

    /// Replace all session options at once.
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Configure host and port from a discovered radio.
    pub fn radio(mut self, radio: &DiscoveredRadio) -> Self {
        if let Some(ip) = radio.ip {
            self.host = Some(ip.to_string());
        }
        self.tcp_port = radio.port;
        self
    }

    /// Receive session events from the moment the connection is made,
    /// including [`RadioEvent::Connected`].
    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    fn validate(&self) -> Result<()> {
        if self.options.client_name.trim().is_empty() {
            return Err(Error::InvalidParameter("client name must not be empty".into()));
        }
        if self.options.keepalive.enabled && self.options.keepalive.period.is_zero() {
            return Err(Error::InvalidParameter("keepalive period must be non-zero".into()));
        }
        Ok(())
    }

    /// Connect to the radio and start the session.
    ///
    /// Requires [`host()`](Self::host) or [`radio()`](Self::radio).
    pub async fn build(self) -> Result<Radio> {
        self.validate()?;
        let host = self.host.as_deref().ok_or_else(|| {
            Error::InvalidParameter(
                "host is required: call .host() or .radio() before .build()".into(),
            )
        })?;

        let connected = Connector::new()
            .connect(host, self.tcp_port, self.connect_timeout)
            .await?;
        Radio::start(connected, self.options, self.events).await
    }

    /// Start a session over pre-connected streams. The handshake is read
    /// from `tcp_read` within the connect timeout.
    pub async fn build_with_transports(self, transports: FlexTransports) -> Result<Radio> {
        self.validate()?;
        let connected = tokio::time::timeout(
            self.connect_timeout,
            command::handshake(command::buffered(transports.tcp_read), transports.tcp_write),
        )
        .await
        .map_err(|_| Error::Timeout)??;
        Radio::start(connected, self.options, self.events).await
    }
}

impl Default for RadioBuilder {
    fn default() -> Self {
        Self::new()
    }
}
