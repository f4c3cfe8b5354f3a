//! A connected radio session.
//!
//! [`Radio`] owns everything attached to one SmartSDR connection: the
//! [`CommandChannel`], the [`ObjectGraph`] with its [`StatusRouter`], the
//! [`StreamDemux`], the [`KeepAlive`] supervisor and the event channel. It
//! runs two background tasks:
//!
//! - the TCP receive task, which reads lines in arrival order and hands
//!   replies to the command channel and status lines to the router;
//! - the UDP receive task, which feeds VITA-49 datagrams to the demux.
//!
//! Sessions are created with [`RadioBuilder`](crate::builder::RadioBuilder).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use flexsync_core::{Error, RadioEvent, Result};

use crate::codec::{self, InboundLine, SmartSdrVersion};
use crate::command::{BoxedReader, CommandChannel, Connected, Reply, ReplyHandler};
use crate::keepalive::{KeepAlive, KeepAliveConfig};
use crate::model::ObjectGraph;
use crate::status::StatusRouter;
use crate::stream::{DemuxCounters, StreamDemux};

/// Default client program name.
pub const DEFAULT_CLIENT_NAME: &str = "flexsync";

/// Default SmartSDR VITA-49 UDP port.
pub const DEFAULT_UDP_PORT: u16 = 4991;

/// Subscriptions sent after connecting unless overridden.
pub const DEFAULT_SUBSCRIPTIONS: &[&str] = &[
    "slice all",
    "pan all",
    "meter all",
    "client all",
    "audio_stream all",
    "daxiq all",
];

/// Options for a session, applied once the handshake has completed.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Program name sent with `client program`.
    pub client_name: String,
    /// Timeout for [`Radio::request`].
    pub command_timeout: Duration,
    /// Local UDP port for VITA-49 streams. `None` disables the UDP receiver;
    /// `Some(0)` picks an ephemeral port.
    pub udp_port: Option<u16>,
    /// Objects to subscribe to (`sub <object>`).
    pub subscriptions: Vec<String>,
    pub keepalive: KeepAliveConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            command_timeout: crate::command::DEFAULT_COMMAND_TIMEOUT,
            udp_port: Some(DEFAULT_UDP_PORT),
            subscriptions: DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect(),
            keepalive: KeepAliveConfig::default(),
        }
    }
}

/// A connected SmartSDR client session.
pub struct Radio {
    channel: Arc<CommandChannel>,
    graph: Arc<ObjectGraph>,
    demux: Arc<StreamDemux>,
    keepalive: Arc<KeepAlive>,
    events: broadcast::Sender<RadioEvent>,
    version: SmartSdrVersion,
    handle: u32,
    udp_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Radio {
    /// Start a session over an established connection.
    pub(crate) async fn start(
        connected: Connected,
        options: ClientOptions,
        events: broadcast::Sender<RadioEvent>,
    ) -> Result<Radio> {
        let Connected {
            reader,
            writer,
            version,
            handle,
        } = connected;

        let channel = Arc::new(CommandChannel::new(writer, options.command_timeout));
        let graph = Arc::new(ObjectGraph::new());
        let router = StatusRouter::new(Arc::clone(&graph), events.clone());
        let demux = Arc::new(StreamDemux::new());
        let keepalive = KeepAlive::new(options.keepalive.clone(), events.clone());
        let cancel = CancellationToken::new();

        let udp = match options.udp_port {
            Some(port) => {
                let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
                let socket = UdpSocket::bind(addr).await.map_err(|e| {
                    Error::Transport(format!("failed to bind UDP socket on {addr}: {e}"))
                })?;
                let local = socket.local_addr()?;
                tracing::debug!(port = local.port(), "UDP stream receiver bound");
                Some((socket, local))
            }
            None => None,
        };
        let udp_addr = udp.as_ref().map(|(_, a)| *a);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(tcp_read_loop(
            reader,
            Arc::clone(&channel),
            router,
            events.clone(),
            cancel.clone(),
        )));
        if let Some((socket, _)) = udp {
            tasks.push(tokio::spawn(udp_read_loop(
                socket,
                Arc::clone(&graph),
                Arc::clone(&demux),
                cancel.clone(),
            )));
        }

        let radio = Radio {
            channel,
            graph,
            demux,
            keepalive,
            events,
            version,
            handle,
            udp_addr,
            cancel,
            tasks: Mutex::new(tasks),
        };

        radio.register(&options).await?;
        let _ = radio.events.send(RadioEvent::Connected { handle });

        if options.keepalive.enabled {
            let task = radio
                .keepalive
                .start(Arc::clone(&radio.channel), radio.cancel.child_token());
            radio.task_list().push(task);
        }

        tracing::debug!(
            handle = format!("0x{:08X}", handle),
            version = %radio.version,
            "radio session started"
        );
        Ok(radio)
    }

    async fn register(&self, options: &ClientOptions) -> Result<()> {
        self.send(&codec::cmd_client_program(&options.client_name))
            .await?;
        if let Some(addr) = self.udp_addr {
            self.send(&codec::cmd_client_udpport(addr.port())).await?;
        }
        for sub in &options.subscriptions {
            self.send(&codec::cmd_subscribe(sub)).await?;
        }
        Ok(())
    }

    fn task_list(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a command without waiting for its reply. Returns the sequence
    /// number it was sent with.
    pub async fn send(&self, text: &str) -> Result<u64> {
        self.channel.send(text, None).await
    }

    /// Send a command; `on_reply` runs once on the TCP receive task when
    /// the reply arrives.
    pub async fn send_with_reply(
        &self,
        text: &str,
        on_reply: impl FnOnce(Reply) + Send + 'static,
    ) -> Result<u64> {
        let handler: ReplyHandler = Box::new(on_reply);
        self.channel.send(text, Some(handler)).await
    }

    /// Send a diagnostic (`CD`) command.
    pub async fn send_diagnostic(&self, text: &str) -> Result<u64> {
        self.channel.send_diagnostic(text, None).await
    }

    /// Send a command and wait for its reply, whatever the code.
    pub async fn request(&self, text: &str) -> Result<Reply> {
        self.channel.request(text).await
    }

    /// Send a command and return its reply text; a non-zero code becomes
    /// [`Error::Command`].
    pub async fn command(&self, text: &str) -> Result<String> {
        self.request(text).await?.into_result()
    }

    /// Tune a slice.
    pub async fn tune_slice(&self, slice_index: u32, freq_hz: u64) -> Result<()> {
        self.command(&codec::cmd_slice_tune(slice_index, freq_hz))
            .await
            .map(drop)
    }

    /// Create a slice; returns the index the radio assigned.
    pub async fn create_slice(&self, freq_hz: u64, mode: &str) -> Result<u32> {
        let text = self.command(&codec::cmd_slice_create(freq_hz, mode)).await?;
        text.trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("unexpected slice create reply: {text:?}")))
    }

    pub async fn remove_slice(&self, slice_index: u32) -> Result<()> {
        self.command(&codec::cmd_slice_remove(slice_index))
            .await
            .map(drop)
    }

    /// Request a DAX receive audio stream; returns its stream id.
    pub async fn create_dax_rx_stream(&self, dax_channel: u8) -> Result<u32> {
        let text = self
            .command(&codec::cmd_stream_create_dax_rx(dax_channel))
            .await?;
        codec::parse_hex_u32(text.trim())
            .ok_or_else(|| Error::Protocol(format!("unexpected stream create reply: {text:?}")))
    }

    pub async fn remove_stream(&self, stream_id: u32) -> Result<()> {
        self.command(&codec::cmd_stream_remove(stream_id))
            .await
            .map(drop)
    }

    /// The object graph kept in sync with the radio's status stream.
    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.graph
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }

    /// Firmware version from the handshake.
    pub fn version(&self) -> &SmartSdrVersion {
        &self.version
    }

    /// Client handle assigned by the radio.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Local address of the UDP stream receiver, if enabled.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.udp_addr
    }

    pub fn keepalive(&self) -> &Arc<KeepAlive> {
        &self.keepalive
    }

    pub fn demux_counters(&self) -> DemuxCounters {
        self.demux.counters()
    }

    /// Commands still waiting for a reply.
    pub fn pending_commands(&self) -> usize {
        self.channel.pending_count()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// Close the connection and stop the background tasks.
    ///
    /// Waiting commands are discarded. Subscribers receive
    /// [`RadioEvent::Disconnected`] unless the connection had already
    /// dropped.
    pub async fn disconnect(&self) {
        tracing::debug!("disconnecting radio session");
        self.channel.disconnect().await;
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.task_list().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for Radio {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tcp_read_loop(
    mut reader: BoxedReader,
    channel: Arc<CommandChannel>,
    router: StatusRouter,
    events: broadcast::Sender<RadioEvent>,
    cancel: CancellationToken,
) {
    let mut buf = Vec::with_capacity(1024);
    let reason = loop {
        buf.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break "disconnected by client".to_string(),
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break "connection closed by radio".to_string(),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim();
                if !line.is_empty() {
                    dispatch_line(line, &channel, &router);
                }
            }
            Err(e) => break format!("TCP read error: {e}"),
        }
    };

    tracing::debug!(reason = %reason, "TCP receive task ending");
    channel.connection_lost();
    cancel.cancel();
    let _ = events.send(RadioEvent::Disconnected { reason });
}

fn dispatch_line(line: &str, channel: &CommandChannel, router: &StatusRouter) {
    match codec::parse_line(line) {
        Ok(InboundLine::Reply(reply)) => {
            channel.dispatch_reply(reply);
        }
        Ok(InboundLine::Status(status)) => {
            router.route(&status.payload);
        }
        Ok(InboundLine::Message { code, text }) => {
            tracing::debug!(code = format!("0x{:08X}", code), message = %text, "radio message");
        }
        Ok(InboundLine::Version(v)) => {
            tracing::warn!(version = %v, "unexpected version line after handshake");
        }
        Ok(InboundLine::Handle(h)) => {
            tracing::warn!(handle = format!("0x{:08X}", h), "unexpected handle line after handshake");
        }
        Ok(InboundLine::Unknown(line)) => {
            tracing::trace!(line = %line, "unknown line from radio");
        }
        Err(e) => {
            tracing::warn!(error = %e, line = %line, "malformed line skipped");
        }
    }
}

async fn udp_read_loop(
    socket: UdpSocket,
    graph: Arc<ObjectGraph>,
    demux: Arc<StreamDemux>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 65_536];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, _src)) => demux.handle_datagram(&graph, &buf[..n]),
                Err(e) => tracing::trace!(error = %e, "UDP recv error"),
            },
        }
    }
    tracing::trace!("UDP receive task ending");
}
