//! TCP command channel: connect, handshake, sequenced sends, reply
//! correlation.
//!
//! [`CommandChannel`] owns the write half of the SmartSDR TCP connection.
//! Every command gets the next sequence number of the connection; the number
//! is assigned and the line written while one lock is held, so sequence
//! order on the wire always matches assignment order. A reply handler, if
//! any, is registered before the bytes are written and is invoked exactly
//! once when the matching `R<seq>|...` line arrives.
//!
//! Reading is not done here. The session's TCP receive task hands each
//! decoded reply to [`CommandChannel::dispatch_reply`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};

use flexsync_core::{Error, Result};

use crate::codec::{self, InboundLine, ReplyLine, SmartSdrVersion};

/// Default time allowed for a `request()` reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Default time allowed for TCP connect plus the version/handle handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Boxed read side of a radio connection.
pub type BoxedReader = Box<dyn AsyncBufRead + Unpin + Send + 'static>;

/// Boxed write side of a radio connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send + 'static>;

/// Callback invoked once with the reply to a command.
pub type ReplyHandler = Box<dyn FnOnce(Reply) + Send + 'static>;

/// The radio's answer to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Command text as it was sent (without the `C<seq>|` prefix).
    pub command: String,
    /// Sequence number the command was sent with.
    pub sequence: u64,
    /// Response code; zero is success.
    pub code: u32,
    /// Reply text.
    pub text: String,
}

impl Reply {
    /// Whether the radio reported success.
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// Convert a non-zero code into [`Error::Command`].
    pub fn into_result(self) -> Result<String> {
        if self.code == 0 {
            Ok(self.text)
        } else {
            Err(Error::Command {
                code: self.code,
                message: self.text,
            })
        }
    }
}

struct PendingCommand {
    command: String,
    handler: ReplyHandler,
}

struct WriterState {
    writer: Option<BoxedWriter>,
    next_seq: u64,
}

/// Sequenced command writer with reply correlation.
pub struct CommandChannel {
    writer: Mutex<WriterState>,
    pending: StdMutex<HashMap<u64, PendingCommand>>,
    connected: AtomicBool,
    command_timeout: Duration,
}

impl CommandChannel {
    /// Wrap the write half of an established connection.
    pub fn new(writer: BoxedWriter, command_timeout: Duration) -> Self {
        CommandChannel {
            writer: Mutex::new(WriterState {
                writer: Some(writer),
                next_seq: 0,
            }),
            pending: StdMutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            command_timeout,
        }
    }

    /// Whether the channel can still send.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of commands still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.pending_table().len()
    }

    /// Send `text` as `C<seq>|<text>`. Returns the assigned sequence number.
    pub async fn send(&self, text: &str, handler: Option<ReplyHandler>) -> Result<u64> {
        self.send_framed(text, handler, false).await
    }

    /// Send `text` as a diagnostic command, `CD<seq>|<text>`.
    pub async fn send_diagnostic(&self, text: &str, handler: Option<ReplyHandler>) -> Result<u64> {
        self.send_framed(text, handler, true).await
    }

    /// Send `text` and wait for its reply.
    ///
    /// The wait is bounded by the channel's command timeout. A non-zero code
    /// is returned inside the [`Reply`]; use [`Reply::into_result`] to turn it
    /// into an error.
    pub async fn request(&self, text: &str) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let handler: ReplyHandler = Box::new(move |reply| {
            let _ = tx.send(reply);
        });
        let seq = self.send(text, Some(handler)).await?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.forget(seq);
                tracing::debug!(seq, command = %text, "command timed out");
                Err(Error::Timeout)
            }
        }
    }

    async fn send_framed(
        &self,
        text: &str,
        handler: Option<ReplyHandler>,
        diagnostic: bool,
    ) -> Result<u64> {
        let mut state = self.writer.lock().await;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let seq = state.next_seq;
        let w = state.writer.as_mut().ok_or(Error::NotConnected)?;

        if let Some(handler) = handler {
            self.pending_table().insert(
                seq,
                PendingCommand {
                    command: text.to_string(),
                    handler,
                },
            );
        }

        let encoded = if diagnostic {
            codec::encode_diagnostic_command(seq, text)
        } else {
            codec::encode_command(seq, text)
        };
        tracing::trace!(seq, command = %text, diagnostic, "sending command");

        let written = async {
            w.write_all(&encoded).await?;
            w.flush().await
        }
        .await;
        if let Err(e) = written {
            self.pending_table().remove(&seq);
            return Err(Error::Transport(format!("failed to send command: {e}")));
        }

        state.next_seq += 1;
        Ok(seq)
    }

    /// Route a decoded reply to the handler registered for its sequence
    /// number.
    ///
    /// Returns `false` when nothing was waiting; such replies are logged and
    /// dropped.
    pub fn dispatch_reply(&self, reply: ReplyLine) -> bool {
        let entry = self.pending_table().remove(&reply.sequence);
        match entry {
            Some(pending) => {
                tracing::trace!(seq = reply.sequence, code = reply.code, "reply received");
                (pending.handler)(Reply {
                    command: pending.command,
                    sequence: reply.sequence,
                    code: reply.code,
                    text: reply.message,
                });
                true
            }
            None => {
                tracing::debug!(seq = reply.sequence, "reply for unknown sequence dropped");
                false
            }
        }
    }

    /// Drop the handler waiting on `seq` without running it. Returns whether
    /// one was registered; a reply arriving later is dropped as unknown.
    pub fn forget(&self, seq: u64) -> bool {
        self.pending_table().remove(&seq).is_some()
    }

    /// Mark the connection lost: later sends fail and waiting commands are
    /// discarded without their handlers running.
    pub fn connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let discarded = {
            let mut pending = self.pending_table();
            let n = pending.len();
            pending.clear();
            n
        };
        if discarded > 0 {
            tracing::debug!(discarded, "pending commands discarded");
        }
    }

    /// Close the write half and discard waiting commands.
    pub async fn disconnect(&self) {
        self.connection_lost();
        let mut state = self.writer.lock().await;
        if let Some(mut w) = state.writer.take() {
            let _ = w.shutdown().await;
        }
    }

    fn pending_table(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Connect + handshake
// ---------------------------------------------------------------------------

/// An established, handshaken connection.
pub struct Connected {
    /// Buffered read side, positioned after the handle line.
    pub reader: BoxedReader,
    /// Write side.
    pub writer: BoxedWriter,
    /// Firmware version from the `V` line.
    pub version: SmartSdrVersion,
    /// Client handle from the `H` line.
    pub handle: u32,
}

/// Opens TCP connections to a radio, one attempt at a time.
#[derive(Debug, Default)]
pub struct Connector {
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an attempt is currently running.
    pub fn is_connecting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Connect to `host:port` and read the version and handle lines.
    ///
    /// The whole attempt is bounded by `timeout`. A second call while one is
    /// running fails with [`Error::ConnectInProgress`].
    pub async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<Connected> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::ConnectInProgress);
        }
        let _guard = InFlight(&self.in_flight);

        let addr = format!("{host}:{port}");
        tracing::debug!(addr = %addr, "connecting to radio");

        tokio::time::timeout(timeout, async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| Error::Transport(format!("TCP connect to {addr} failed: {e}")))?;
            let _ = stream.set_nodelay(true);
            let (read_half, write_half) = stream.into_split();
            handshake(BufReader::new(read_half), write_half).await
        })
        .await
        .map_err(|_| Error::Timeout)?
    }
}

/// Read the `V` and `H` handshake lines from an arbitrary stream pair.
pub async fn handshake<R, W>(reader: R, writer: W) -> Result<Connected>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader: BoxedReader = Box::new(reader);

    let version = match codec::parse_line(&read_handshake_line(&mut reader).await?)? {
        InboundLine::Version(v) => v,
        other => {
            return Err(Error::Protocol(format!(
                "expected version line, got: {other:?}"
            )));
        }
    };
    tracing::debug!(version = %version, "radio version received");

    let handle = match codec::parse_line(&read_handshake_line(&mut reader).await?)? {
        InboundLine::Handle(h) => h,
        other => {
            return Err(Error::Protocol(format!(
                "expected handle line, got: {other:?}"
            )));
        }
    };
    tracing::debug!(handle = format!("0x{:08X}", handle), "client handle received");

    Ok(Connected {
        reader,
        writer: Box::new(writer),
        version,
        handle,
    })
}

/// Wrap a raw reader for [`handshake`].
pub fn buffered<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> BufReader<R> {
    BufReader::new(reader)
}

async fn read_handshake_line(reader: &mut BoxedReader) -> Result<String> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Transport(format!("handshake read error: {e}")))?;
        if n == 0 {
            return Err(Error::ConnectionLost);
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
