//! Mock SmartSDR radio for session-level testing.
//!
//! [`MockRadio`] listens on a random loopback port and accepts a single
//! client. It sends the `V`/`H` handshake, records every command it
//! receives and answers each one with `R<seq>|0|` unless a rule says
//! otherwise.
//!
//! # Example
//!
//! ```
//! use flexsync_test_harness::MockRadio;
//!
//! # async fn example() -> flexsync_core::Result<()> {
//! let radio = MockRadio::start().await?;
//! radio.reply_to("slice create", 0, "1");
//! radio.push_status("slice 1 RF_frequency=14.074000 mode=DIGU");
//! // ... connect a client to radio.port() ...
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use flexsync_core::{Error, Result};

/// A command as received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    pub sequence: u64,
    /// Sent as `CD<seq>|...`.
    pub diagnostic: bool,
    pub text: String,
}

impl RecordedCommand {
    fn parse(line: &str) -> Option<Self> {
        let (head, text) = line.split_once('|')?;
        let (diagnostic, seq) = match head.strip_prefix("CD") {
            Some(seq) => (true, seq),
            None => (false, head.strip_prefix('C')?),
        };
        Some(RecordedCommand {
            sequence: seq.parse().ok()?,
            diagnostic,
            text: text.to_string(),
        })
    }
}

#[derive(Default)]
struct Rules {
    /// `(prefix, code, text)`; first match wins.
    replies: Vec<(String, u32, String)>,
    silenced: Vec<String>,
}

impl Rules {
    fn reply_for(&self, command: &str) -> Option<(u32, String)> {
        if self.silenced.iter().any(|p| command.starts_with(p.as_str())) {
            return None;
        }
        let rule = self
            .replies
            .iter()
            .find(|(prefix, _, _)| command.starts_with(prefix.as_str()));
        Some(match rule {
            Some((_, code, text)) => (*code, text.clone()),
            None => (0, String::new()),
        })
    }
}

enum Outbound {
    Line(String),
    Close,
}

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<RecordedCommand>>,
    rules: Mutex<Rules>,
    changed: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted SmartSDR server on a loopback port.
pub struct MockRadio {
    addr: SocketAddr,
    handle: u32,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: JoinHandle<()>,
}

impl MockRadio {
    /// Start a mock reporting version `1.4.0.0` and handle `0x12345678`.
    pub async fn start() -> Result<Self> {
        Self::start_with("1.4.0.0", 0x1234_5678).await
    }

    /// Start a mock with a specific handshake.
    pub async fn start_with(version: &str, handle: u32) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {e}")))?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let handshake = format!("V{version}\nH{handle:08X}\n");
        let task = tokio::spawn(serve(listener, handshake, Arc::clone(&shared), outbound_rx));

        Ok(MockRadio {
            addr,
            handle,
            shared,
            outbound,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Handle sent in the handshake.
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Answer commands starting with `prefix` with `code` and `text`.
    pub fn reply_to(&self, prefix: &str, code: u32, text: &str) {
        lock(&self.shared.rules)
            .replies
            .push((prefix.to_string(), code, text.to_string()));
    }

    /// Never answer commands starting with `prefix`.
    pub fn silence(&self, prefix: &str) {
        lock(&self.shared.rules).silenced.push(prefix.to_string());
    }

    /// Send a raw line to the client (newline appended).
    pub fn push_line(&self, line: &str) {
        let _ = self.outbound.send(Outbound::Line(line.to_string()));
    }

    /// Send `S<handle>|<payload>`.
    pub fn push_status(&self, payload: &str) {
        self.push_line(&format!("S{:08X}|{}", self.handle, payload));
    }

    /// Close the client connection.
    pub fn close_connection(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        lock(&self.shared.commands).clone()
    }

    /// Wait for the first command whose text starts with `prefix`.
    pub async fn wait_for_command(&self, prefix: &str, timeout: Duration) -> Option<RecordedCommand> {
        self.wait_until(timeout, |cmds| {
            cmds.iter().find(|c| c.text.starts_with(prefix)).cloned()
        })
        .await
    }

    /// Wait until at least `count` commands have arrived; returns all of
    /// them (possibly fewer on timeout).
    pub async fn wait_for_commands(&self, count: usize, timeout: Duration) -> Vec<RecordedCommand> {
        self.wait_until(timeout, |cmds| (cmds.len() >= count).then(|| cmds.to_vec()))
            .await
            .unwrap_or_else(|| self.commands())
    }

    async fn wait_until<T>(
        &self,
        timeout: Duration,
        check: impl Fn(&[RecordedCommand]) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let changed = self.shared.changed.notified();
            if let Some(found) = check(&lock(&self.shared.commands)) {
                return Some(found);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return None;
            }
        }
    }

    /// Send a datagram from a loopback socket to `127.0.0.1:<port>`.
    pub async fn send_udp(&self, port: u16, datagram: &[u8]) -> Result<()> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        socket.send_to(datagram, ("127.0.0.1", port)).await?;
        Ok(())
    }
}

impl Drop for MockRadio {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    handshake: String,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let (stream, peer) = match listener.accept().await {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::warn!(error = %e, "mock radio accept failed");
            return;
        }
    };
    tracing::debug!(peer = %peer, "mock radio accepted client");

    let (read, mut write) = stream.into_split();
    if write.write_all(handshake.as_bytes()).await.is_err() {
        return;
    }
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Some(cmd) = RecordedCommand::parse(line.trim()) else {
                    tracing::warn!(line = %line, "mock radio ignored malformed command");
                    continue;
                };
                let reply = lock(&shared.rules).reply_for(&cmd.text);
                let seq = cmd.sequence;
                lock(&shared.commands).push(cmd);
                shared.changed.notify_waiters();

                if let Some((code, text)) = reply {
                    let out = format!("R{seq}|{code:X}|{text}\n");
                    if write.write_all(out.as_bytes()).await.is_err() {
                        break;
                    }
                }
            }
            out = outbound.recv() => match out {
                Some(Outbound::Line(line)) => {
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.shutdown().await;
                    break;
                }
            },
        }
    }
    tracing::debug!("mock radio connection ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    #[test]
    fn command_lines_parse() {
        assert_eq!(
            RecordedCommand::parse("C7|sub slice all"),
            Some(RecordedCommand {
                sequence: 7,
                diagnostic: false,
                text: "sub slice all".into()
            })
        );
        assert!(RecordedCommand::parse("CD3|x").unwrap().diagnostic);
        assert_eq!(RecordedCommand::parse("garbage"), None);
        assert_eq!(RecordedCommand::parse("Cx|y"), None);
    }

    #[test]
    fn rules_pick_first_match_and_honour_silence() {
        let mut rules = Rules::default();
        rules.replies.push(("slice".into(), 0x50, "bad".into()));
        rules.silenced.push("ping".into());
        assert_eq!(rules.reply_for("slice tune 0 14.0"), Some((0x50, "bad".into())));
        assert_eq!(rules.reply_for("ping"), None);
        assert_eq!(rules.reply_for("info"), Some((0, String::new())));
    }

    #[tokio::test]
    async fn handshake_and_default_reply() {
        let mock = MockRadio::start().await.unwrap();
        let stream = TcpStream::connect(mock.addr()).await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "V1.4.0.0");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "H12345678");

        write.write_all(b"C0|info\n").await.unwrap();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "R0|0|");
        let cmd = mock.wait_for_command("info", Duration::from_secs(1)).await.unwrap();
        assert_eq!(cmd.sequence, 0);

        mock.push_status("slice 0 mode=USB");
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "S12345678|slice 0 mode=USB");

        mock.close_connection();
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}
