//! Periodic ping with bounded-silence dead-link detection.
//!
//! Once started, the keepalive asks the radio to supervise the link
//! (`keepalive enable`) and then pings it every period. Each ping reply
//! refreshes the last-reply timestamp. The first reply announces
//! [`RadioEvent::LinkEstablished`]; a silence longer than
//! `silence_periods` periods announces [`RadioEvent::KeepAliveTimeout`] and
//! the keepalive returns to [`KeepAliveState::Idle`]. It never closes the
//! socket.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use flexsync_core::{ConcurrentProperty, RadioEvent};

use crate::codec;
use crate::command::{CommandChannel, ReplyHandler};

/// Default ping period.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(1);

/// Default number of silent periods tolerated before timing out.
pub const DEFAULT_SILENCE_PERIODS: u32 = 4;

/// Keepalive settings.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Whether the session starts a keepalive at all.
    pub enabled: bool,
    /// Interval between pings.
    pub period: Duration,
    /// Silence longer than this many periods is a dead link.
    pub silence_periods: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period: DEFAULT_PERIOD,
            silence_periods: DEFAULT_SILENCE_PERIODS,
        }
    }
}

impl KeepAliveConfig {
    /// Silence after which the link is considered dead.
    pub fn silence_limit(&self) -> Duration {
        self.period * self.silence_periods
    }
}

/// Keepalive state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveState {
    Idle,
    Pinging,
}

/// Ping supervisor for one connection.
pub struct KeepAlive {
    config: KeepAliveConfig,
    state: ConcurrentProperty<KeepAliveState>,
    last_reply: ConcurrentProperty<Option<Instant>>,
    link_established: AtomicBool,
    events: broadcast::Sender<RadioEvent>,
}

impl KeepAlive {
    pub fn new(config: KeepAliveConfig, events: broadcast::Sender<RadioEvent>) -> Arc<Self> {
        Arc::new(KeepAlive {
            config,
            state: ConcurrentProperty::new("keepalive_state", KeepAliveState::Idle),
            last_reply: ConcurrentProperty::new("last_reply", None),
            link_established: AtomicBool::new(false),
            events,
        })
    }

    /// Current state.
    pub fn state(&self) -> KeepAliveState {
        self.state.read()
    }

    /// When the most recent ping reply arrived.
    pub fn last_reply(&self) -> Option<Instant> {
        self.last_reply.read()
    }

    /// Whether at least one ping reply has arrived.
    pub fn is_link_established(&self) -> bool {
        self.link_established.load(Ordering::SeqCst)
    }

    /// Enter *Pinging* and spawn the ping task.
    ///
    /// Each entry starts from a clean slate: no last reply, and the next
    /// reply announces [`RadioEvent::LinkEstablished`] again. The task ends on
    /// cancellation, on silence timeout, or when the command channel stops
    /// accepting sends.
    pub fn start(
        self: &Arc<Self>,
        channel: Arc<CommandChannel>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        this.last_reply.write(None);
        this.link_established.store(false, Ordering::SeqCst);
        this.state.write(KeepAliveState::Pinging);
        tokio::spawn(async move {
            let mut outstanding = VecDeque::new();
            this.run(&channel, cancel, &mut outstanding).await;
            // Handlers of unanswered pings must not fire into a later run.
            for (seq, _) in outstanding {
                channel.forget(seq);
            }
            this.state.write(KeepAliveState::Idle);
        })
    }

    async fn run(
        self: &Arc<Self>,
        channel: &CommandChannel,
        cancel: CancellationToken,
        outstanding: &mut VecDeque<(u64, Instant)>,
    ) {
        if let Err(e) = channel.send(&codec::cmd_keepalive_enable(), None).await {
            tracing::debug!(error = %e, "keepalive enable failed");
            return;
        }

        let started = Instant::now();
        let limit = self.config.silence_limit();
        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::trace!("keepalive cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let reference = self.last_reply.read().unwrap_or(started);
            if reference.elapsed() > limit {
                tracing::warn!(
                    silence_ms = reference.elapsed().as_millis() as u64,
                    "keepalive timeout: radio stopped answering pings"
                );
                let _ = self.events.send(RadioEvent::KeepAliveTimeout);
                return;
            }

            // Pings older than the silence limit will not be answered.
            while let Some(&(seq, sent)) = outstanding.front() {
                if sent.elapsed() <= limit {
                    break;
                }
                outstanding.pop_front();
                if channel.forget(seq) {
                    tracing::trace!(seq, "unanswered ping dropped");
                }
            }

            let this = Arc::clone(self);
            let handler: ReplyHandler = Box::new(move |_reply| this.on_ping_reply());
            match channel.send(&codec::cmd_ping(), Some(handler)).await {
                Ok(seq) => outstanding.push_back((seq, Instant::now())),
                Err(e) => {
                    tracing::debug!(error = %e, "keepalive ping failed; stopping");
                    return;
                }
            }
        }
    }

    fn on_ping_reply(&self) {
        self.last_reply.write(Some(Instant::now()));
        if !self.link_established.swap(true, Ordering::SeqCst) {
            tracing::debug!("link established");
            let _ = self.events.send(RadioEvent::LinkEstablished);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ReplyLine;
    use tokio::io::{AsyncBufReadExt, BufReader, duplex};

    fn fast_config() -> KeepAliveConfig {
        KeepAliveConfig {
            enabled: true,
            period: Duration::from_millis(20),
            silence_periods: 4,
        }
    }

    /// Spawn a responder that answers the commands `answer` accepts.
    fn spawn_responder(
        server: tokio::io::DuplexStream,
        channel: Arc<CommandChannel>,
        answer: impl Fn(u64) -> bool + Send + 'static,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(server).lines();
            let mut seen = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                let pipe = line.find('|').unwrap();
                let seq: u64 = line[1..pipe].parse().unwrap();
                seen.push(line[pipe + 1..].to_string());
                if answer(seq) {
                    channel.dispatch_reply(ReplyLine {
                        sequence: seq,
                        code: 0,
                        message: String::new(),
                    });
                }
            }
            seen
        })
    }

    async fn next_event(rx: &mut broadcast::Receiver<RadioEvent>) -> RadioEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn channel_pair() -> (Arc<CommandChannel>, tokio::io::DuplexStream) {
        let (client, server) = duplex(16 * 1024);
        let channel = Arc::new(CommandChannel::new(
            Box::new(client),
            Duration::from_secs(1),
        ));
        (channel, server)
    }

    #[tokio::test]
    async fn first_reply_establishes_link_once() {
        let (client, server) = duplex(16 * 1024);
        let channel = Arc::new(CommandChannel::new(
            Box::new(client),
            Duration::from_secs(1),
        ));
        let (tx, mut rx) = broadcast::channel(16);
        let ka = KeepAlive::new(fast_config(), tx);
        let responder = spawn_responder(server, Arc::clone(&channel), |_| true);

        let cancel = CancellationToken::new();
        let task = ka.start(Arc::clone(&channel), cancel.clone());
        assert_eq!(ka.state(), KeepAliveState::Pinging);

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, RadioEvent::LinkEstablished);

        // Several more pings, no further events.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_err());
        assert!(ka.is_link_established());
        assert!(ka.last_reply().is_some());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(ka.state(), KeepAliveState::Idle);

        channel.disconnect().await;
        let seen = responder.await.unwrap();
        assert_eq!(seen[0], "keepalive enable");
        assert!(seen[1..].iter().all(|c| c == "ping"));
        assert!(seen.len() > 3);
    }

    #[tokio::test]
    async fn silence_times_out_and_returns_to_idle() {
        let (client, server) = duplex(16 * 1024);
        let channel = Arc::new(CommandChannel::new(
            Box::new(client),
            Duration::from_secs(1),
        ));
        let (tx, mut rx) = broadcast::channel(16);
        let ka = KeepAlive::new(fast_config(), tx);
        let _responder = spawn_responder(server, Arc::clone(&channel), |_| false);

        let task = ka.start(Arc::clone(&channel), CancellationToken::new());
        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, RadioEvent::KeepAliveTimeout);
        task.await.unwrap();
        assert_eq!(ka.state(), KeepAliveState::Idle);
        assert!(!ka.is_link_established());
        // The keepalive does not close the channel itself.
        assert!(channel.is_connected());
    }

    #[tokio::test]
    async fn restart_after_timeout_establishes_link_again() {
        let (channel, server) = channel_pair();
        let (tx, mut rx) = broadcast::channel(16);
        let ka = KeepAlive::new(fast_config(), tx);
        let answering = Arc::new(AtomicBool::new(true));
        let gate = Arc::clone(&answering);
        let _responder = spawn_responder(server, Arc::clone(&channel), move |_| {
            gate.load(Ordering::SeqCst)
        });

        let task = ka.start(Arc::clone(&channel), CancellationToken::new());
        assert_eq!(next_event(&mut rx).await, RadioEvent::LinkEstablished);

        answering.store(false, Ordering::SeqCst);
        assert_eq!(next_event(&mut rx).await, RadioEvent::KeepAliveTimeout);
        task.await.unwrap();
        assert_eq!(ka.state(), KeepAliveState::Idle);
        assert_eq!(channel.pending_count(), 0);

        answering.store(true, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let task = ka.start(Arc::clone(&channel), cancel.clone());
        assert!(ka.last_reply().is_none());
        assert!(!ka.is_link_established());
        assert_eq!(next_event(&mut rx).await, RadioEvent::LinkEstablished);
        assert_eq!(ka.state(), KeepAliveState::Pinging);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_ping_replies_do_not_accumulate() {
        let (channel, server) = channel_pair();
        let (tx, mut rx) = broadcast::channel(16);
        let ka = KeepAlive::new(fast_config(), tx);
        // Answer every other command; the link stays up.
        let _responder = spawn_responder(server, Arc::clone(&channel), |seq| seq % 2 == 0);

        let cancel = CancellationToken::new();
        let task = ka.start(Arc::clone(&channel), cancel.clone());
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(ka.state(), KeepAliveState::Pinging);
        assert_eq!(rx.try_recv().unwrap(), RadioEvent::LinkEstablished);
        assert!(rx.try_recv().is_err());
        // At most the pings sent within one silence limit are still waiting.
        assert!(
            channel.pending_count() <= fast_config().silence_periods as usize + 2,
            "pending = {}",
            channel.pending_count()
        );

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn stops_when_channel_is_gone() {
        let (client, _server) = duplex(1024);
        let channel = Arc::new(CommandChannel::new(
            Box::new(client),
            Duration::from_secs(1),
        ));
        channel.connection_lost();
        let (tx, _rx) = broadcast::channel(16);
        let ka = KeepAlive::new(fast_config(), tx);
        ka.start(channel, CancellationToken::new()).await.unwrap();
        assert_eq!(ka.state(), KeepAliveState::Idle);
    }

    #[test]
    fn silence_limit_is_four_periods_by_default() {
        assert_eq!(
            KeepAliveConfig::default().silence_limit(),
            Duration::from_secs(4)
        );
    }
}
