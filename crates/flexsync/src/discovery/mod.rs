//! FlexRadio LAN discovery via VITA-49 UDP broadcasts.
//!
//! Radios announce themselves with VITA-49 packets of class code `0xFFFF`
//! on UDP port 4992. The payload is `key=value` text, including four
//! parallel comma-separated lists describing the GUI clients attached to
//! the radio.
//!
//! Two entry points:
//!
//! - [`discover`] / [`discover_on_port`] listen once for a fixed time and
//!   return the radios seen.
//! - [`Discovery`] runs continuously, keeps a [`Roster`], sweeps out radios
//!   that go quiet and broadcasts [`DiscoveryEvent`]s.
//!
//! ```no_run
//! use flexsync::discovery::{Discovery, DiscoveryOptions};
//!
//! # async fn example() -> flexsync_core::Result<()> {
//! let discovery = Discovery::start(DiscoveryOptions::default()).await?;
//! let mut events = discovery.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod roster;

pub use roster::{Roster, RosterEntry};

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use flexsync_core::{ClientSession, DiscoveryEvent, Error, Result};

use crate::codec;
use crate::vita49::{self, StreamType};

/// Default FlexRadio discovery broadcast port.
pub const DISCOVERY_PORT: u16 = 4992;

/// Default interval between roster sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default age after which a silent LAN radio is dropped.
pub const DEFAULT_RADIO_TIMEOUT: Duration = Duration::from_secs(3);

const EVENT_CAPACITY: usize = 256;

/// A FlexRadio discovered on the network.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveredRadio {
    /// Radio serial number.
    pub serial: String,
    /// Radio model name (e.g. "FLEX-6600").
    pub model: String,
    /// User-assigned nickname.
    pub nickname: String,
    pub callsign: String,
    /// Firmware version string.
    pub firmware_version: String,
    /// IP address of the radio; the datagram source when not announced.
    pub ip: Option<IpAddr>,
    /// TCP command port.
    pub port: u16,
    /// Radio status, e.g. "Available" or "In_Use".
    pub status: String,
    pub inuse_ip: String,
    pub inuse_host: String,
    pub wan_connected: bool,
    pub licensed_clients: u32,
    pub available_clients: u32,
    /// GUI clients attached to the radio.
    pub clients: Vec<ClientSession>,
}

/// Parse an announcement payload.
///
/// `src_ip` is used when the payload carries no `ip` key. The client lists
/// must all have the same length, otherwise the whole record is rejected.
pub fn parse_announcement(payload: &str, src_ip: Option<IpAddr>) -> Result<DiscoveredRadio> {
    let kv: HashMap<&str, &str> = payload
        .split_whitespace()
        .filter_map(codec::split_key_value)
        .collect();

    let serial = kv.get("serial").copied().unwrap_or_default();
    if serial.is_empty() {
        return Err(Error::Protocol("discovery record without serial".into()));
    }

    let text = |key: &str| -> String {
        kv.get(key)
            .map(|v| v.replace('\x7f', " "))
            .unwrap_or_default()
    };
    let number = |key: &str| -> u32 { kv.get(key).and_then(|v| v.parse().ok()).unwrap_or(0) };

    let ip = kv
        .get("ip")
        .and_then(|s| s.parse().ok())
        .or(src_ip);
    let port = kv
        .get("port")
        .and_then(|p| p.parse().ok())
        .unwrap_or(DISCOVERY_PORT);

    Ok(DiscoveredRadio {
        serial: serial.to_string(),
        model: text("model"),
        nickname: text("nickname"),
        callsign: text("callsign"),
        firmware_version: text("version"),
        ip,
        port,
        status: text("status"),
        inuse_ip: text("inuse_ip"),
        inuse_host: text("inuse_host"),
        wan_connected: kv.get("wan_connected").is_some_and(|v| *v == "1"),
        licensed_clients: number("licensed_clients"),
        available_clients: number("available_clients"),
        clients: parse_clients(&kv)?,
    })
}

fn list<'a>(kv: &HashMap<&str, &'a str>, key: &str) -> Vec<&'a str> {
    match kv.get(key) {
        Some(v) if !v.is_empty() => v.split(',').collect(),
        _ => Vec::new(),
    }
}

fn parse_clients(kv: &HashMap<&str, &str>) -> Result<Vec<ClientSession>> {
    let handles = list(kv, "gui_client_handles");
    let stations = list(kv, "gui_client_stations");
    let programs = list(kv, "gui_client_programs");
    let hosts = list(kv, "gui_client_hosts");
    let ips = list(kv, "gui_client_ips");

    let n = handles.len();
    let ips_ok = ips.is_empty() || ips.len() == n;
    if stations.len() != n || programs.len() != n || hosts.len() != n || !ips_ok {
        return Err(Error::Protocol(format!(
            "client list arity mismatch: handles={} stations={} programs={} hosts={} ips={}",
            n,
            stations.len(),
            programs.len(),
            hosts.len(),
            ips.len()
        )));
    }

    (0..n)
        .map(|i| {
            let handle = codec::parse_hex_u32(handles[i]).ok_or_else(|| {
                Error::Protocol(format!("bad client handle {:?}", handles[i]))
            })?;
            Ok(ClientSession {
                handle,
                station: stations[i].replace('\x7f', " "),
                program: programs[i].to_string(),
                host: hosts[i].to_string(),
                ip: ips.get(i).copied().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Parse a UDP datagram as a VITA-49 discovery packet.
pub fn parse_discovery_packet(data: &[u8], src_ip: IpAddr) -> Result<DiscoveredRadio> {
    let frame = vita49::decode(data)
        .ok_or_else(|| Error::Protocol("malformed VITA-49 packet".into()))?;
    if frame.stream_type() != StreamType::Discovery {
        return Err(Error::Protocol("not a discovery packet".into()));
    }

    let text = std::str::from_utf8(frame.payload)
        .map_err(|_| Error::Protocol("discovery payload is not valid UTF-8".into()))?;
    parse_announcement(text.trim_end_matches('\0'), Some(src_ip))
}

/// Listen for discovery broadcasts on the default port (4992).
///
/// Returns all radios seen within `timeout`, one per serial number.
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredRadio>> {
    discover_on_port(DISCOVERY_PORT, timeout).await
}

/// Listen for discovery broadcasts on a specific port.
pub async fn discover_on_port(port: u16, timeout: Duration) -> Result<Vec<DiscoveredRadio>> {
    let socket = bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)).await?;
    tracing::debug!(port, "listening for discovery broadcasts");

    let mut radios: HashMap<String, DiscoveredRadio> = HashMap::new();
    let mut buf = vec![0u8; 65_536];
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, src))) => match parse_discovery_packet(&buf[..n], src.ip()) {
                Ok(radio) => {
                    tracing::debug!(serial = %radio.serial, model = %radio.model, "discovered radio");
                    radios.entry(radio.serial.clone()).or_insert(radio);
                }
                Err(e) => tracing::trace!(error = %e, "ignored datagram"),
            },
            Ok(Err(e)) => tracing::trace!(error = %e, "discovery recv error"),
            Err(_) => break,
        }
    }

    let mut result: Vec<DiscoveredRadio> = radios.into_values().collect();
    result.sort_by(|a, b| a.serial.cmp(&b.serial));
    tracing::debug!(count = result.len(), "discovery complete");
    Ok(result)
}

async fn bind(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("failed to bind discovery socket on {addr}: {e}")))
}

/// Settings for a [`Discovery`] service.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Address to bind the listening socket to.
    pub bind_ip: IpAddr,
    /// UDP port to listen on; 0 picks an ephemeral port.
    pub port: u16,
    pub sweep_interval: Duration,
    /// Age after which a LAN radio is removed.
    pub radio_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DISCOVERY_PORT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            radio_timeout: DEFAULT_RADIO_TIMEOUT,
        }
    }
}

struct Shared {
    roster: Mutex<Roster>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl Shared {
    fn roster(&self) -> std::sync::MutexGuard<'_, Roster> {
        self.roster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<DiscoveryEvent>) {
        for event in events {
            let _ = self.events.send(event);
        }
    }
}

/// A running discovery listener.
pub struct Discovery {
    shared: Arc<Shared>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl Discovery {
    /// Bind the listening socket and start the receive/sweep task.
    pub async fn start(options: DiscoveryOptions) -> Result<Self> {
        let socket = bind(SocketAddr::new(options.bind_ip, options.port)).await?;
        let local_addr = socket.local_addr()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            roster: Mutex::new(Roster::new()),
            events,
        });
        let (paused, paused_rx) = watch::channel(false);
        let cancel = CancellationToken::new();

        tracing::debug!(addr = %local_addr, "discovery started");
        let task = tokio::spawn(run(
            socket,
            Arc::clone(&shared),
            options,
            paused_rx,
            cancel.clone(),
        ));

        Ok(Discovery {
            shared,
            paused,
            cancel,
            task: Mutex::new(Some(task)),
            local_addr,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the known radios.
    pub fn radios(&self) -> Vec<RosterEntry> {
        self.shared.roster().entries()
    }

    /// Stop reading the socket and sweeping. Known radios are kept.
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    /// Resume after [`pause`](Self::pause). Known radios count as seen now,
    /// so the pause itself does not expire them.
    pub fn resume(&self) {
        self.shared.roster().touch_all(Instant::now());
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Add or refresh a radio learned over WAN. WAN radios are not swept.
    pub fn insert_wan(&self, radio: DiscoveredRadio) {
        let events = self.shared.roster().announce(radio, true, Instant::now());
        self.shared.emit(events);
    }

    /// Remove a WAN radio. Returns `false` if it was not known.
    pub fn remove_wan(&self, serial: &str) -> bool {
        let event = self.shared.roster().remove_wan(serial);
        let found = event.is_some();
        self.shared.emit(event.into_iter().collect());
        found
    }

    /// Stop the listener task and close the socket.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::debug!(addr = %self.local_addr, "discovery stopped");
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    socket: UdpSocket,
    shared: Arc<Shared>,
    options: DiscoveryOptions,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut sweep = tokio::time::interval(options.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buf = vec![0u8; 65_536];

    loop {
        if *paused.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    sweep.reset();
                    continue;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = paused.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sweep.tick() => {
                let events = shared.roster().sweep(Instant::now(), options.radio_timeout);
                shared.emit(events);
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, src)) => match parse_discovery_packet(&buf[..n], src.ip()) {
                    Ok(radio) => {
                        let events = shared.roster().announce(radio, false, Instant::now());
                        shared.emit(events);
                    }
                    Err(e) => tracing::warn!(error = %e, src = %src, "discovery record skipped"),
                },
                Err(e) => tracing::trace!(error = %e, "discovery recv error"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flexsync_test_harness::vita;

    fn packet(payload: &str) -> Vec<u8> {
        vita::discovery_text_packet(payload)
    }

    const ANNOUNCE: &str = "model=FLEX-6600 serial=1234-5678 nickname=Shack\u{7f}Radio \
        version=3.5.1.0 ip=192.168.1.100 port=4992 status=In_Use wan_connected=1 \
        licensed_clients=2 available_clients=1 \
        gui_client_handles=0x1A,0x2B gui_client_stations=Main\u{7f}Op,Laptop \
        gui_client_programs=SmartSDR-Win,SmartSDR-Mac gui_client_hosts=pc1,mac1 \
        gui_client_ips=192.168.1.10,192.168.1.11";

    #[test]
    fn announcement_fields_and_clients() {
        let radio = parse_announcement(ANNOUNCE, None).unwrap();
        assert_eq!(radio.serial, "1234-5678");
        assert_eq!(radio.nickname, "Shack Radio");
        assert_eq!(radio.firmware_version, "3.5.1.0");
        assert_eq!(radio.ip, Some("192.168.1.100".parse().unwrap()));
        assert!(radio.wan_connected);
        assert_eq!(radio.available_clients, 1);
        assert_eq!(radio.clients.len(), 2);
        assert_eq!(radio.clients[0].handle, 0x1A);
        assert_eq!(radio.clients[0].station, "Main Op");
        assert_eq!(radio.clients[1].program, "SmartSDR-Mac");
        assert_eq!(radio.clients[1].ip, "192.168.1.11");
    }

    #[test]
    fn arity_mismatch_rejects_record() {
        let payload = "serial=1 gui_client_handles=0x1,0x2 gui_client_stations=A \
            gui_client_programs=P,Q gui_client_hosts=h1,h2";
        assert!(matches!(parse_announcement(payload, None), Err(Error::Protocol(_))));
    }

    #[test]
    fn missing_client_lists_mean_no_clients() {
        let radio = parse_announcement("serial=42 model=FLEX-6400", None).unwrap();
        assert!(radio.clients.is_empty());
        assert_eq!(radio.port, DISCOVERY_PORT);
    }

    #[test]
    fn record_without_serial_rejected() {
        assert!(parse_announcement("model=FLEX-6400", None).is_err());
    }

    #[test]
    fn packet_falls_back_to_source_ip() {
        let src: IpAddr = "10.0.0.7".parse().unwrap();
        let pkt = vita::discovery_packet(&[("serial", "99"), ("model", "FLEX-8600")]);
        let radio = parse_discovery_packet(&pkt, src).unwrap();
        assert_eq!(radio.ip, Some(src));
        assert_eq!(radio.model, "FLEX-8600");
    }

    #[test]
    fn non_discovery_packet_rejected() {
        let meter = vita::data_packet(vita::CLASS_METER, 0, 0, &[0u8; 8]);
        assert!(parse_discovery_packet(&meter, "10.0.0.1".parse().unwrap()).is_err());
        assert!(parse_discovery_packet(&[1, 2, 3], "10.0.0.1".parse().unwrap()).is_err());
    }

    #[tokio::test]
    async fn one_shot_discovery_deduplicates() {
        let probe = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let sender = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let s = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let dest: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
            for payload in ["serial=A model=FLEX-6400", "serial=A model=FLEX-6400", "serial=B"] {
                s.send_to(&packet(payload), dest).await.unwrap();
            }
        });

        let radios = discover_on_port(port, Duration::from_millis(300)).await.unwrap();
        sender.await.unwrap();
        let serials: Vec<&str> = radios.iter().map(|r| r.serial.as_str()).collect();
        assert_eq!(serials, vec!["A", "B"]);
    }

    fn test_options() -> DiscoveryOptions {
        DiscoveryOptions {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            sweep_interval: Duration::from_millis(50),
            radio_timeout: Duration::from_millis(300),
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn service_tracks_roster_and_sweeps() {
        let discovery = Discovery::start(test_options()).await.unwrap();
        let mut rx = discovery.subscribe();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = discovery.local_addr();

        let first = "serial=S1 gui_client_handles=0xA,0xB gui_client_stations=A,B \
            gui_client_programs=P,P gui_client_hosts=h,h";
        sender.send_to(&packet(first), dest).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            DiscoveryEvent::RadioAdded {
                serial: "S1".into(),
                is_wan: false
            }
        );
        assert!(matches!(next_event(&mut rx).await, DiscoveryEvent::ClientAdded { client, .. } if client.handle == 0xA));
        assert!(matches!(next_event(&mut rx).await, DiscoveryEvent::ClientAdded { client, .. } if client.handle == 0xB));

        let second = "serial=S1 gui_client_handles=0xB,0xC gui_client_stations=B,C \
            gui_client_programs=P,P gui_client_hosts=h,h";
        sender.send_to(&packet(second), dest).await.unwrap();
        assert!(matches!(next_event(&mut rx).await, DiscoveryEvent::ClientRemoved { client, .. } if client.handle == 0xA));
        assert!(matches!(next_event(&mut rx).await, DiscoveryEvent::ClientAdded { client, .. } if client.handle == 0xC));

        discovery.insert_wan(DiscoveredRadio {
            serial: "W1".into(),
            ..DiscoveredRadio::default()
        });
        assert_eq!(
            next_event(&mut rx).await,
            DiscoveryEvent::RadioAdded {
                serial: "W1".into(),
                is_wan: true
            }
        );

        // S1 goes silent and is swept; W1 stays.
        assert_eq!(
            next_event(&mut rx).await,
            DiscoveryEvent::RadioRemoved {
                serial: "S1".into(),
                is_wan: false
            }
        );
        let left: Vec<String> = discovery.radios().into_iter().map(|e| e.radio.serial).collect();
        assert_eq!(left, vec!["W1".to_string()]);

        assert!(discovery.remove_wan("W1"));
        assert!(!discovery.remove_wan("W1"));
        discovery.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_record_is_skipped() {
        let discovery = Discovery::start(test_options()).await.unwrap();
        let mut rx = discovery.subscribe();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = discovery.local_addr();

        sender
            .send_to(&packet("serial=BAD gui_client_handles=0x1 gui_client_stations=A,B"), dest)
            .await
            .unwrap();
        sender.send_to(&packet("serial=GOOD"), dest).await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            DiscoveryEvent::RadioAdded {
                serial: "GOOD".into(),
                is_wan: false
            }
        );
        discovery.shutdown().await;
    }

    #[tokio::test]
    async fn pause_holds_records_and_resume_continues() {
        let discovery = Discovery::start(test_options()).await.unwrap();
        let mut rx = discovery.subscribe();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = discovery.local_addr();

        sender.send_to(&packet("serial=P1"), dest).await.unwrap();
        next_event(&mut rx).await;

        discovery.pause();
        assert!(discovery.is_paused());
        // Longer than the radio timeout: no sweep while paused.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(discovery.radios().len(), 1);

        sender.send_to(&packet("serial=P2"), dest).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "socket not read while paused");

        discovery.resume();
        assert_eq!(
            next_event(&mut rx).await,
            DiscoveryEvent::RadioAdded {
                serial: "P2".into(),
                is_wan: false
            }
        );
        assert_eq!(discovery.radios().len(), 2);
        discovery.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_is_a_transport_error() {
        let first = Discovery::start(test_options()).await.unwrap();
        let taken = DiscoveryOptions {
            port: first.local_addr().port(),
            ..test_options()
        };
        assert!(matches!(Discovery::start(taken).await, Err(Error::Transport(_))));
        first.shutdown().await;
    }
}
