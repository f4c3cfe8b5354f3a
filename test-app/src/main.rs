// flexsync test application -- CLI tool for exercising the synchronization
// engine against a real FlexRadio.
//
// Usage:
//   flexsync-test-app discover --duration 10
//   flexsync-test-app --host 192.168.1.100 monitor --duration 30
//   flexsync-test-app --host 192.168.1.100 send "info"
//   flexsync-test-app --discover status --wait 2
//
// Logging is controlled with RUST_LOG, e.g. RUST_LOG=flexsync=debug.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use flexsync::discovery::{self, Discovery, DiscoveryOptions};
use flexsync::{Radio, RadioBuilder};
use flexsync_core::{DiscoveryEvent, RadioEvent};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// flexsync test application -- exercises the SmartSDR client from the
/// command line.
#[derive(Parser)]
#[command(name = "flexsync-test-app", version, about)]
struct Cli {
    /// Radio IP address or hostname.
    #[arg(long, global = true)]
    host: Option<String>,

    /// SmartSDR TCP command port.
    #[arg(long, global = true, default_value_t = 4992)]
    port: u16,

    /// Local UDP port for VITA-49 streams (0 = ephemeral).
    #[arg(long, global = true, default_value_t = 4991)]
    udp_port: u16,

    /// Find a radio on the LAN and connect to the first one.
    #[arg(long, global = true)]
    discover: bool,

    /// Client program name to register with.
    #[arg(long, global = true, default_value = "flexsync-test-app")]
    client_name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch discovery events.
    Discover {
        /// Seconds to listen.
        #[arg(long, default_value_t = 5)]
        duration: u64,
        /// Discovery listen port.
        #[arg(long, default_value_t = discovery::DISCOVERY_PORT)]
        listen_port: u16,
    },

    /// Connect and print session events.
    Monitor {
        /// Seconds to run (0 = until the connection drops).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Send one command and print the reply.
    Send {
        /// Command text, e.g. "info" or "slice list".
        command: String,
        /// Send as a diagnostic command and do not wait for a reply.
        #[arg(long)]
        diagnostic: bool,
    },

    /// Connect, let status settle, and print the object graph.
    Status {
        /// Seconds to wait for status before printing.
        #[arg(long, default_value_t = 2)]
        wait: u64,
    },
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_discover(duration: u64, listen_port: u16) -> Result<()> {
    let options = DiscoveryOptions {
        port: listen_port,
        ..DiscoveryOptions::default()
    };
    let service = Discovery::start(options)
        .await
        .context("failed to start discovery")?;
    let mut events = service.subscribe();
    println!("Listening for radios on UDP {listen_port} for {duration} s...");

    let deadline = Instant::now() + Duration::from_secs(duration);
    loop {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) => print_discovery_event(&event),
            Ok(Err(RecvError::Lagged(n))) => println!("[warning] missed {n} events"),
            Ok(Err(RecvError::Closed)) | Err(_) => break,
        }
    }

    let radios = service.radios();
    service.shutdown().await;

    println!();
    println!(
        "{:<14}  {:<12}  {:<16}  {:<16}  {:<4}  Clients",
        "Model", "Serial", "Nickname", "IP Address", "WAN"
    );
    for entry in &radios {
        let r = &entry.radio;
        let ip = r.ip.map(|ip| ip.to_string()).unwrap_or_default();
        let clients: Vec<&str> = r.clients.iter().map(|c| c.station.as_str()).collect();
        println!(
            "{:<14}  {:<12}  {:<16}  {:<16}  {:<4}  {}",
            r.model,
            r.serial,
            r.nickname,
            ip,
            if entry.is_wan { "yes" } else { "no" },
            clients.join(", ")
        );
    }
    println!("{} radio(s) known.", radios.len());
    Ok(())
}

fn print_discovery_event(event: &DiscoveryEvent) {
    match event {
        DiscoveryEvent::RadioAdded { serial, is_wan } => {
            println!("[radio+] {serial}{}", if *is_wan { " (wan)" } else { "" });
        }
        DiscoveryEvent::RadioRemoved { serial, .. } => println!("[radio-] {serial}"),
        DiscoveryEvent::ClientAdded { serial, client } => println!(
            "[client+] {serial}: 0x{:08X} {} ({})",
            client.handle, client.station, client.program
        ),
        DiscoveryEvent::ClientRemoved { serial, client } => {
            println!("[client-] {serial}: 0x{:08X} {}", client.handle, client.station)
        }
    }
}

async fn cmd_monitor(builder: RadioBuilder, duration: u64) -> Result<()> {
    let mut events = builder.subscribe();
    let radio = builder.build().await.context("failed to connect")?;
    println!("Monitoring radio events (Ctrl-C to stop)...");

    let deadline = (duration > 0).then(|| Instant::now() + Duration::from_secs(duration));
    loop {
        let next = async {
            match deadline {
                Some(d) => tokio::time::timeout_at(d, events.recv()).await.ok(),
                None => Some(events.recv().await),
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = next => match received {
                Some(Ok(RadioEvent::Disconnected { reason })) => {
                    println!("[event] disconnected: {reason}");
                    return Ok(());
                }
                Some(Ok(event)) => println!("[event] {event:?}"),
                Some(Err(RecvError::Lagged(n))) => println!("[warning] missed {n} events"),
                Some(Err(RecvError::Closed)) => break,
                None => {
                    println!("Monitor duration elapsed.");
                    break;
                }
            },
        }
    }

    print_counters(&radio);
    radio.disconnect().await;
    Ok(())
}

async fn cmd_send(builder: RadioBuilder, command: &str, diagnostic: bool) -> Result<()> {
    let radio = builder.subscriptions(Vec::<String>::new()).build().await.context("failed to connect")?;
    let result = if diagnostic {
        radio
            .send_diagnostic(command)
            .await
            .map(|seq| println!("sent as CD{seq}"))
            .context("send failed")
    } else {
        match radio.request(command).await {
            Ok(reply) => {
                println!("R{}|{:08X}|{}", reply.sequence, reply.code, reply.text);
                if reply.is_ok() {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("radio returned error code 0x{:08X}", reply.code))
                }
            }
            Err(e) => Err(e).context("command failed"),
        }
    };
    radio.disconnect().await;
    result
}

async fn cmd_status(builder: RadioBuilder, wait: u64) -> Result<()> {
    let radio = builder.build().await.context("failed to connect")?;
    tokio::time::sleep(Duration::from_secs(wait)).await;

    let graph = radio.graph();
    println!("Radio firmware {} handle 0x{:08X}", radio.version(), radio.handle());
    for (kind, count) in graph.counts() {
        println!("  {:<18} {count}", kind.to_string());
    }

    for slice in graph.slices().all() {
        println!(
            "  slice {}: {:.6} MHz {} rx={} pan={}",
            slice.id(),
            flexsync::codec::hz_to_mhz(slice.frequency_hz.read()),
            slice.mode.read(),
            slice.rx_antenna.read(),
            slice
                .pan
                .read()
                .map(|p| format!("0x{:08X}", p.id()))
                .unwrap_or_else(|| "-".into())
        );
    }
    for client in graph.gui_clients().all() {
        println!(
            "  client {}: {} on {}",
            client.display_id(),
            client.program.read(),
            client.station.read()
        );
    }

    print_counters(&radio);
    radio.disconnect().await;
    Ok(())
}

fn print_counters(radio: &Radio) {
    let c = radio.demux_counters();
    println!(
        "Stream frames: {} (malformed {}, unknown class {}, orphaned {})",
        c.frames, c.malformed, c.unknown_class, c.orphaned
    );
}

async fn make_builder(cli: &Cli) -> Result<RadioBuilder> {
    let builder = RadioBuilder::new()
        .tcp_port(cli.port)
        .udp_port(cli.udp_port)
        .client_name(&cli.client_name);

    if let Some(host) = &cli.host {
        tracing::debug!(host = %host, port = cli.port, "using radio from command line");
        return Ok(builder.host(host));
    }
    if cli.discover {
        println!("Discovering radios (3 seconds)...");
        let radios = discovery::discover(Duration::from_secs(3))
            .await
            .context("discovery failed")?;
        let Some(found) = radios.first() else {
            bail!("no radio found on the LAN");
        };
        println!("Using {} {} ({})", found.model, found.serial, found.nickname);
        return Ok(builder.radio(found));
    }
    bail!("--host or --discover is required for this command")
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Discover {
            duration,
            listen_port,
        } => cmd_discover(*duration, *listen_port).await,
        Command::Monitor { duration } => cmd_monitor(make_builder(&cli).await?, *duration).await,
        Command::Send {
            command,
            diagnostic,
        } => cmd_send(make_builder(&cli).await?, command, *diagnostic).await,
        Command::Status { wait } => cmd_status(make_builder(&cli).await?, *wait).await,
    }
}
