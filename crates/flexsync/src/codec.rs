//! SmartSDR TCP command/reply/status line encoding and decoding.
//!
//! SmartSDR speaks newline-terminated ASCII over TCP port 4992. The client
//! sends commands; the radio sends the handshake, replies, status and
//! messages.
//!
//! # Line formats
//!
//! ```text
//! Command:     C<seq>|<command_text>\n
//! Diagnostic:  CD<seq>|<command_text>\n
//! Reply:       R<seq>|<hex_code>|<reply_text>\n
//! Status:      S<hex_handle>|<resource> <key>=<value> ...\n
//! Message:     M<hex_code>|<text>\n
//! Version:     V<major>.<minor>.<patch>.<build>\n
//! Handle:      H<hex_handle>\n
//! ```
//!
//! Nothing here does I/O.

use flexsync_core::{Error, Result};

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Hz to the MHz figure the radio expects in commands.
pub fn hz_to_mhz(hz: u64) -> f64 {
    hz as f64 / 1e6
}

/// MHz (as the radio reports it) to whole Hz, rounded.
pub fn mhz_to_hz(mhz: f64) -> u64 {
    (mhz * 1e6).round() as u64
}

/// Parse a hex handle or stream id, with or without a `0x` prefix.
pub fn parse_hex_u32(s: &str) -> Option<u32> {
    let digits = ["0x", "0X"]
        .iter()
        .find_map(|p| s.strip_prefix(p))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// Split a `key=value` token at the first `=`.
pub fn split_key_value(token: &str) -> Option<(&str, &str)> {
    token.split_once('=')
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Frame `text` as command number `seq`: `C<seq>|<text>\n`.
pub fn encode_command(seq: u64, text: &str) -> Vec<u8> {
    frame_command("C", seq, text)
}

/// Same as [`encode_command`] with the diagnostic prefix `CD`; the radio
/// logs these with extra detail.
pub fn encode_diagnostic_command(seq: u64, text: &str) -> Vec<u8> {
    frame_command("CD", seq, text)
}

fn frame_command(prefix: &str, seq: u64, text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + text.len() + 12);
    out.extend_from_slice(prefix.as_bytes());
    out.extend_from_slice(seq.to_string().as_bytes());
    out.push(b'|');
    out.extend_from_slice(text.as_bytes());
    out.push(b'\n');
    out
}

// Command text builders. None of them carry the `C<seq>|` framing; the
// command channel adds it when it numbers the command.

/// `client program <name>`
pub fn cmd_client_program(name: &str) -> String {
    format!("client program {name}")
}

/// `client udpport <port>`: where the radio should send VITA-49 streams.
pub fn cmd_client_udpport(port: u16) -> String {
    format!("client udpport {port}")
}

/// `sub <object>`, e.g. `sub slice all`.
pub fn cmd_subscribe(object: &str) -> String {
    format!("sub {object}")
}

pub fn cmd_keepalive_enable() -> String {
    String::from("keepalive enable")
}

pub fn cmd_ping() -> String {
    String::from("ping")
}

/// `slice tune <index> <MHz>` with six decimals.
pub fn cmd_slice_tune(slice_index: u32, freq_hz: u64) -> String {
    format!("slice tune {slice_index} {:.6}", hz_to_mhz(freq_hz))
}

/// `slice create freq=<MHz> mode=<mode>`
pub fn cmd_slice_create(freq_hz: u64, mode: &str) -> String {
    format!("slice create freq={:.6} mode={mode}", hz_to_mhz(freq_hz))
}

pub fn cmd_slice_remove(slice_index: u32) -> String {
    format!("slice remove {slice_index}")
}

/// Ask for a DAX receive audio stream on `dax_channel`.
pub fn cmd_stream_create_dax_rx(dax_channel: u8) -> String {
    format!("stream create type=dax_rx dax_channel={dax_channel}")
}

/// `stream remove 0x<id>`
pub fn cmd_stream_remove(stream_id: u32) -> String {
    format!("stream remove 0x{stream_id:08X}")
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// `R<seq>|<code>|<text>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    pub sequence: u64,
    /// Zero on success.
    pub code: u32,
    /// May be empty; may itself contain `|`.
    pub message: String,
}

/// A status line. The payload is left unsplit because where the resource id
/// ends is resource-specific; the status router splits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub handle: u32,
    /// Everything after the `|`, trimmed.
    pub payload: String,
}

/// Firmware version announced in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SmartSdrVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: u32,
}

impl std::fmt::Display for SmartSdrVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.patch, self.build)
    }
}

/// One line from the radio, classified by its leading character.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundLine {
    /// `V1.4.0.0`
    Version(SmartSdrVersion),
    /// `H12345678`
    Handle(u32),
    Reply(ReplyLine),
    Status(StatusLine),
    /// `M<code>|<text>`
    Message { code: u32, text: String },
    Unknown(String),
}

/// Classify and parse one line (without its newline). Surrounding
/// whitespace is ignored.
pub fn parse_line(line: &str) -> Result<InboundLine> {
    let line = line.trim();
    let mut chars = line.chars();
    let Some(kind) = chars.next() else {
        return Err(Error::Protocol("empty line".into()));
    };
    let body = chars.as_str();

    match kind {
        'V' => parse_version(body).map(InboundLine::Version),
        'H' => parse_hex_u32(body)
            .map(InboundLine::Handle)
            .ok_or_else(|| Error::Protocol(format!("invalid hex handle: {body}"))),
        'R' => parse_reply(body).map(InboundLine::Reply),
        'S' => parse_status(body).map(InboundLine::Status),
        'M' => {
            let (code, text) = split_pipe(body, "message")?;
            Ok(InboundLine::Message {
                code: parse_hex_u32(code).unwrap_or(0),
                text: text.to_string(),
            })
        }
        _ => Ok(InboundLine::Unknown(line.to_string())),
    }
}

fn split_pipe<'a>(body: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    body.split_once('|')
        .ok_or_else(|| Error::Protocol(format!("malformed {what} (no pipe): {body}")))
}

fn parse_version(body: &str) -> Result<SmartSdrVersion> {
    let mut numbers = [0u32; 4];
    let mut count = 0;
    for part in body.split('.') {
        let slot = numbers
            .get_mut(count)
            .ok_or_else(|| Error::Protocol(format!("invalid version format: V{body}")))?;
        *slot = part
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid version number: {part}")))?;
        count += 1;
    }
    if count != 4 {
        return Err(Error::Protocol(format!("invalid version format: V{body}")));
    }
    let [major, minor, patch, build] = numbers;
    Ok(SmartSdrVersion {
        major,
        minor,
        patch,
        build,
    })
}

fn parse_reply(body: &str) -> Result<ReplyLine> {
    let mut parts = body.splitn(3, '|');
    let seq = parts.next().unwrap_or_default();
    let Some(code) = parts.next() else {
        return Err(Error::Protocol(format!("malformed reply (need seq|code): R{body}")));
    };
    Ok(ReplyLine {
        sequence: seq
            .parse()
            .map_err(|_| Error::Protocol(format!("invalid reply sequence number: {seq}")))?,
        code: parse_hex_u32(code)
            .ok_or_else(|| Error::Protocol(format!("invalid reply code: {code}")))?,
        message: parts.next().unwrap_or_default().to_string(),
    })
}

fn parse_status(body: &str) -> Result<StatusLine> {
    let (handle, payload) = split_pipe(body, "status")?;
    Ok(StatusLine {
        handle: parse_hex_u32(handle)
            .ok_or_else(|| Error::Protocol(format!("invalid status handle: {handle}")))?,
        payload: payload.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- Frequency conversion -----------------------------------------------

    #[test]
    fn mhz_to_hz_basic() {
        assert_eq!(mhz_to_hz(14.250000), 14_250_000);
        assert_eq!(mhz_to_hz(1.8), 1_800_000);
        assert_eq!(mhz_to_hz(0.0), 0);
    }

    #[test]
    fn frequency_round_trip_hf() {
        for &hz in &[1_850_001u64, 7_074_000, 14_250_000, 28_074_000, 54_000_000] {
            assert_eq!(mhz_to_hz(hz_to_mhz(hz)), hz, "round-trip failed for {hz}");
        }
    }

    #[test]
    fn hex_with_and_without_prefix() {
        assert_eq!(parse_hex_u32("0x40000001"), Some(0x4000_0001));
        assert_eq!(parse_hex_u32("40000001"), Some(0x4000_0001));
        assert_eq!(parse_hex_u32("0X1"), Some(1));
        assert_eq!(parse_hex_u32("0x"), None);
        assert_eq!(parse_hex_u32("zz"), None);
    }

    // -- Command encoding ---------------------------------------------------

    #[test]
    fn encode_command_seq_zero() {
        assert_eq!(encode_command(0, "xmit 1"), b"C0|xmit 1\n");
    }

    #[test]
    fn encode_command_large_seq() {
        assert_eq!(encode_command(99999, "info"), b"C99999|info\n");
    }

    #[test]
    fn encode_diagnostic() {
        assert_eq!(encode_diagnostic_command(7, "ping"), b"CD7|ping\n");
    }

    #[test]
    fn command_builders() {
        assert_eq!(cmd_client_program("flexsync"), "client program flexsync");
        assert_eq!(cmd_client_udpport(4991), "client udpport 4991");
        assert_eq!(cmd_subscribe("slice all"), "sub slice all");
        assert_eq!(cmd_keepalive_enable(), "keepalive enable");
        assert_eq!(cmd_ping(), "ping");
        assert_eq!(cmd_slice_tune(0, 14_250_000), "slice tune 0 14.250000");
        assert_eq!(
            cmd_slice_create(7_074_000, "DIGU"),
            "slice create freq=7.074000 mode=DIGU"
        );
        assert_eq!(cmd_slice_remove(2), "slice remove 2");
        assert_eq!(
            cmd_stream_create_dax_rx(1),
            "stream create type=dax_rx dax_channel=1"
        );
        assert_eq!(cmd_stream_remove(0x42), "stream remove 0x00000042");
    }

    // -- Handshake ----------------------------------------------------------

    #[test]
    fn parse_version_line() {
        let msg = parse_line("V1.4.0.0").unwrap();
        assert_eq!(
            msg,
            InboundLine::Version(SmartSdrVersion {
                major: 1,
                minor: 4,
                patch: 0,
                build: 0,
            })
        );
    }

    #[test]
    fn parse_version_invalid() {
        assert!(parse_line("V1.4.0").is_err());
        assert!(parse_line("V1.4.abc.0").is_err());
    }

    #[test]
    fn version_display() {
        let v = SmartSdrVersion {
            major: 3,
            minor: 10,
            patch: 15,
            build: 3201,
        };
        assert_eq!(v.to_string(), "3.10.15.3201");
    }

    #[test]
    fn parse_handle_line() {
        assert_eq!(parse_line("H12345678").unwrap(), InboundLine::Handle(0x12345678));
        assert!(parse_line("HXYZ").is_err());
    }

    // -- Replies ------------------------------------------------------------

    #[test]
    fn parse_reply_success_empty() {
        assert_eq!(
            parse_line("R1|00000000|").unwrap(),
            InboundLine::Reply(ReplyLine {
                sequence: 1,
                code: 0,
                message: String::new(),
            })
        );
    }

    #[test]
    fn parse_reply_short_code() {
        // The radio does not always zero-pad the code.
        assert_eq!(
            parse_line("R5|0|ok").unwrap(),
            InboundLine::Reply(ReplyLine {
                sequence: 5,
                code: 0,
                message: "ok".into(),
            })
        );
    }

    #[test]
    fn parse_reply_error_keeps_pipes_in_text() {
        assert_eq!(
            parse_line("R2|50000015|Invalid slice|extra").unwrap(),
            InboundLine::Reply(ReplyLine {
                sequence: 2,
                code: 0x5000_0015,
                message: "Invalid slice|extra".into(),
            })
        );
    }

    #[test]
    fn parse_reply_without_text() {
        assert_eq!(
            parse_line("R1|00000000").unwrap(),
            InboundLine::Reply(ReplyLine {
                sequence: 1,
                code: 0,
                message: String::new(),
            })
        );
    }

    #[test]
    fn parse_reply_malformed() {
        assert!(parse_line("R1").is_err());
        assert!(parse_line("Rabc|0|").is_err());
        assert!(parse_line("R1|ZZZZ|").is_err());
    }

    // -- Status -------------------------------------------------------------

    #[test]
    fn parse_status_keeps_payload_whole() {
        let msg = parse_line(
            "S12345678|slice 0 RF_frequency=14.250000 mode=USB filter_lo=100 filter_hi=2900",
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundLine::Status(StatusLine {
                handle: 0x12345678,
                payload: "slice 0 RF_frequency=14.250000 mode=USB filter_lo=100 filter_hi=2900"
                    .into(),
            })
        );
    }

    #[test]
    fn parse_status_prefixed_handle() {
        match parse_line("S0x1|slice in_use=0").unwrap() {
            InboundLine::Status(s) => {
                assert_eq!(s.handle, 1);
                assert_eq!(s.payload, "slice in_use=0");
            }
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_status_malformed() {
        assert!(parse_line("S12345678 no pipe").is_err());
        assert!(parse_line("SNOTAHEX|slice 0").is_err());
    }

    // -- Messages and unknown -----------------------------------------------

    #[test]
    fn parse_message_line() {
        assert_eq!(
            parse_line("M10000001|Client connected").unwrap(),
            InboundLine::Message {
                code: 0x1000_0001,
                text: "Client connected".into(),
            }
        );
    }

    #[test]
    fn parse_unknown_and_empty() {
        assert_eq!(
            parse_line("X something").unwrap(),
            InboundLine::Unknown("X something".into())
        );
        assert!(parse_line("").is_err());
        assert!(parse_line("   ").is_err());
    }

    #[test]
    fn split_key_value_first_equals_only() {
        assert_eq!(split_key_value("a=b=c"), Some(("a", "b=c")));
        assert_eq!(split_key_value("removed"), None);
    }
}
