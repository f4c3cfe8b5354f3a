//! Wire-text to typed-value conversions used by the resource field tables.
//!
//! Every function returns [`Error::Protocol`] naming the expected kind when
//! the text does not convert; the status router logs it and moves on.

use std::net::Ipv4Addr;
use std::str::FromStr;

use flexsync_core::{Error, Result};

use crate::codec;

fn bad(expected: &str, value: &str) -> Error {
    Error::Protocol(format!("expected {expected}, got {value:?}"))
}

/// Decimal integer of any width.
pub fn int<N: FromStr>(value: &str) -> Result<N> {
    value.trim().parse().map_err(|_| bad("integer", value))
}

/// `1` or `0`.
pub fn boolean(value: &str) -> Result<bool> {
    match value.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        _ => Err(bad("boolean 1/0", value)),
    }
}

pub fn float(value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or_else(|| bad("float", value))
}

/// Frequency given in MHz, stored in Hz.
pub fn mhz(value: &str) -> Result<u64> {
    let f = float(value).map_err(|_| bad("frequency in MHz", value))?;
    if f < 0.0 {
        return Err(bad("non-negative frequency", value));
    }
    Ok(codec::mhz_to_hz(f))
}

/// Free text. The radio encodes spaces inside values as `0x7f`.
pub fn text(value: &str) -> Result<String> {
    Ok(value.replace('\u{7f}', " "))
}

/// Comma-separated list; an empty value is an empty list.
pub fn list(value: &str) -> Result<Vec<String>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    Ok(value.split(',').map(|s| s.to_string()).collect())
}

/// Hex handle or stream id, with or without `0x`.
pub fn hex(value: &str) -> Result<u32> {
    codec::parse_hex_u32(value.trim()).ok_or_else(|| bad("hex handle", value))
}

/// Dotted-quad IPv4 address.
pub fn ip(value: &str) -> Result<Ipv4Addr> {
    Ipv4Addr::from_str(value.trim()).map_err(|_| bad("IPv4 address", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers() {
        assert_eq!(int::<u32>("42").unwrap(), 42);
        assert_eq!(int::<i32>("-100").unwrap(), -100);
        assert!(int::<u16>("70000").is_err());
        assert!(int::<u32>("abc").is_err());
    }

    #[test]
    fn booleans() {
        assert!(boolean("1").unwrap());
        assert!(!boolean("0").unwrap());
        assert!(boolean("yes").is_err());
    }

    #[test]
    fn floats_reject_non_finite() {
        assert_eq!(float("-150.5").unwrap(), -150.5);
        assert!(float("NaN").is_err());
        assert!(float("inf").is_err());
    }

    #[test]
    fn megahertz_to_hertz() {
        assert_eq!(mhz("14.250000").unwrap(), 14_250_000);
        assert_eq!(mhz("0.000001").unwrap(), 1);
        assert!(mhz("-1.0").is_err());
        assert!(mhz("fast").is_err());
    }

    #[test]
    fn text_restores_spaces() {
        assert_eq!(text("My\u{7f}Station").unwrap(), "My Station");
    }

    #[test]
    fn lists() {
        assert_eq!(list("LSB,USB,CW").unwrap(), vec!["LSB", "USB", "CW"]);
        assert!(list("").unwrap().is_empty());
    }

    #[test]
    fn hex_handles() {
        assert_eq!(hex("0x40000001").unwrap(), 0x4000_0001);
        assert_eq!(hex("40000001").unwrap(), 0x4000_0001);
        assert!(hex("0xZZ").is_err());
    }

    #[test]
    fn ipv4() {
        assert_eq!(ip("192.168.1.50").unwrap(), Ipv4Addr::new(192, 168, 1, 50));
        assert!(ip("192.168.1").is_err());
    }
}
