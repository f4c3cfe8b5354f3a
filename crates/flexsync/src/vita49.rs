//! VITA-49.0 frame codec for SmartSDR UDP traffic.
//!
//! SmartSDR radios stream meters, panadapter FFT bins, DAX audio, DAX IQ and
//! discovery announcements as VITA-49.0 "extension data with stream id"
//! packets. Every packet starts with the same 28-byte header:
//!
//! ```text
//! offset  size  field
//!  0      4     header word (type, C, T, TSI, TSF, packet count, size)
//!  4      4     stream id
//!  8      4     OUI (24 bits) in the low three bytes
//! 12      2     information class code
//! 14      2     packet class code
//! 16      4     integer timestamp
//! 20      8     fractional timestamp
//! ```
//!
//! Decoding is bounds-checked; a header that declares more words than the
//! buffer holds yields `None`. Nothing here touches a socket.

use bytes::{BufMut, Bytes, BytesMut};

/// VITA-49 header size in bytes.
pub const HEADER_SIZE: usize = 28;

/// Largest payload a packet can carry: the 12-bit size field counts 32-bit
/// words including the header.
pub const MAX_PAYLOAD: usize = 0x0FFF * 4 - HEADER_SIZE;

/// FlexRadio OUI carried in the class id field.
pub const FLEXRADIO_OUI: u32 = 0x001C2D;

/// Information class code used by SmartSDR radios.
pub const FLEX_INFO_CLASS: u16 = 0x534C;

/// "Extension data with stream id" packet type.
pub const PACKET_TYPE_EXT_DATA: u8 = 0x3;

/// Packet class codes used by SmartSDR streams.
pub mod class {
    pub const METER: u16 = 0x8002;
    pub const FFT: u16 = 0x8003;
    pub const WATERFALL: u16 = 0x8004;
    pub const OPUS: u16 = 0x8005;
    pub const DAX_IQ_24: u16 = 0x02E3;
    pub const DAX_IQ_48: u16 = 0x02E4;
    pub const DAX_IQ_96: u16 = 0x02E5;
    pub const DAX_IQ_192: u16 = 0x02E6;
    pub const DAX_AUDIO: u16 = 0x03E3;
    pub const DAX_AUDIO_REDUCED: u16 = 0x0123;
    pub const DISCOVERY: u16 = 0xFFFF;
}

/// Stream type identified by the packet class code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Meter readings -- class code 0x8002.
    Meter,
    /// Panadapter FFT bins -- class code 0x8003.
    Fft,
    /// Waterfall tiles -- class code 0x8004.
    Waterfall,
    /// Opus compressed audio -- class code 0x8005.
    Opus,
    /// DAX IQ at the given sample rate in ksps -- class codes 0x02E3..0x02E6.
    DaxIq(u32),
    /// DAX audio, float32 stereo -- class code 0x03E3.
    DaxAudio,
    /// Reduced-bandwidth DAX audio, int16 mono -- class code 0x0123.
    DaxAudioReduced,
    /// Discovery announcement -- class code 0xFFFF.
    Discovery,
    /// Unrecognized class code.
    Unknown(u16),
}

impl StreamType {
    /// Classify a packet class code.
    pub fn from_class_code(code: u16) -> Self {
        match code {
            class::METER => StreamType::Meter,
            class::FFT => StreamType::Fft,
            class::WATERFALL => StreamType::Waterfall,
            class::OPUS => StreamType::Opus,
            class::DAX_IQ_24 => StreamType::DaxIq(24),
            class::DAX_IQ_48 => StreamType::DaxIq(48),
            class::DAX_IQ_96 => StreamType::DaxIq(96),
            class::DAX_IQ_192 => StreamType::DaxIq(192),
            class::DAX_AUDIO => StreamType::DaxAudio,
            class::DAX_AUDIO_REDUCED => StreamType::DaxAudioReduced,
            class::DISCOVERY => StreamType::Discovery,
            other => StreamType::Unknown(other),
        }
    }
}

/// A decoded VITA-49 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Packet type (bits 31-28 of the header word).
    pub packet_type: u8,
    /// Packet class code identifying the stream type.
    pub class_code: u16,
    /// Information class code.
    pub info_class: u16,
    /// OUI from the class id field.
    pub oui: u32,
    /// Stream id identifying the stream instance.
    pub stream_id: u32,
    /// 4-bit rolling packet counter.
    pub sequence: u8,
    /// Integer timestamp (seconds).
    pub timestamp_int: u32,
    /// Fractional timestamp.
    pub timestamp_frac: u64,
    /// Payload bytes, up to the declared packet size. Borrowed from the
    /// receive buffer.
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// A SmartSDR data frame with the standard OUI, info class, and zero
    /// timestamps.
    pub fn new(class_code: u16, stream_id: u32, sequence: u8, payload: &'a [u8]) -> Self {
        Frame {
            packet_type: PACKET_TYPE_EXT_DATA,
            class_code,
            info_class: FLEX_INFO_CLASS,
            oui: FLEXRADIO_OUI,
            stream_id,
            sequence: sequence & 0x0F,
            timestamp_int: 0,
            timestamp_frac: 0,
            payload,
        }
    }

    /// Classify this frame by its class code.
    pub fn stream_type(&self) -> StreamType {
        StreamType::from_class_code(self.class_code)
    }
}

fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Decode a datagram into a [`Frame`].
///
/// Returns `None` when the buffer is shorter than the header or when the
/// declared packet size exceeds the buffer. Bytes past the declared size are
/// ignored.
pub fn decode(data: &[u8]) -> Option<Frame<'_>> {
    if data.len() < HEADER_SIZE {
        return None;
    }

    let header_word = be_u32(data, 0);
    let packet_type = ((header_word >> 28) & 0x0F) as u8;
    let sequence = ((header_word >> 12) & 0x0F) as u8;
    let size_words = (header_word & 0x0FFF) as usize;
    let size_bytes = size_words * 4;

    if size_bytes < HEADER_SIZE || size_bytes > data.len() {
        return None;
    }

    let stream_id = be_u32(data, 4);
    let oui = be_u32(data, 8) & 0x00FF_FFFF;
    let class_lower = be_u32(data, 12);
    let info_class = (class_lower >> 16) as u16;
    let class_code = (class_lower & 0xFFFF) as u16;
    let timestamp_int = be_u32(data, 16);
    let timestamp_frac = u64::from_be_bytes([
        data[20], data[21], data[22], data[23], data[24], data[25], data[26], data[27],
    ]);

    if oui != FLEXRADIO_OUI {
        tracing::trace!(oui, "VITA-49 frame from foreign OUI");
    }

    Some(Frame {
        packet_type,
        class_code,
        info_class,
        oui,
        stream_id,
        sequence,
        timestamp_int,
        timestamp_frac,
        payload: &data[HEADER_SIZE..size_bytes],
    })
}

/// Encode a frame into a datagram.
///
/// The payload is zero-padded to a 32-bit boundary so the size field stays
/// exact. Returns `None` when the payload exceeds [`MAX_PAYLOAD`].
pub fn encode(frame: &Frame<'_>) -> Option<Bytes> {
    if frame.payload.len() > MAX_PAYLOAD {
        return None;
    }
    let padded = frame.payload.len().div_ceil(4) * 4;
    let total = HEADER_SIZE + padded;
    let size_words = (total / 4) as u32;

    let mut header_word: u32 = 0;
    header_word |= (frame.packet_type as u32 & 0x0F) << 28;
    header_word |= 1 << 27; // class id present
    header_word |= 0x01 << 22; // TSI: UTC
    header_word |= 0x01 << 20; // TSF: sample count
    header_word |= (frame.sequence as u32 & 0x0F) << 12;
    header_word |= size_words;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(header_word);
    buf.put_u32(frame.stream_id);
    buf.put_u32(frame.oui & 0x00FF_FFFF);
    buf.put_u16(frame.info_class);
    buf.put_u16(frame.class_code);
    buf.put_u32(frame.timestamp_int);
    buf.put_u64(frame.timestamp_frac);
    buf.put_slice(frame.payload);
    buf.put_bytes(0, padded - frame.payload.len());
    Some(buf.freeze())
}

// ---------------------------------------------------------------------------
// Meter payload
// ---------------------------------------------------------------------------

/// A single meter reading from a meter packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReading {
    /// Meter id (matches the `meter` status id).
    pub meter_id: u16,
    /// Raw signed value in the meter's fixed-point units.
    pub value: i16,
}

/// Split a meter packet payload into `(id, value)` readings.
///
/// Each reading is 4 bytes, big-endian. A trailing partial reading is
/// ignored.
pub fn meter_readings(payload: &[u8]) -> impl Iterator<Item = MeterReading> + '_ {
    payload.chunks_exact(4).map(|c| MeterReading {
        meter_id: u16::from_be_bytes([c[0], c[1]]),
        value: i16::from_be_bytes([c[2], c[3]]),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_header(sequence: u8, size_words: u16, stream_id: u32, class_code: u16) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        let hw: u32 = (0x3 << 28)
            | (1 << 27)
            | ((sequence as u32 & 0x0F) << 12)
            | (size_words as u32 & 0x0FFF);
        buf.extend_from_slice(&hw.to_be_bytes());
        buf.extend_from_slice(&stream_id.to_be_bytes());
        buf.extend_from_slice(&FLEXRADIO_OUI.to_be_bytes());
        buf.extend_from_slice(&FLEX_INFO_CLASS.to_be_bytes());
        buf.extend_from_slice(&class_code.to_be_bytes());
        buf.extend_from_slice(&0x6500_0000u32.to_be_bytes());
        buf.extend_from_slice(&42u64.to_be_bytes());
        buf
    }

    #[test]
    fn class_codes() {
        assert_eq!(StreamType::from_class_code(0x8002), StreamType::Meter);
        assert_eq!(StreamType::from_class_code(0x8003), StreamType::Fft);
        assert_eq!(StreamType::from_class_code(0x02E3), StreamType::DaxIq(24));
        assert_eq!(StreamType::from_class_code(0x02E6), StreamType::DaxIq(192));
        assert_eq!(StreamType::from_class_code(0x03E3), StreamType::DaxAudio);
        assert_eq!(
            StreamType::from_class_code(0x0123),
            StreamType::DaxAudioReduced
        );
        assert_eq!(StreamType::from_class_code(0xFFFF), StreamType::Discovery);
        assert_eq!(
            StreamType::from_class_code(0x1234),
            StreamType::Unknown(0x1234)
        );
    }

    #[test]
    fn decode_header_fields() {
        let mut pkt = raw_header(9, 8, 0x4000_0001, class::FFT);
        pkt.extend_from_slice(&[1, 2, 3, 4]);
        let frame = decode(&pkt).unwrap();
        assert_eq!(frame.packet_type, 3);
        assert_eq!(frame.class_code, class::FFT);
        assert_eq!(frame.info_class, FLEX_INFO_CLASS);
        assert_eq!(frame.oui, FLEXRADIO_OUI);
        assert_eq!(frame.stream_id, 0x4000_0001);
        assert_eq!(frame.sequence, 9);
        assert_eq!(frame.timestamp_int, 0x6500_0000);
        assert_eq!(frame.timestamp_frac, 42);
        assert_eq!(frame.payload, &[1, 2, 3, 4]);
        assert_eq!(frame.stream_type(), StreamType::Fft);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(decode(&[]).is_none());
        assert!(decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn decode_rejects_size_beyond_buffer() {
        // Header claims 10 words (40 bytes) but only 28 are present.
        let pkt = raw_header(0, 10, 1, class::METER);
        assert!(decode(&pkt).is_none());
    }

    #[test]
    fn decode_rejects_size_smaller_than_header() {
        let mut pkt = raw_header(0, 2, 1, class::METER);
        pkt.extend_from_slice(&[0; 8]);
        assert!(decode(&pkt).is_none());
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut pkt = raw_header(0, 8, 1, class::METER);
        pkt.extend_from_slice(&[0xAA; 4]);
        pkt.extend_from_slice(&[0xFF; 12]);
        let frame = decode(&pkt).unwrap();
        assert_eq!(frame.payload, &[0xAA; 4]);
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let payload = [0u8, 1, 0, 100, 0, 2, 0xFF, 0x9C];
        let mut frame = Frame::new(class::METER, 0x0000_0700, 13, &payload);
        frame.timestamp_int = 7;
        frame.timestamp_frac = 99;
        let bytes = encode(&frame).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + payload.len());
        assert_eq!(decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn encode_pads_to_word_boundary() {
        let frame = Frame::new(class::DISCOVERY, 0x800, 0, b"serial=1");
        let padded = Frame::new(class::DISCOVERY, 0x800, 0, b"serial=12");
        assert_eq!(encode(&frame).unwrap().len(), HEADER_SIZE + 8);
        let bytes = encode(&padded).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 12);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(&decoded.payload[..9], b"serial=12");
        assert_eq!(&decoded.payload[9..], &[0, 0, 0]);
    }

    #[test]
    fn encode_refuses_payload_beyond_size_field() {
        let largest = vec![0xAB; MAX_PAYLOAD];
        let bytes = encode(&Frame::new(class::FFT, 1, 0, &largest)).unwrap();
        assert_eq!(bytes.len(), 0x0FFF * 4);
        assert_eq!(decode(&bytes).unwrap().payload.len(), MAX_PAYLOAD);

        let oversized = vec![0u8; MAX_PAYLOAD + 1];
        assert!(encode(&Frame::new(class::FFT, 1, 0, &oversized)).is_none());
    }

    #[test]
    fn sequence_masked_to_four_bits() {
        let frame = Frame::new(class::FFT, 1, 0x1F, &[]);
        assert_eq!(frame.sequence, 0x0F);
    }

    #[test]
    fn meter_readings_split() {
        let payload = [0x00, 0x05, 0xFF, 0x80, 0x00, 0x06, 0x01, 0x00, 0x01];
        let readings: Vec<_> = meter_readings(&payload).collect();
        assert_eq!(
            readings,
            vec![
                MeterReading {
                    meter_id: 5,
                    value: -128
                },
                MeterReading {
                    meter_id: 6,
                    value: 256
                },
            ]
        );
    }
}
