//! VITA-49 datagram builders.
//!
//! Packets are laid out by hand so tests exercise the decoder against an
//! independent encoding.

use bytes::{BufMut, BytesMut};

/// VITA-49 header size in bytes (header, stream id, class id, timestamps).
pub const HEADER_SIZE: usize = 28;

/// FlexRadio OUI.
pub const FLEXRADIO_OUI: u32 = 0x001C2D;

/// FlexRadio information class code.
pub const FLEX_INFO_CLASS: u16 = 0x534C;

pub const CLASS_METER: u16 = 0x8002;
pub const CLASS_FFT: u16 = 0x8003;
pub const CLASS_WATERFALL: u16 = 0x8004;
pub const CLASS_DAX_IQ_96: u16 = 0x02E5;
pub const CLASS_DAX_AUDIO: u16 = 0x03E3;
pub const CLASS_DAX_AUDIO_REDUCED: u16 = 0x0123;
pub const CLASS_DISCOVERY: u16 = 0xFFFF;

/// Build an extension data packet with the given class code, stream id and
/// 4-bit sequence number. The payload is zero-padded to a word boundary.
///
/// # Panics
///
/// If the packet would not fit the 12-bit size field.
pub fn data_packet(class_code: u16, stream_id: u32, sequence: u8, payload: &[u8]) -> Vec<u8> {
    let padded = payload.len().div_ceil(4) * 4;
    let total = HEADER_SIZE + padded;
    assert!(total / 4 <= 0x0FFF, "payload of {} bytes too large", payload.len());

    let mut hw: u32 = 0;
    hw |= 0x3 << 28; // extension data with stream id
    hw |= 1 << 27; // class id present
    hw |= 0x01 << 22; // TSI
    hw |= 0x01 << 20; // TSF
    hw |= (u32::from(sequence) & 0x0F) << 12;
    hw |= (total / 4) as u32 & 0x0FFF;

    let mut buf = BytesMut::with_capacity(total);
    buf.put_u32(hw);
    buf.put_u32(stream_id);
    buf.put_u32(FLEXRADIO_OUI);
    buf.put_u16(FLEX_INFO_CLASS);
    buf.put_u16(class_code);
    buf.put_u32(0);
    buf.put_u64(0);
    buf.put_slice(payload);
    buf.put_bytes(0, padded - payload.len());
    buf.to_vec()
}

/// Build a discovery announcement carrying `text` verbatim.
pub fn discovery_text_packet(text: &str) -> Vec<u8> {
    data_packet(CLASS_DISCOVERY, 0x0000_0800, 0, text.as_bytes())
}

/// Build a discovery announcement from `key=value` pairs.
pub fn discovery_packet(fields: &[(&str, &str)]) -> Vec<u8> {
    let text = fields
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ");
    discovery_text_packet(&text)
}

/// Meter packet payload: big-endian `(id, value)` pairs.
pub fn meter_payload(readings: &[(u16, i16)]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(readings.len() * 4);
    for (id, value) in readings {
        buf.put_u16(*id);
        buf.put_i16(*value);
    }
    buf.to_vec()
}

/// DAX audio payload: little-endian float32 left/right pairs.
pub fn dax_audio_payload(samples: &[(f32, f32)]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(samples.len() * 8);
    for (l, r) in samples {
        buf.put_f32_le(*l);
        buf.put_f32_le(*r);
    }
    buf.to_vec()
}

/// Reduced-bandwidth DAX audio payload: big-endian i16 mono samples.
pub fn reduced_audio_payload(samples: &[i16]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for s in samples {
        buf.put_i16(*s);
    }
    buf.to_vec()
}

/// DAX IQ payload: little-endian float32 I/Q pairs.
pub fn iq_payload(samples: &[(f32, f32)]) -> Vec<u8> {
    dax_audio_payload(samples)
}

/// One FFT segment: `start_bin`, `num_bins`, `bin_size`, `total_bins`,
/// `frame_index` header followed by big-endian u16 bins.
pub fn fft_payload(start_bin: u16, bins: &[u16], total_bins: u16, frame_index: u32) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(12 + bins.len() * 2);
    buf.put_u16(start_bin);
    buf.put_u16(bins.len() as u16);
    buf.put_u16(2);
    buf.put_u16(total_bins);
    buf.put_u32(frame_index);
    for b in bins {
        buf.put_u16(*b);
    }
    buf.to_vec()
}
