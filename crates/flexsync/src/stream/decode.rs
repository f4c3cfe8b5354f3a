//! Payload decoders for the SmartSDR stream types.
//!
//! All decoders work on borrowed payload slices and never index past the
//! end; a trailing partial sample is dropped.

/// A block of DAX audio, de-interleaved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioFrame {
    pub stream_id: u32,
    /// True when decoded from the reduced-bandwidth int16 mono format. The
    /// mono samples are copied into both channels.
    pub reduced_bandwidth: bool,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// A block of DAX IQ samples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqFrame {
    pub stream_id: u32,
    /// Sample rate in ksps, from the class code.
    pub sample_rate_ksps: u32,
    pub i: Vec<f32>,
    pub q: Vec<f32>,
}

/// One complete panadapter FFT frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FftFrame {
    pub stream_id: u32,
    pub frame_index: u32,
    /// Bin size reported by the radio (bytes per bin on the wire).
    pub bin_size: u16,
    /// Display bins, `total_bins` long.
    pub bins: Vec<u16>,
}

/// DAX audio: interleaved little-endian float32 left/right pairs.
pub fn decode_dax_audio(stream_id: u32, payload: &[u8], out: &mut AudioFrame) {
    out.stream_id = stream_id;
    out.reduced_bandwidth = false;
    out.left.clear();
    out.right.clear();
    for pair in payload.chunks_exact(8) {
        out.left
            .push(f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]));
        out.right
            .push(f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]));
    }
}

/// Reduced-bandwidth DAX audio: big-endian int16 mono, scaled to [-1, 1).
pub fn decode_reduced_audio(stream_id: u32, payload: &[u8], out: &mut AudioFrame) {
    out.stream_id = stream_id;
    out.reduced_bandwidth = true;
    out.left.clear();
    out.right.clear();
    for s in payload.chunks_exact(2) {
        let v = i16::from_be_bytes([s[0], s[1]]) as f32 / 32768.0;
        out.left.push(v);
        out.right.push(v);
    }
}

/// DAX IQ: interleaved little-endian float32 I/Q pairs.
pub fn decode_iq(stream_id: u32, sample_rate_ksps: u32, payload: &[u8], out: &mut IqFrame) {
    out.stream_id = stream_id;
    out.sample_rate_ksps = sample_rate_ksps;
    out.i.clear();
    out.q.clear();
    for pair in payload.chunks_exact(8) {
        out.i
            .push(f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]));
        out.q
            .push(f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]));
    }
}

/// Size of the FFT segment header.
pub const FFT_HEADER_SIZE: usize = 12;

/// Header of one FFT packet: which part of which frame it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FftSegment {
    pub start_bin: u16,
    pub num_bins: u16,
    pub bin_size: u16,
    pub total_bins: u16,
    pub frame_index: u32,
}

impl FftSegment {
    pub fn parse(payload: &[u8]) -> Option<(FftSegment, &[u8])> {
        if payload.len() < FFT_HEADER_SIZE {
            return None;
        }
        let be16 = |o: usize| u16::from_be_bytes([payload[o], payload[o + 1]]);
        let seg = FftSegment {
            start_bin: be16(0),
            num_bins: be16(2),
            bin_size: be16(4),
            total_bins: be16(6),
            frame_index: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
        };
        Some((seg, &payload[FFT_HEADER_SIZE..]))
    }
}

/// Reassembles FFT frames that span several packets.
///
/// Segments of one frame share a frame index. A segment for a new index
/// abandons any incomplete frame in progress. The frame completes once every
/// bin has been written, however the segments overlap.
#[derive(Debug, Default)]
pub struct FftAssembler {
    frame_index: Option<u32>,
    bin_size: u16,
    bins: Vec<u16>,
    /// One flag per bin, set when some segment has covered it.
    filled: Vec<bool>,
    received: usize,
    abandoned: u64,
}

impl FftAssembler {
    /// Feed one packet. Returns `true` when the frame is complete; read it
    /// with [`take_into`](Self::take_into).
    pub fn push(&mut self, payload: &[u8]) -> bool {
        let Some((seg, data)) = FftSegment::parse(payload) else {
            tracing::debug!(len = payload.len(), "FFT packet shorter than its header");
            return false;
        };
        if seg.total_bins == 0 {
            return false;
        }

        if self.frame_index != Some(seg.frame_index) || self.bins.len() != seg.total_bins as usize {
            if self.frame_index.is_some() && self.received > 0 {
                self.abandoned += 1;
            }
            self.frame_index = Some(seg.frame_index);
            self.bin_size = seg.bin_size;
            self.bins.clear();
            self.bins.resize(seg.total_bins as usize, 0);
            self.filled.clear();
            self.filled.resize(seg.total_bins as usize, false);
            self.received = 0;
        }

        let start = seg.start_bin as usize;
        let available = data.len() / 2;
        let count = (seg.num_bins as usize).min(available);
        if start + count > self.bins.len() {
            tracing::debug!(
                start_bin = seg.start_bin,
                num_bins = seg.num_bins,
                total_bins = seg.total_bins,
                "FFT segment outside frame"
            );
            return false;
        }
        let targets = self.bins[start..start + count]
            .iter_mut()
            .zip(&mut self.filled[start..start + count]);
        for ((bin, filled), b) in targets.zip(data.chunks_exact(2)) {
            *bin = u16::from_be_bytes([b[0], b[1]]);
            if !*filled {
                *filled = true;
                self.received += 1;
            }
        }

        self.received >= self.bins.len()
    }

    /// Move the completed frame into `out` and reset for the next one.
    pub fn take_into(&mut self, stream_id: u32, out: &mut FftFrame) {
        out.stream_id = stream_id;
        out.frame_index = self.frame_index.unwrap_or(0);
        out.bin_size = self.bin_size;
        out.bins.clear();
        out.bins.extend_from_slice(&self.bins);
        self.frame_index = None;
        self.bins.clear();
        self.filled.clear();
        self.received = 0;
    }

    /// Frames dropped because a newer frame started before they completed.
    pub fn abandoned(&self) -> u64 {
        self.abandoned
    }
}
