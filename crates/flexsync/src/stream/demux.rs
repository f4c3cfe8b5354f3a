//! Class-code demultiplexer for VITA-49 datagrams.
//!
//! Runs on the UDP receive task. For each datagram: decode, classify by
//! class code, look up the owning object by stream id, run the sequence
//! check, decode the payload, deliver it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::model::ObjectGraph;
use crate::vita49::{self, StreamType};

use super::StreamSequencer;
use super::decode::{self, AudioFrame};

/// Demultiplexer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DemuxCounters {
    /// Datagrams that decoded as VITA-49 frames.
    pub frames: u64,
    /// Datagrams that did not decode.
    pub malformed: u64,
    /// Frames with a class code this client does not handle.
    pub unknown_class: u64,
    /// Frames of a known class with no owning object.
    pub orphaned: u64,
}

/// Routes decoded frames to the stream objects in an [`ObjectGraph`].
#[derive(Debug, Default)]
pub struct StreamDemux {
    frames: AtomicU64,
    malformed: AtomicU64,
    unknown_class: AtomicU64,
    orphaned: AtomicU64,
    meter_sequence: StreamSequencer,
}

impl StreamDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> DemuxCounters {
        DemuxCounters {
            frames: self.frames.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown_class: self.unknown_class.load(Ordering::Relaxed),
            orphaned: self.orphaned.load(Ordering::Relaxed),
        }
    }

    /// Sequence state of the shared meter stream.
    pub fn meter_sequencer(&self) -> &StreamSequencer {
        &self.meter_sequence
    }

    /// Handle one received datagram.
    pub fn handle_datagram(&self, graph: &ObjectGraph, data: &[u8]) {
        let Some(frame) = vita49::decode(data) else {
            self.malformed.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(len = data.len(), "undecodable datagram");
            return;
        };
        self.frames.fetch_add(1, Ordering::Relaxed);

        let stream_id = frame.stream_id;
        let delivered = match frame.stream_type() {
            StreamType::Meter => {
                self.meter_sequence.check(frame.sequence);
                self.route_meters(graph, frame.payload);
                true
            }
            StreamType::Fft => self.route_fft(graph, &frame),
            StreamType::DaxAudio | StreamType::DaxAudioReduced => {
                self.route_audio(graph, &frame)
            }
            StreamType::DaxIq(rate) => self.route_iq(graph, &frame, rate),
            StreamType::Waterfall | StreamType::Opus | StreamType::Discovery => false,
            StreamType::Unknown(code) => {
                self.unknown_class.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(class_code = format!("0x{:04X}", code), "unknown class code");
                return;
            }
        };

        if !delivered {
            self.orphaned.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                stream_id = format!("0x{:08X}", stream_id),
                class_code = format!("0x{:04X}", frame.class_code),
                "frame without an owning stream"
            );
        }
    }

    fn route_meters(&self, graph: &ObjectGraph, payload: &[u8]) {
        for reading in vita49::meter_readings(payload) {
            match graph.meters().get(&reading.meter_id) {
                Some(meter) => meter.set_raw(reading.value),
                None => {
                    tracing::trace!(meter_id = reading.meter_id, "reading for unknown meter");
                }
            }
        }
    }

    fn route_fft(&self, graph: &ObjectGraph, frame: &vita49::Frame<'_>) -> bool {
        let Some(pan) = graph.panadapters().get(&frame.stream_id) else {
            return false;
        };
        pan.stream.sequencer().check(frame.sequence);

        let complete = {
            let mut asm = pan
                .assembler
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if asm.push(frame.payload) {
                let stream_id = frame.stream_id;
                Some(pan.frames.fill(|out| asm.take_into(stream_id, out)))
            } else {
                None
            }
        };
        if let Some(fft) = complete {
            pan.stream.deliver(&fft);
        }
        true
    }

    fn route_audio(&self, graph: &ObjectGraph, frame: &vita49::Frame<'_>) -> bool {
        let Some(stream) = graph.audio_streams().get(&frame.stream_id) else {
            return false;
        };
        stream.stream.sequencer().check(frame.sequence);

        let mut audio = AudioFrame::default();
        if frame.class_code == vita49::class::DAX_AUDIO_REDUCED {
            decode::decode_reduced_audio(frame.stream_id, frame.payload, &mut audio);
        } else {
            decode::decode_dax_audio(frame.stream_id, frame.payload, &mut audio);
        }
        stream.stream.deliver(&audio);
        true
    }

    fn route_iq(&self, graph: &ObjectGraph, frame: &vita49::Frame<'_>, rate: u32) -> bool {
        let Some(stream) = graph.iq_streams().get(&frame.stream_id) else {
            return false;
        };
        stream.stream.sequencer().check(frame.sequence);

        let iq = stream
            .frames
            .fill(|out| decode::decode_iq(frame.stream_id, rate, frame.payload, out));
        stream.stream.deliver(&iq);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{self, Resource};
    use flexsync_test_harness::vita;
    use std::sync::{Arc, Mutex};
    use tokio::sync::broadcast;

    fn graph_with(lines: &[&str]) -> ObjectGraph {
        let (tx, _rx) = broadcast::channel(64);
        let graph = ObjectGraph::new();
        for line in lines {
            let (token, rest) = line.split_once(' ').unwrap();
            match token {
                "slice" => model::apply_status::<model::Slice>(&graph, &tx, rest),
                "pan" => model::apply_status::<model::Panadapter>(&graph, &tx, rest),
                "audio_stream" => model::apply_status::<model::DaxAudioStream>(&graph, &tx, rest),
                "dax_iq" => model::apply_status::<model::DaxIqStream>(&graph, &tx, rest),
                "meter" => model::apply_status::<model::Meter>(&graph, &tx, rest),
                _ => unreachable!(),
            }
        }
        graph
    }

    #[test]
    fn audio_routed_with_loss_counting() {
        let graph = graph_with(&["audio_stream 0x04000008 ip=10.0.0.2 port=4991"]);
        let stream = graph.audio_streams().get(&0x0400_0008).unwrap();
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        stream.stream.set_consumer(move |f: &AudioFrame| {
            sink.lock().unwrap().push(f.left.clone());
        });

        let demux = StreamDemux::new();
        let payload = vita::dax_audio_payload(&[(0.5, -0.5)]);
        for seq in [0u8, 1, 2, 5, 6] {
            let pkt = vita::data_packet(vita::CLASS_DAX_AUDIO, 0x0400_0008, seq, &payload);
            demux.handle_datagram(&graph, &pkt);
        }

        assert_eq!(stream.stream.lost(), 1);
        assert_eq!(stream.stream.sequencer().expected(), Some(7));
        assert_eq!(stream.stream.frames(), 5);
        assert_eq!(got.lock().unwrap().len(), 5);
        assert_eq!(got.lock().unwrap()[0], vec![0.5]);
        assert_eq!(demux.counters().frames, 5);
    }

    #[test]
    fn reduced_bandwidth_audio_decoded_as_mono() {
        let graph = graph_with(&["audio_stream 0x04000009 ip=10.0.0.2 port=4991"]);
        let stream = graph.audio_streams().get(&0x0400_0009).unwrap();
        let got = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&got);
        stream.stream.set_consumer(move |f: &AudioFrame| {
            *sink.lock().unwrap() = Some(f.clone());
        });

        let payload = vita::reduced_audio_payload(&[16384, -16384]);
        let pkt = vita::data_packet(vita::CLASS_DAX_AUDIO_REDUCED, 0x0400_0009, 0, &payload);
        StreamDemux::new().handle_datagram(&graph, &pkt);

        let f = got.lock().unwrap().clone().unwrap();
        assert!(f.reduced_bandwidth);
        assert_eq!(f.left, vec![0.5, -0.5]);
    }

    #[test]
    fn decode_happens_without_consumer() {
        let graph = graph_with(&["audio_stream 0x04000008 ip=10.0.0.2 port=4991"]);
        let demux = StreamDemux::new();
        let pkt = vita::data_packet(vita::CLASS_DAX_AUDIO, 0x0400_0008, 3, &[0; 8]);
        demux.handle_datagram(&graph, &pkt);
        let stream = graph.audio_streams().get(&0x0400_0008).unwrap();
        assert_eq!(stream.stream.frames(), 1);
        assert_eq!(stream.stream.sequencer().expected(), Some(4));
    }

    #[test]
    fn unknown_and_orphaned_are_counted() {
        let graph = ObjectGraph::new();
        let demux = StreamDemux::new();
        demux.handle_datagram(&graph, &vita::data_packet(0x1234, 1, 0, &[]));
        demux.handle_datagram(&graph, &vita::data_packet(vita::CLASS_DAX_AUDIO, 99, 0, &[]));
        demux.handle_datagram(&graph, &vita::data_packet(vita::CLASS_WATERFALL, 98, 0, &[]));
        demux.handle_datagram(&graph, &[0u8; 5]);
        assert_eq!(
            demux.counters(),
            DemuxCounters {
                frames: 3,
                malformed: 1,
                unknown_class: 1,
                orphaned: 2,
            }
        );
    }

    #[test]
    fn meter_values_scaled_by_unit() {
        let graph = graph_with(&["meter 5.nam=LEVEL#5.unit=dBm#6.nam=PATEMP#6.unit=degC"]);
        let payload = vita::meter_payload(&[(5, -128 * 80), (6, 64 * 35), (99, 1)]);
        let demux = StreamDemux::new();
        demux.handle_datagram(&graph, &vita::data_packet(vita::CLASS_METER, 0x700, 0, &payload));

        assert_eq!(graph.meters().get(&5).unwrap().value.read(), -80.0);
        assert_eq!(graph.meters().get(&6).unwrap().value.read(), 35.0);
        assert_eq!(demux.counters().orphaned, 0);
        assert_eq!(demux.meter_sequencer().expected(), Some(1));
    }

    #[test]
    fn fft_frames_assembled_and_pooled() {
        let graph = graph_with(&["pan 0x40000000 center=14.1 bandwidth=0.2"]);
        let pan = graph.panadapters().get(&0x4000_0000).unwrap();
        let held = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&held);
        pan.stream.set_consumer(move |f: &Arc<decode::FftFrame>| {
            // Keep every frame: the pool must never overwrite them.
            sink.lock().unwrap().push(Arc::clone(f));
        });

        let demux = StreamDemux::new();
        let mut seq = 0u8;
        for frame_index in 0..8u32 {
            let v = frame_index as u16;
            for (start, bins) in [(0u16, [v, v]), (2, [v + 100, v + 100])] {
                let payload = vita::fft_payload(start, &bins, 4, frame_index);
                let pkt = vita::data_packet(vita::CLASS_FFT, 0x4000_0000, seq, &payload);
                demux.handle_datagram(&graph, &pkt);
                seq = (seq + 1) % 16;
            }
        }

        let held = held.lock().unwrap();
        assert_eq!(held.len(), 8);
        for (i, f) in held.iter().enumerate() {
            let v = i as u16;
            assert_eq!(f.frame_index, i as u32);
            assert_eq!(f.bins, vec![v, v, v + 100, v + 100]);
        }
        assert!(pan.frames.fresh_allocations() >= 2);
        assert_eq!(pan.stream.lost(), 0);
    }

    #[test]
    fn iq_frames_use_rate_from_class_code() {
        let graph = graph_with(&["dax_iq 0x20000000 ip=10.0.0.2 port=4991"]);
        let stream = graph.iq_streams().get(&0x2000_0000).unwrap();
        let got = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&got);
        stream.stream.set_consumer(move |f: &Arc<decode::IqFrame>| {
            sink.lock().unwrap().push((f.sample_rate_ksps, f.i.clone(), f.q.clone()));
        });
        let payload = vita::iq_payload(&[(0.25, -0.25)]);
        let pkt = vita::data_packet(vita::CLASS_DAX_IQ_96, 0x2000_0000, 0, &payload);
        StreamDemux::new().handle_datagram(&graph, &pkt);
        assert_eq!(*got.lock().unwrap(), vec![(96, vec![0.25], vec![-0.25])]);
        assert_eq!(model::DaxIqStream::format_id(stream.id()), "0x20000000");
    }
}
