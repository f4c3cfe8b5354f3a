//! Panadapter displays and their FFT streams.
//!
//! ```text
//! S<h>|display pan 0x40000000 center=14.100000 bandwidth=0.200000 min_dbm=-135 max_dbm=-40 fps=25
//! S<h>|display pan 0x40000000 removed
//! ```

use std::sync::{Arc, Mutex};

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{DaxIqStream, EventSink, Field, ObjectGraph, Registry, Resource, coerce, remove};
use crate::stream::pool::{FramePool, PANADAPTER_POOL_SIZE};
use crate::stream::{FftAssembler, FftFrame, StreamEndpoint};

/// A panadapter: a spectrum display fed by an FFT stream whose stream id is
/// the panadapter id.
pub struct Panadapter {
    /// Center frequency in Hz.
    pub center_hz: ConcurrentProperty<u64>,
    /// Displayed span in Hz.
    pub bandwidth_hz: ConcurrentProperty<u64>,
    pub min_dbm: ConcurrentProperty<f64>,
    pub max_dbm: ConcurrentProperty<f64>,
    pub fps: ConcurrentProperty<u32>,
    pub average: ConcurrentProperty<u32>,
    pub x_pixels: ConcurrentProperty<u32>,
    pub y_pixels: ConcurrentProperty<u32>,
    pub rx_antenna: ConcurrentProperty<String>,
    pub band: ConcurrentProperty<String>,
    /// Stream id of the paired waterfall.
    pub waterfall: ConcurrentProperty<u32>,
    pub client_handle: ConcurrentProperty<u32>,
    /// FFT stream state and consumer.
    pub stream: StreamEndpoint<Arc<FftFrame>>,
    pub(crate) assembler: Mutex<FftAssembler>,
    pub(crate) frames: FramePool<FftFrame>,
}

impl Default for Panadapter {
    fn default() -> Self {
        Panadapter {
            center_hz: ConcurrentProperty::new("center_hz", 0),
            bandwidth_hz: ConcurrentProperty::new("bandwidth_hz", 0),
            min_dbm: ConcurrentProperty::new("min_dbm", 0.0),
            max_dbm: ConcurrentProperty::new("max_dbm", 0.0),
            fps: ConcurrentProperty::new("fps", 0),
            average: ConcurrentProperty::new("average", 0),
            x_pixels: ConcurrentProperty::new("x_pixels", 0),
            y_pixels: ConcurrentProperty::new("y_pixels", 0),
            rx_antenna: ConcurrentProperty::new("rx_antenna", String::new()),
            band: ConcurrentProperty::new("band", String::new()),
            waterfall: ConcurrentProperty::new("waterfall", 0),
            client_handle: ConcurrentProperty::new("client_handle", 0),
            stream: StreamEndpoint::default(),
            assembler: Mutex::new(FftAssembler::default()),
            frames: FramePool::new(PANADAPTER_POOL_SIZE),
        }
    }
}

impl std::fmt::Debug for Panadapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panadapter")
            .field("center_hz", &self.center_hz.read())
            .field("bandwidth_hz", &self.bandwidth_hz.read())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

static FIELDS: &[Field<Panadapter>] = &[
    Field::new("center", |p, v, _| {
        p.center_hz.write(coerce::mhz(v)?);
        Ok(())
    }),
    Field::new("bandwidth", |p, v, _| {
        p.bandwidth_hz.write(coerce::mhz(v)?);
        Ok(())
    }),
    Field::new("min_dbm", |p, v, _| {
        p.min_dbm.write(coerce::float(v)?);
        Ok(())
    }),
    Field::new("max_dbm", |p, v, _| {
        p.max_dbm.write(coerce::float(v)?);
        Ok(())
    }),
    Field::new("fps", |p, v, _| {
        p.fps.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("average", |p, v, _| {
        p.average.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("x_pixels", |p, v, _| {
        p.x_pixels.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("y_pixels", |p, v, _| {
        p.y_pixels.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("rxant", |p, v, _| {
        p.rx_antenna.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("band", |p, v, _| {
        p.band.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("waterfall", |p, v, _| {
        p.waterfall.write(coerce::hex(v)?);
        Ok(())
    }),
    Field::new("client_handle", |p, v, _| {
        p.client_handle.write(coerce::hex(v)?);
        Ok(())
    }),
];

impl Resource for Panadapter {
    type Id = u32;
    const KIND: ResourceKind = ResourceKind::Panadapter;
    const TOKEN: &'static str = "display pan";

    fn parse_id(token: &str) -> Option<u32> {
        crate::codec::parse_hex_u32(token)
    }

    fn format_id(id: u32) -> String {
        format!("0x{id:08X}")
    }

    fn fields() -> &'static [Field<Self>] {
        FIELDS
    }

    fn is_viable(&self) -> bool {
        self.center_hz.read() > 0 && self.bandwidth_hz.read() > 0
    }

    fn registry(graph: &ObjectGraph) -> &Registry<Self> {
        graph.panadapters()
    }

    /// DAX IQ streams bound to the panadapter go with it; slices keep
    /// existing but lose their display reference.
    fn on_removed(graph: &ObjectGraph, events: &EventSink, id: u32) {
        let bound = graph
            .iq_streams()
            .ids_where(|iq| iq.pan.with(|r| r.as_ref().is_some_and(|r| r.id() == id)));
        for iq_id in bound {
            remove::<DaxIqStream>(graph, events, iq_id);
        }
        for slice in graph.slices().all() {
            if slice.pan.with(|r| r.as_ref().is_some_and(|r| r.id() == id)) {
                slice.pan.write(None);
            }
        }
    }
}
