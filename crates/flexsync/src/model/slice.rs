//! Slice receivers.
//!
//! ```text
//! S<h>|slice 0 in_use=1 RF_frequency=14.250000 mode=USB pan=0x40000000 filter_lo=100 filter_hi=2900
//! S<h>|slice 0 in_use=0
//! ```

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{DaxAudioStream, EventSink, Field, ObjectGraph, ObjectRef, Panadapter, Registry, Resource, coerce};

/// A tuning slice: an independent receiver within a panadapter.
#[derive(Debug)]
pub struct Slice {
    /// Tuned frequency in Hz.
    pub frequency_hz: ConcurrentProperty<u64>,
    /// Demodulation mode, e.g. "USB", "CW", "DIGU".
    pub mode: ConcurrentProperty<String>,
    /// Modes this slice may use.
    pub mode_list: ConcurrentProperty<Vec<String>>,
    /// Panadapter displaying this slice.
    pub pan: ConcurrentProperty<Option<ObjectRef<Panadapter>>>,
    pub filter_lo: ConcurrentProperty<i32>,
    pub filter_hi: ConcurrentProperty<i32>,
    pub active: ConcurrentProperty<bool>,
    /// Whether this slice is the transmit slice.
    pub tx: ConcurrentProperty<bool>,
    /// DAX channel the slice's audio is routed to (0 = none).
    pub dax_channel: ConcurrentProperty<u32>,
    pub rx_antenna: ConcurrentProperty<String>,
    pub audio_level: ConcurrentProperty<u32>,
    pub audio_mute: ConcurrentProperty<bool>,
    pub agc_mode: ConcurrentProperty<String>,
    pub locked: ConcurrentProperty<bool>,
    /// Owning client handle.
    pub client_handle: ConcurrentProperty<u32>,
    /// Letter shown in GUIs ("A", "B", ...).
    pub index_letter: ConcurrentProperty<String>,
}

impl Default for Slice {
    fn default() -> Self {
        Slice {
            frequency_hz: ConcurrentProperty::new("frequency_hz", 0),
            mode: ConcurrentProperty::new("mode", String::new()),
            mode_list: ConcurrentProperty::new("mode_list", Vec::new()),
            pan: ConcurrentProperty::new("pan", None),
            filter_lo: ConcurrentProperty::new("filter_lo", 0),
            filter_hi: ConcurrentProperty::new("filter_hi", 0),
            active: ConcurrentProperty::new("active", false),
            tx: ConcurrentProperty::new("tx", false),
            dax_channel: ConcurrentProperty::new("dax_channel", 0),
            rx_antenna: ConcurrentProperty::new("rx_antenna", String::new()),
            audio_level: ConcurrentProperty::new("audio_level", 0),
            audio_mute: ConcurrentProperty::new("audio_mute", false),
            agc_mode: ConcurrentProperty::new("agc_mode", String::new()),
            locked: ConcurrentProperty::new("locked", false),
            client_handle: ConcurrentProperty::new("client_handle", 0),
            index_letter: ConcurrentProperty::new("index_letter", String::new()),
        }
    }
}

static FIELDS: &[Field<Slice>] = &[
    Field::new("rf_frequency", |s, v, _| {
        s.frequency_hz.write(coerce::mhz(v)?);
        Ok(())
    }),
    Field::new("mode", |s, v, _| {
        s.mode.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("mode_list", |s, v, _| {
        s.mode_list.write(coerce::list(v)?);
        Ok(())
    }),
    Field::new("pan", |s, v, g| {
        s.pan.write(ObjectRef::resolve(g, coerce::hex(v)?));
        Ok(())
    }),
    Field::new("filter_lo", |s, v, _| {
        s.filter_lo.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("filter_hi", |s, v, _| {
        s.filter_hi.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("active", |s, v, _| {
        s.active.write(coerce::boolean(v)?);
        Ok(())
    }),
    Field::new("tx", |s, v, _| {
        s.tx.write(coerce::boolean(v)?);
        Ok(())
    }),
    Field::new("dax", |s, v, _| {
        s.dax_channel.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("rxant", |s, v, _| {
        s.rx_antenna.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("audio_level", |s, v, _| {
        s.audio_level.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("audio_mute", |s, v, _| {
        s.audio_mute.write(coerce::boolean(v)?);
        Ok(())
    }),
    Field::new("agc_mode", |s, v, _| {
        s.agc_mode.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("lock", |s, v, _| {
        s.locked.write(coerce::boolean(v)?);
        Ok(())
    }),
    Field::new("client_handle", |s, v, _| {
        s.client_handle.write(coerce::hex(v)?);
        Ok(())
    }),
    Field::new("index_letter", |s, v, _| {
        s.index_letter.write(coerce::text(v)?);
        Ok(())
    }),
];

impl Resource for Slice {
    type Id = u32;
    const KIND: ResourceKind = ResourceKind::Slice;
    const TOKEN: &'static str = "slice";

    fn parse_id(token: &str) -> Option<u32> {
        token.parse().ok()
    }

    fn format_id(id: u32) -> String {
        id.to_string()
    }

    /// Some firmware omits the index on single-slice status lines.
    fn default_id() -> Option<u32> {
        Some(0)
    }

    fn fields() -> &'static [Field<Self>] {
        FIELDS
    }

    fn is_viable(&self) -> bool {
        self.frequency_hz.read() > 0 && self.mode.with(|m| !m.is_empty())
    }

    fn registry(graph: &ObjectGraph) -> &Registry<Self> {
        graph.slices()
    }

    /// Audio streams fed by this slice lose their slice reference.
    fn on_removed(graph: &ObjectGraph, _events: &EventSink, id: u32) {
        for stream in graph.audio_streams().all() {
            let points_here = stream
                .slice
                .with(|r| r.as_ref().is_some_and(|r| r.id() == id));
            if points_here {
                stream.slice.write(None);
                tracing::debug!(
                    stream_id = %DaxAudioStream::format_id(stream.id()),
                    slice = id,
                    "audio stream detached from removed slice"
                );
            }
        }
    }
}
