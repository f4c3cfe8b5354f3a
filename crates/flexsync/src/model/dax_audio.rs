//! DAX receive audio streams.
//!
//! ```text
//! S<h>|audio_stream 0x04000008 type=dax_rx dax_channel=1 slice=0 ip=192.168.1.50 port=4991
//! S<h>|audio_stream 0x04000008 removed
//! ```
//!
//! Packets arrive with class code 0x03E3 (float32 stereo) or, when the
//! radio is asked for reduced bandwidth, 0x0123 (int16 mono).

use std::net::Ipv4Addr;

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{Field, ObjectGraph, ObjectRef, Registry, Resource, Slice, coerce};
use crate::stream::{AudioFrame, StreamEndpoint};

pub struct DaxAudioStream {
    /// Stream type reported by the radio, e.g. "dax_rx".
    pub stream_type: ConcurrentProperty<String>,
    pub dax_channel: ConcurrentProperty<u32>,
    /// Slice feeding this stream.
    pub slice: ConcurrentProperty<Option<ObjectRef<Slice>>>,
    pub client_handle: ConcurrentProperty<u32>,
    /// Destination address of the UDP stream.
    pub ip: ConcurrentProperty<Option<Ipv4Addr>>,
    pub port: ConcurrentProperty<u16>,
    pub stream: StreamEndpoint<AudioFrame>,
}

impl Default for DaxAudioStream {
    fn default() -> Self {
        DaxAudioStream {
            stream_type: ConcurrentProperty::new("type", String::new()),
            dax_channel: ConcurrentProperty::new("dax_channel", 0),
            slice: ConcurrentProperty::new("slice", None),
            client_handle: ConcurrentProperty::new("client_handle", 0),
            ip: ConcurrentProperty::new("ip", None),
            port: ConcurrentProperty::new("port", 0),
            stream: StreamEndpoint::default(),
        }
    }
}

impl std::fmt::Debug for DaxAudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaxAudioStream")
            .field("dax_channel", &self.dax_channel.read())
            .field("slice", &self.slice.read())
            .field("ip", &self.ip.read())
            .field("port", &self.port.read())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

static FIELDS: &[Field<DaxAudioStream>] = &[
    Field::new("type", |s, v, _| {
        s.stream_type.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("dax_channel", |s, v, _| {
        s.dax_channel.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("slice", |s, v, g| {
        s.slice.write(ObjectRef::resolve(g, coerce::int(v)?));
        Ok(())
    }),
    Field::new("client_handle", |s, v, _| {
        s.client_handle.write(coerce::hex(v)?);
        Ok(())
    }),
    Field::new("ip", |s, v, _| {
        s.ip.write(Some(coerce::ip(v)?));
        Ok(())
    }),
    Field::new("port", |s, v, _| {
        s.port.write(coerce::int(v)?);
        Ok(())
    }),
];

impl Resource for DaxAudioStream {
    type Id = u32;
    const KIND: ResourceKind = ResourceKind::DaxAudioStream;
    const TOKEN: &'static str = "audio_stream";

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
        self.ip.read().is_some() && self.port.read() > 0
    }

    fn registry(graph: &ObjectGraph) -> &Registry<Self> {
        graph.audio_streams()
    }
}
