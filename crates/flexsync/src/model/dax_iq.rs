//! DAX IQ streams, bound to a panadapter.
//!
//! ```text
//! S<h>|dax_iq 0x20000000 daxiq_channel=1 pan=0x40000000 daxiq_rate=48 active=1 ip=192.168.1.50 port=4991
//! ```

use std::net::Ipv4Addr;
use std::sync::Arc;

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{Field, ObjectGraph, ObjectRef, Panadapter, Registry, Resource, coerce};
use crate::stream::pool::{FramePool, IQ_POOL_SIZE};
use crate::stream::{IqFrame, StreamEndpoint};

pub struct DaxIqStream {
    pub daxiq_channel: ConcurrentProperty<u32>,
    /// Panadapter supplying the IQ data.
    pub pan: ConcurrentProperty<Option<ObjectRef<Panadapter>>>,
    /// Requested sample rate in ksps.
    pub rate_ksps: ConcurrentProperty<u32>,
    pub active: ConcurrentProperty<bool>,
    pub client_handle: ConcurrentProperty<u32>,
    pub ip: ConcurrentProperty<Option<Ipv4Addr>>,
    pub port: ConcurrentProperty<u16>,
    pub stream: StreamEndpoint<Arc<IqFrame>>,
    pub(crate) frames: FramePool<IqFrame>,
}

impl Default for DaxIqStream {
    fn default() -> Self {
        DaxIqStream {
            daxiq_channel: ConcurrentProperty::new("daxiq_channel", 0),
            pan: ConcurrentProperty::new("pan", None),
            rate_ksps: ConcurrentProperty::new("daxiq_rate", 0),
            active: ConcurrentProperty::new("active", false),
            client_handle: ConcurrentProperty::new("client_handle", 0),
            ip: ConcurrentProperty::new("ip", None),
            port: ConcurrentProperty::new("port", 0),
            stream: StreamEndpoint::default(),
            frames: FramePool::new(IQ_POOL_SIZE),
        }
    }
}

impl std::fmt::Debug for DaxIqStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaxIqStream")
            .field("daxiq_channel", &self.daxiq_channel.read())
            .field("pan", &self.pan.read())
            .field("rate_ksps", &self.rate_ksps.read())
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

static FIELDS: &[Field<DaxIqStream>] = &[
    Field::new("daxiq_channel", |s, v, _| {
        s.daxiq_channel.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("pan", |s, v, g| {
        s.pan.write(ObjectRef::resolve(g, coerce::hex(v)?));
        Ok(())
    }),
    Field::new("daxiq_rate", |s, v, _| {
        s.rate_ksps.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("active", |s, v, _| {
        s.active.write(coerce::boolean(v)?);
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

impl Resource for DaxIqStream {
    type Id = u32;
    const KIND: ResourceKind = ResourceKind::DaxIqStream;
    const TOKEN: &'static str = "dax_iq";

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
        graph.iq_streams()
    }
}
