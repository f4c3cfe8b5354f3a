//! Other GUI client sessions attached to the radio.
//!
//! ```text
//! S<h>|client 0x2A5D1C03 connected local_ptt=1 client_id=9B1E... program=SmartSDR-Win station=SHACK\x7fPC
//! S<h>|client 0x2A5D1C03 disconnected forced=0 wan_validation_failed=0 duplicate_client_id=0
//! ```

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{Field, ObjectGraph, Registry, Resource, coerce};

#[derive(Debug)]
pub struct GuiClient {
    /// Persistent client id (UUID text).
    pub client_id: ConcurrentProperty<String>,
    pub program: ConcurrentProperty<String>,
    /// Station name, spaces restored.
    pub station: ConcurrentProperty<String>,
    pub local_ptt: ConcurrentProperty<bool>,
}

impl Default for GuiClient {
    fn default() -> Self {
        GuiClient {
            client_id: ConcurrentProperty::new("client_id", String::new()),
            program: ConcurrentProperty::new("program", String::new()),
            station: ConcurrentProperty::new("station", String::new()),
            local_ptt: ConcurrentProperty::new("local_ptt", false),
        }
    }
}

static FIELDS: &[Field<GuiClient>] = &[
    Field::new("client_id", |c, v, _| {
        c.client_id.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("program", |c, v, _| {
        c.program.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("station", |c, v, _| {
        c.station.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("local_ptt", |c, v, _| {
        c.local_ptt.write(coerce::boolean(v)?);
        Ok(())
    }),
];

impl Resource for GuiClient {
    type Id = u32;
    const KIND: ResourceKind = ResourceKind::GuiClient;
    const TOKEN: &'static str = "client";

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
        self.program.with(|p| !p.is_empty())
    }

    fn registry(graph: &ObjectGraph) -> &Registry<Self> {
        graph.gui_clients()
    }
}
