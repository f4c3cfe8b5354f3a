//! The object graph and the generic status-driven lifecycle engine.
//!
//! Each radio resource type (slice, panadapter, DAX stream, meter, GUI
//! client) is described by a [`Resource`] implementation: its status token,
//! how its id is written, a table mapping wire keys to typed fields, a
//! minimum-viable predicate, and an optional removal cascade. One generic
//! engine ([`apply_status`]) turns status payloads into create / update /
//! remove operations on the matching [`Registry`].
//!
//! Lifecycle rules for one status record:
//!
//! - not in use (`in_use=0`, or a bare `removed` / `disconnected` token):
//!   announce [`RadioEvent::ObjectRemoving`], erase, run the cascade. An
//!   absent id is a no-op.
//! - in use: create on first sight, apply the pairs in order, and once the
//!   minimum-viable predicate holds, mark initialized and announce
//!   [`RadioEvent::ObjectAdded`] (once per object lifetime).
//!
//! Unknown keys and values that fail to convert are logged and skipped;
//! the remaining pairs still apply.

use std::fmt;
use std::hash::Hash;

use tokio::sync::broadcast;

use flexsync_core::{RadioEvent, ResourceKind, Result};

pub mod coerce;
mod dax_audio;
mod dax_iq;
mod gui_client;
mod meter;
mod panadapter;
mod registry;
mod slice;

pub use dax_audio::DaxAudioStream;
pub use dax_iq::DaxIqStream;
pub use gui_client::GuiClient;
pub use meter::{Meter, MeterUnit};
pub use panadapter::Panadapter;
pub use registry::{ModelObject, ObjectRef, Registry};
pub use slice::Slice;

/// Event sink shared by the lifecycle engine and the removal cascades.
pub type EventSink = broadcast::Sender<RadioEvent>;

/// Applies one converted wire value to a resource's fields.
pub type ApplyFn<T> = fn(&T, &str, &ObjectGraph) -> Result<()>;

/// One entry of a resource field table.
pub struct Field<T> {
    /// Wire key, matched case-insensitively.
    pub key: &'static str,
    /// Converter + setter.
    pub apply: ApplyFn<T>,
}

impl<T> Field<T> {
    pub const fn new(key: &'static str, apply: ApplyFn<T>) -> Self {
        Field { key, apply }
    }
}

/// One object's worth of a status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord<Id> {
    pub id: Id,
    /// Key/value pairs in wire order, lifecycle keys removed.
    pub pairs: Vec<(String, String)>,
    pub in_use: bool,
}

/// A resource type tracked in the object graph.
pub trait Resource: Default + Send + Sync + Sized + 'static {
    /// Id type, unique per resource type.
    type Id: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Resource category for events.
    const KIND: ResourceKind;

    /// Status token(s) naming this resource, e.g. `"slice"` or
    /// `"display pan"`.
    const TOKEN: &'static str;

    /// Parse an id as it appears in a status line.
    fn parse_id(token: &str) -> Option<Self::Id>;

    /// Format an id the way the radio writes it.
    fn format_id(id: Self::Id) -> String;

    /// Id assumed when a status line carries none.
    fn default_id() -> Option<Self::Id> {
        None
    }

    /// Wire key to field table.
    fn fields() -> &'static [Field<Self>];

    /// Minimum viable field set.
    fn is_viable(&self) -> bool;

    /// This resource's registry in the graph.
    fn registry(graph: &ObjectGraph) -> &Registry<Self>;

    /// Split the payload following the token into records. The default
    /// reads an optional id followed by whitespace-separated `key=value`
    /// tokens.
    fn parse_records(rest: &str) -> Vec<StatusRecord<Self::Id>> {
        parse_whitespace_record::<Self>(rest).into_iter().collect()
    }

    /// Runs after an object was erased.
    fn on_removed(_graph: &ObjectGraph, _events: &EventSink, _id: Self::Id) {}
}

/// Whitespace `[id] key=value ... [removed]` record parser.
pub fn parse_whitespace_record<T: Resource>(rest: &str) -> Option<StatusRecord<T::Id>> {
    let mut tokens = rest.split_whitespace().peekable();

    let id = match tokens.peek() {
        Some(first) if !first.contains('=') => match T::parse_id(first) {
            Some(id) => {
                tokens.next();
                Some(id)
            }
            None => None,
        },
        _ => None,
    };
    let Some(id) = id.or_else(T::default_id) else {
        tracing::warn!(kind = %T::KIND, payload = %rest, "status without a usable id");
        return None;
    };

    let mut in_use = true;
    let mut pairs = Vec::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("in_use") => {
                in_use = value != "0";
            }
            Some((key, value)) => pairs.push((key.to_string(), value.to_string())),
            None if token.eq_ignore_ascii_case("removed")
                || token.eq_ignore_ascii_case("disconnected") =>
            {
                in_use = false;
            }
            None => {
                tracing::trace!(kind = %T::KIND, token, "ignoring bare status token");
            }
        }
    }

    Some(StatusRecord { id, pairs, in_use })
}

// ---------------------------------------------------------------------------
// Lifecycle engine
// ---------------------------------------------------------------------------

/// Apply a status payload (everything after the resource token) to the
/// graph.
pub fn apply_status<T: Resource>(graph: &ObjectGraph, events: &EventSink, rest: &str) {
    for record in T::parse_records(rest) {
        apply_record::<T>(graph, events, record);
    }
}

/// Apply one parsed record.
pub fn apply_record<T: Resource>(graph: &ObjectGraph, events: &EventSink, record: StatusRecord<T::Id>) {
    if !record.in_use {
        remove::<T>(graph, events, record.id);
        return;
    }

    let (obj, created) = T::registry(graph).get_or_create(record.id);
    if created {
        tracing::debug!(kind = %T::KIND, id = %obj.display_id(), "object created");
    }

    for (key, value) in &record.pairs {
        let Some(field) = T::fields().iter().find(|f| f.key.eq_ignore_ascii_case(key)) else {
            tracing::warn!(kind = %T::KIND, id = %obj.display_id(), key = %key, "unknown status key");
            continue;
        };
        if let Err(e) = (field.apply)(&obj, value, graph) {
            tracing::warn!(
                kind = %T::KIND,
                id = %obj.display_id(),
                key = %key,
                error = %e,
                "status value skipped"
            );
        }
    }

    if !obj.is_initialized() && obj.is_viable() && obj.initialized.write(true) {
        tracing::debug!(kind = %T::KIND, id = %obj.display_id(), "object initialized");
        let _ = events.send(RadioEvent::ObjectAdded {
            kind: T::KIND,
            id: obj.display_id(),
        });
    }
}

/// Erase an object, announcing it first and cascading after. Returns
/// `false` when no such object was live.
pub fn remove<T: Resource>(graph: &ObjectGraph, events: &EventSink, id: T::Id) -> bool {
    let registry = T::registry(graph);
    if !registry.contains(&id) {
        return false;
    }
    let shown = T::format_id(id);
    let _ = events.send(RadioEvent::ObjectRemoving {
        kind: T::KIND,
        id: shown.clone(),
    });
    if registry.remove(&id).is_none() {
        return false;
    }
    tracing::debug!(kind = %T::KIND, id = %shown, "object removed");
    T::on_removed(graph, events, id);
    true
}

// ---------------------------------------------------------------------------
// Object graph
// ---------------------------------------------------------------------------

/// Every live model object of one radio session.
#[derive(Default)]
pub struct ObjectGraph {
    slices: Registry<Slice>,
    panadapters: Registry<Panadapter>,
    audio_streams: Registry<DaxAudioStream>,
    iq_streams: Registry<DaxIqStream>,
    meters: Registry<Meter>,
    gui_clients: Registry<GuiClient>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slices(&self) -> &Registry<Slice> {
        &self.slices
    }

    pub fn panadapters(&self) -> &Registry<Panadapter> {
        &self.panadapters
    }

    pub fn audio_streams(&self) -> &Registry<DaxAudioStream> {
        &self.audio_streams
    }

    pub fn iq_streams(&self) -> &Registry<DaxIqStream> {
        &self.iq_streams
    }

    pub fn meters(&self) -> &Registry<Meter> {
        &self.meters
    }

    pub fn gui_clients(&self) -> &Registry<GuiClient> {
        &self.gui_clients
    }

    /// Number of live objects of each kind.
    pub fn counts(&self) -> Vec<(ResourceKind, usize)> {
        vec![
            (ResourceKind::Slice, self.slices.len()),
            (ResourceKind::Panadapter, self.panadapters.len()),
            (ResourceKind::DaxAudioStream, self.audio_streams.len()),
            (ResourceKind::DaxIqStream, self.iq_streams.len()),
            (ResourceKind::Meter, self.meters.len()),
            (ResourceKind::GuiClient, self.gui_clients.len()),
        ]
    }
}

impl fmt::Debug for ObjectGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ObjectGraph");
        for (kind, n) in self.counts() {
            d.field(&kind.to_string(), &n);
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_record_with_id() {
        let r = parse_whitespace_record::<Slice>("3 mode=USB RF_frequency=7.074000").unwrap();
        assert_eq!(r.id, 3);
        assert!(r.in_use);
        assert_eq!(
            r.pairs,
            vec![
                ("mode".to_string(), "USB".to_string()),
                ("RF_frequency".to_string(), "7.074000".to_string()),
            ]
        );
    }

    #[test]
    fn whitespace_record_default_id() {
        let r = parse_whitespace_record::<Slice>("in_use=1 mode=USB").unwrap();
        assert_eq!(r.id, 0);
        assert!(r.in_use);
        assert_eq!(r.pairs.len(), 1);
    }

    #[test]
    fn not_in_use_markers() {
        assert!(!parse_whitespace_record::<Slice>("0 in_use=0").unwrap().in_use);
        assert!(
            !parse_whitespace_record::<Panadapter>("0x40000000 removed")
                .unwrap()
                .in_use
        );
        assert!(
            !parse_whitespace_record::<GuiClient>("0x1234 disconnected forced=0")
                .unwrap()
                .in_use
        );
        assert!(
            parse_whitespace_record::<GuiClient>("0x1234 connected program=x")
                .unwrap()
                .in_use
        );
    }

    #[test]
    fn missing_id_without_default_is_skipped() {
        assert!(parse_whitespace_record::<Panadapter>("center=14.1").is_none());
    }

    #[test]
    fn remove_announces_radio_formatted_id_once() {
        let graph = ObjectGraph::new();
        let (events, mut rx) = broadcast::channel(16);
        apply_status::<Panadapter>(&graph, &events, "0x40000001 center=14.100000");
        assert!(graph.panadapters().contains(&0x4000_0001));

        assert!(remove::<Panadapter>(&graph, &events, 0x4000_0001));
        assert!(!remove::<Panadapter>(&graph, &events, 0x4000_0001));
        assert_eq!(
            rx.try_recv().unwrap(),
            RadioEvent::ObjectRemoving {
                kind: ResourceKind::Panadapter,
                id: "0x40000001".into(),
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(graph.panadapters().is_empty());
    }

    #[test]
    fn graph_counts_start_empty() {
        let g = ObjectGraph::new();
        assert!(g.counts().iter().all(|(_, n)| *n == 0));
    }
}
