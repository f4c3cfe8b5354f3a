//! Radio roster bookkeeping.
//!
//! [`Roster`] is pure state: it is fed announcements and sweep ticks with an
//! explicit timestamp and returns the events they cause. The discovery task
//! owns one and forwards the events.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use flexsync_core::{ClientSession, DiscoveryEvent};

use super::DiscoveredRadio;

/// One known radio.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub radio: DiscoveredRadio,
    /// Learned over WAN rather than from a LAN broadcast.
    pub is_wan: bool,
    pub last_seen: Instant,
}

/// Known radios keyed by `(serial, is_wan)`.
#[derive(Debug, Default)]
pub struct Roster {
    entries: HashMap<(String, bool), RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, serial: &str, is_wan: bool) -> Option<&RosterEntry> {
        self.entries.get(&(serial.to_string(), is_wan))
    }

    /// Snapshot of every entry, ordered by serial with LAN before WAN.
    pub fn entries(&self) -> Vec<RosterEntry> {
        let mut all: Vec<RosterEntry> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| (&a.radio.serial, a.is_wan).cmp(&(&b.radio.serial, b.is_wan)));
        all
    }

    /// Record an announcement.
    ///
    /// A first sighting yields `RadioAdded` followed by one `ClientAdded`
    /// per attached session. A repeat sighting refreshes the entry and
    /// yields the client diff by handle: every `ClientRemoved` first, then
    /// every `ClientAdded`.
    pub fn announce(
        &mut self,
        radio: DiscoveredRadio,
        is_wan: bool,
        now: Instant,
    ) -> Vec<DiscoveryEvent> {
        let key = (radio.serial.clone(), is_wan);
        let serial = radio.serial.clone();

        let Some(entry) = self.entries.get_mut(&key) else {
            let mut events = vec![DiscoveryEvent::RadioAdded {
                serial: serial.clone(),
                is_wan,
            }];
            events.extend(radio.clients.iter().map(|c| DiscoveryEvent::ClientAdded {
                serial: serial.clone(),
                client: c.clone(),
            }));
            tracing::debug!(serial = %serial, is_wan, model = %radio.model, "radio added");
            self.entries.insert(
                key,
                RosterEntry {
                    radio,
                    is_wan,
                    last_seen: now,
                },
            );
            return events;
        };

        let events = diff_clients(&serial, &entry.radio.clients, &radio.clients);
        entry.radio = radio;
        entry.last_seen = now;
        events
    }

    /// Remove local entries not seen within `timeout`. WAN entries are
    /// never swept.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<DiscoveryEvent> {
        let mut expired: Vec<(String, bool)> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.is_wan && now.saturating_duration_since(e.last_seen) > timeout)
            .map(|(k, _)| k.clone())
            .collect();
        expired.sort();

        expired
            .into_iter()
            .filter_map(|key| self.entries.remove(&key))
            .map(|e| {
                tracing::debug!(serial = %e.radio.serial, "radio timed out");
                DiscoveryEvent::RadioRemoved {
                    serial: e.radio.serial,
                    is_wan: false,
                }
            })
            .collect()
    }

    /// Remove a WAN entry.
    pub fn remove_wan(&mut self, serial: &str) -> Option<DiscoveryEvent> {
        self.entries
            .remove(&(serial.to_string(), true))
            .map(|e| DiscoveryEvent::RadioRemoved {
                serial: e.radio.serial,
                is_wan: true,
            })
    }

    /// Mark every entry as seen at `now`.
    pub fn touch_all(&mut self, now: Instant) {
        for e in self.entries.values_mut() {
            e.last_seen = now;
        }
    }
}

fn diff_clients(
    serial: &str,
    old: &[ClientSession],
    new: &[ClientSession],
) -> Vec<DiscoveryEvent> {
    let removed = old
        .iter()
        .filter(|o| !new.iter().any(|n| n.handle == o.handle))
        .map(|c| DiscoveryEvent::ClientRemoved {
            serial: serial.to_string(),
            client: c.clone(),
        });
    let added = new
        .iter()
        .filter(|n| !old.iter().any(|o| o.handle == n.handle))
        .map(|c| DiscoveryEvent::ClientAdded {
            serial: serial.to_string(),
            client: c.clone(),
        });
    removed.chain(added).collect()
}
