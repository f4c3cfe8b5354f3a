//! Radio meters.
//!
//! Meter status uses its own record format: `#`-separated
//! `<id>.<key>=<value>` entries, several meters per line.
//!
//! ```text
//! S<h>|meter 5.src=SLC#5.num=0#5.nam=LEVEL#5.low=-150.0#5.hi=20.0#5.unit=dBm#5.fps=10#
//! S<h>|meter 5 removed
//! ```
//!
//! Values arrive over UDP in meter packets (class 0x8002) as raw `i16`
//! fixed-point numbers; [`MeterUnit::scale`] converts them.

use flexsync_core::{ConcurrentProperty, ResourceKind};

use super::{Field, ObjectGraph, Registry, Resource, StatusRecord, coerce, parse_whitespace_record};

/// Signal level of a slice receiver.
pub const METER_LEVEL: &str = "LEVEL";
/// Forward transmit power.
pub const METER_FORWARD_POWER: &str = "FWDPWR";
/// Reflected transmit power.
pub const METER_REFLECTED_POWER: &str = "REFPWR";
pub const METER_SWR: &str = "SWR";
pub const METER_ALC: &str = "ALC";

/// Unit of a meter, which also fixes its fixed-point scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeterUnit {
    #[default]
    None,
    Dbm,
    Dbfs,
    Swr,
    Volts,
    Amps,
    DegreesC,
    DegreesF,
    Rpm,
    Watts,
    Percent,
}

impl MeterUnit {
    pub fn parse(s: &str) -> Option<Self> {
        let unit = match s.to_ascii_lowercase().as_str() {
            "dbm" => MeterUnit::Dbm,
            "dbfs" => MeterUnit::Dbfs,
            "swr" => MeterUnit::Swr,
            "volts" => MeterUnit::Volts,
            "amps" => MeterUnit::Amps,
            "degc" => MeterUnit::DegreesC,
            "degf" => MeterUnit::DegreesF,
            "rpm" => MeterUnit::Rpm,
            "watts" => MeterUnit::Watts,
            "percent" => MeterUnit::Percent,
            "none" | "" => MeterUnit::None,
            _ => return None,
        };
        Some(unit)
    }

    /// Convert a raw meter packet value into this unit.
    pub fn scale(self, raw: i16) -> f64 {
        let raw = raw as f64;
        match self {
            MeterUnit::Dbm | MeterUnit::Dbfs | MeterUnit::Swr => raw / 128.0,
            MeterUnit::Volts | MeterUnit::Amps => raw / 256.0,
            MeterUnit::DegreesC | MeterUnit::DegreesF => raw / 64.0,
            MeterUnit::None
            | MeterUnit::Rpm
            | MeterUnit::Watts
            | MeterUnit::Percent => raw,
        }
    }
}

#[derive(Debug)]
pub struct Meter {
    /// Source subsystem, e.g. "SLC", "TX-", "RAD".
    pub source: ConcurrentProperty<String>,
    /// Index within the source (the slice index for "SLC" meters).
    pub source_index: ConcurrentProperty<u32>,
    pub name: ConcurrentProperty<String>,
    pub description: ConcurrentProperty<String>,
    pub low: ConcurrentProperty<f64>,
    pub high: ConcurrentProperty<f64>,
    pub unit: ConcurrentProperty<MeterUnit>,
    pub fps: ConcurrentProperty<u32>,
    /// Latest scaled value.
    pub value: ConcurrentProperty<f64>,
}

impl Default for Meter {
    fn default() -> Self {
        Meter {
            source: ConcurrentProperty::new("src", String::new()),
            source_index: ConcurrentProperty::new("num", 0),
            name: ConcurrentProperty::new("nam", String::new()),
            description: ConcurrentProperty::new("desc", String::new()),
            low: ConcurrentProperty::new("low", 0.0),
            high: ConcurrentProperty::new("hi", 0.0),
            unit: ConcurrentProperty::new("unit", MeterUnit::None),
            fps: ConcurrentProperty::new("fps", 0),
            value: ConcurrentProperty::new("value", 0.0),
        }
    }
}

impl Meter {
    /// Store a raw packet value, scaled by the meter's unit.
    pub fn set_raw(&self, raw: i16) {
        let scaled = self.unit.read().scale(raw);
        self.value.write(scaled);
    }
}

static FIELDS: &[Field<Meter>] = &[
    Field::new("src", |m, v, _| {
        m.source.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("num", |m, v, _| {
        m.source_index.write(coerce::int(v)?);
        Ok(())
    }),
    Field::new("nam", |m, v, _| {
        m.name.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("desc", |m, v, _| {
        m.description.write(coerce::text(v)?);
        Ok(())
    }),
    Field::new("low", |m, v, _| {
        m.low.write(coerce::float(v)?);
        Ok(())
    }),
    Field::new("hi", |m, v, _| {
        m.high.write(coerce::float(v)?);
        Ok(())
    }),
    Field::new("unit", |m, v, _| {
        let unit = MeterUnit::parse(v).ok_or_else(|| {
            flexsync_core::Error::Protocol(format!("unknown meter unit {v:?}"))
        })?;
        m.unit.write(unit);
        Ok(())
    }),
    Field::new("fps", |m, v, _| {
        m.fps.write(coerce::int(v)?);
        Ok(())
    }),
];

impl Resource for Meter {
    type Id = u16;
    const KIND: ResourceKind = ResourceKind::Meter;
    const TOKEN: &'static str = "meter";

    fn parse_id(token: &str) -> Option<u16> {
        token.parse().ok()
    }

    fn format_id(id: u16) -> String {
        id.to_string()
    }

    fn fields() -> &'static [Field<Self>] {
        FIELDS
    }

    fn is_viable(&self) -> bool {
        self.name.with(|n| !n.is_empty())
    }

    fn registry(graph: &ObjectGraph) -> &Registry<Self> {
        graph.meters()
    }

    fn parse_records(rest: &str) -> Vec<StatusRecord<u16>> {
        let first = rest.split(['#', ' ']).find(|t| !t.is_empty()).unwrap_or("");
        if !is_dotted_entry(first) {
            // "<id> removed" and similar.
            return parse_whitespace_record::<Self>(rest).into_iter().collect();
        }

        let mut records: Vec<StatusRecord<u16>> = Vec::new();
        for entry in rest.split('#').map(str::trim).filter(|e| !e.is_empty()) {
            let parsed = entry
                .split_once('.')
                .and_then(|(id, kv)| Some((Self::parse_id(id)?, kv.split_once('=')?)));
            let Some((id, (key, value))) = parsed else {
                tracing::warn!(entry, "malformed meter status entry");
                continue;
            };
            let pair = (key.to_string(), value.to_string());
            match records.iter_mut().find(|r| r.id == id) {
                Some(r) => r.pairs.push(pair),
                None => records.push(StatusRecord {
                    id,
                    pairs: vec![pair],
                    in_use: true,
                }),
            }
        }
        records
    }
}

fn is_dotted_entry(token: &str) -> bool {
    token
        .split_once('.')
        .is_some_and(|(id, kv)| id.parse::<u16>().is_ok() && kv.contains('='))
}

impl ObjectGraph {
    /// Find a meter by name, optionally restricted to a source.
    pub fn meter_by_name(
        &self,
        name: &str,
        source: Option<&str>,
    ) -> Option<std::sync::Arc<super::ModelObject<Meter>>> {
        self.meters().all().into_iter().find(|m| {
            m.name.with(|n| n.eq_ignore_ascii_case(name))
                && source.is_none_or(|s| m.source.with(|src| src.eq_ignore_ascii_case(s)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_scaling() {
        assert_eq!(MeterUnit::Dbm.scale(-128 * 73), -73.0);
        assert_eq!(MeterUnit::Swr.scale(192), 1.5);
        assert_eq!(MeterUnit::Volts.scale(256 * 13), 13.0);
        assert_eq!(MeterUnit::DegreesC.scale(64 * 40), 40.0);
        assert_eq!(MeterUnit::Watts.scale(100), 100.0);
    }

    #[test]
    fn unit_parse_is_case_insensitive() {
        assert_eq!(MeterUnit::parse("dBm"), Some(MeterUnit::Dbm));
        assert_eq!(MeterUnit::parse("degC"), Some(MeterUnit::DegreesC));
        assert_eq!(MeterUnit::parse("furlongs"), None);
    }

    #[test]
    fn records_grouped_by_id() {
        let recs = Meter::parse_records("5.src=SLC#5.nam=LEVEL#6.nam=SWR#5.unit=dBm#");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, 5);
        assert_eq!(
            recs[0].pairs,
            vec![
                ("src".to_string(), "SLC".to_string()),
                ("nam".to_string(), "LEVEL".to_string()),
                ("unit".to_string(), "dBm".to_string()),
            ]
        );
        assert_eq!(recs[1].id, 6);
        assert!(recs.iter().all(|r| r.in_use));
    }

    #[test]
    fn value_with_dot_is_kept_whole() {
        let recs = Meter::parse_records("7.low=-150.0#7.hi=20.0");
        assert_eq!(recs[0].pairs[0], ("low".to_string(), "-150.0".to_string()));
    }

    #[test]
    fn removal_uses_whitespace_form() {
        let recs = Meter::parse_records("5 removed");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].id, 5);
        assert!(!recs[0].in_use);
    }

    #[test]
    fn malformed_entries_skipped() {
        let recs = Meter::parse_records("5.nam=LEVEL#garbage#x.nam=Y#5.fps=10");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pairs.len(), 2);
    }

    #[test]
    fn set_raw_scales_by_unit() {
        let m = Meter::default();
        m.unit.write(MeterUnit::Dbm);
        m.set_raw(-128 * 100);
        assert_eq!(m.value.read(), -100.0);
    }
}
