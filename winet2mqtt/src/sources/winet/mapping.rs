//! Conversion of raw poll replies into [`Reading`]s.

use super::messages::{DirectItem, RealtimeItem};
use super::properties::TextLookup;
use crate::status::{Reading, Value};

/// Units whose values are sent as decimal strings.
pub const NUMERIC_UNITS: &[&str] = &[
    "A", "%", "kW", "kWh", "℃", "V", "kvar", "var", "Hz", "kVA", "kΩ",
];

/// Raw value the device sends when it has no reading.
pub const ABSENT: &str = "--";

const I18N_PREFIX: &str = "I18N_";
const INDEX_MARKER: &str = "%@";
const POWER_UNIT: &str = "W";

pub const MPPT_TOTAL_POWER: &str = "MPPT Total Power";

fn translate<'a>(lookup: &'a dyn TextLookup, key: &'a str) -> &'a str {
    lookup.lookup(key).unwrap_or(key)
}

fn parse_number(raw: &str) -> Value {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => Value::Number(n),
        _ => Value::Absent,
    }
}

fn round2(n: f64) -> f64 {
    (n * 100.).round() / 100.
}

/// Maps a `real` or `real_battery` reply.
pub fn map_realtime(items: &[RealtimeItem], lookup: &dyn TextLookup) -> Vec<Reading> {
    items
        .iter()
        .map(|item| {
            let value = if item.data_value == ABSENT {
                Value::Absent
            } else if NUMERIC_UNITS.contains(&item.data_unit.as_str()) {
                parse_number(&item.data_value)
            } else if item.data_value.starts_with(I18N_PREFIX) {
                Value::Text(translate(lookup, &item.data_value).to_string())
            } else {
                Value::Text(item.data_value.clone())
            };
            Reading::new(
                translate(lookup, &item.data_name),
                value,
                item.data_unit.as_str(),
            )
        })
        .collect()
}

/// Display name of a `direct` entry. Names of the form `KEY%@N` are
/// translated through `KEY` with the index `N` substituted into the
/// translation.
fn direct_name(raw: &str, lookup: &dyn TextLookup) -> String {
    match raw.split_once(INDEX_MARKER) {
        Some((key, index)) => {
            let template = translate(lookup, key);
            if template.contains(INDEX_MARKER) {
                template.replacen(INDEX_MARKER, index, 1)
            } else if template.contains("{0}") {
                template.replacen("{0}", index, 1)
            } else {
                format!("{template} {index}")
            }
        }
        None => translate(lookup, raw).to_string(),
    }
}

/// Maps a `direct` reply. Every entry yields a voltage, current and power
/// reading, followed by one [`MPPT_TOTAL_POWER`] reading summing the power
/// of every entry in the reply.
pub fn map_direct(items: &[DirectItem], lookup: &dyn TextLookup) -> Vec<Reading> {
    let mut readings = Vec::with_capacity(items.len() * 3 + 1);
    let mut total_power = 0.;

    for item in items {
        let name = direct_name(&item.name, lookup);
        let voltage = if item.voltage == ABSENT {
            Value::Absent
        } else {
            parse_number(&item.voltage)
        };
        let current = if item.current == ABSENT {
            Value::Absent
        } else {
            parse_number(&item.current)
        };
        let power = match (voltage.as_number(), current.as_number()) {
            (Some(v), Some(a)) => Value::Number(round2(v * a)),
            _ => Value::Absent,
        };

        if let Some(p) = power.as_number() {
            total_power += p;
        }

        readings.push(Reading::new(
            format!("{name} Voltage"),
            voltage,
            item.voltage_unit.as_str(),
        ));
        readings.push(Reading::new(
            format!("{name} Current"),
            current,
            item.current_unit.as_str(),
        ));
        readings.push(Reading::new(format!("{name} Power"), power, POWER_UNIT));
    }

    readings.push(Reading::new(
        MPPT_TOTAL_POWER,
        Value::Number(round2(total_power)),
        POWER_UNIT,
    ));
    readings
}
