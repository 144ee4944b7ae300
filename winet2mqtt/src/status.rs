use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// A reading is re-emitted at least this often even when its value is unchanged.
pub const STALENESS_WINDOW: Duration = Duration::from_millis(300_000);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Absent,
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Absent => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub name: String,
    pub slug: String,
    pub value: Value,
    pub unit: String,
    /// Not yet delivered to the downstream publishers
    pub dirty: bool,
}

impl Reading {
    pub fn new(name: impl Into<String>, value: Value, unit: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            slug: slugify(&name),
            name,
            value,
            unit: unit.into(),
            dirty: true,
        }
    }
}

/// Lowercases `name` and replaces every run of non-alphanumeric characters
/// with a single underscore. Leading and trailing underscores are dropped.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

#[derive(Debug, Clone)]
struct TrackedReading {
    reading: Reading,
    replaced_at: Instant,
}

/// Latest reading per slug for a single device.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    readings: BTreeMap<String, TrackedReading>,
}

impl DeviceStatus {
    /// Stores `reading` if there is no prior one for its slug, if the value
    /// changed, or if the stored one is older than [`STALENESS_WINDOW`].
    /// Returns whether the reading was stored.
    pub fn update(&mut self, reading: Reading, now: Instant) -> bool {
        let supersedes = match self.readings.get(&reading.slug) {
            None => true,
            Some(old) => {
                old.reading.value != reading.value
                    || now.saturating_duration_since(old.replaced_at) >= STALENESS_WINDOW
            }
        };

        if supersedes {
            self.readings.insert(
                reading.slug.clone(),
                TrackedReading {
                    reading,
                    replaced_at: now,
                },
            );
        }
        supersedes
    }

    pub fn get(&self, slug: &str) -> Option<&Reading> {
        self.readings.get(slug).map(|t| &t.reading)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.values().map(|t| &t.reading)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn mark_delivered(&mut self) {
        self.readings
            .values_mut()
            .for_each(|t| t.reading.dirty = false);
    }
}

/// Device id -> slug -> latest reading.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    devices: HashMap<u32, DeviceStatus>,
}

impl StatusTable {
    /// Allocates an empty status map for `dev_id` unless one exists already.
    pub fn register(&mut self, dev_id: u32) {
        self.devices.entry(dev_id).or_default();
    }

    pub fn update(&mut self, dev_id: u32, reading: Reading, now: Instant) -> bool {
        self.devices
            .entry(dev_id)
            .or_default()
            .update(reading, now)
    }

    pub fn device(&self, dev_id: u32) -> Option<&DeviceStatus> {
        self.devices.get(&dev_id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.devices
            .values()
            .flat_map(|d| d.iter())
            .filter(|r| r.dirty)
            .count()
    }

    pub fn mark_delivered(&mut self) {
        self.devices.values_mut().for_each(DeviceStatus::mark_delivered);
    }
}
