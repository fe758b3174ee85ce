use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Raw values of one sensor poll, before they become a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub pressure: f32,
    pub altitude: f32,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Temperature: {:.2} C, Pressure: {:.2} hPa, Altitude: {:.2} m",
            self.temperature, self.pressure, self.altitude
        )
    }
}

/// One point destined for the time-series database.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    name: String,
    tags: BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
    temperature: f32,
    pressure: f32,
    altitude: f32,
}

impl Measurement {
    pub fn new(
        name: &str,
        tags: BTreeMap<String, String>,
        timestamp: DateTime<Utc>,
        reading: Reading,
    ) -> Result<Self, anyhow::Error> {
        let data = Self {
            name: name.to_string(),
            tags,
            timestamp,
            temperature: reading.temperature,
            pressure: reading.pressure,
            altitude: reading.altitude,
        };

        for (key, value) in data.fields() {
            if !value.is_finite() {
                return Err(anyhow::anyhow!("Field {key} is not a finite number: {value}"));
            }
        }

        Ok(data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fields(&self) -> [(&'static str, f32); 3] {
        [
            ("temperature", self.temperature),
            ("pressure", self.pressure),
            ("altitude", self.altitude),
        ]
    }
}
