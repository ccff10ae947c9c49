use serde::{ser::SerializeMap, Deserialize, Serialize};
use serde_json::Number;

pub type SensorId = i64;

/// One measurement. The value is passed through as stored; timestamps are
/// whole seconds since the epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: Number,
    pub timestamp: i64,
}

/// New readings per sensor, kept in the order the sensors were requested.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadingsBySensor(pub Vec<(SensorId, Vec<Reading>)>);

impl ReadingsBySensor {
    pub fn get(&self, sensor_id: SensorId) -> Option<&[Reading]> {
        self.0
            .iter()
            .find(|(id, _)| *id == sensor_id)
            .map(|(_, readings)| readings.as_slice())
    }

    pub fn sensor_ids(&self) -> Vec<SensorId> {
        self.0.iter().map(|(id, _)| *id).collect()
    }

    /// Highest timestamp delivered for each sensor; the caller's next watermark.
    pub fn watermarks(&self) -> Vec<(SensorId, Option<i64>)> {
        self.0
            .iter()
            .map(|(id, readings)| (*id, readings.iter().map(|r| r.timestamp).max()))
            .collect()
    }
}

impl Serialize for ReadingsBySensor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (sensor_id, readings) in &self.0 {
            map.serialize_entry(&sensor_id.to_string(), readings)?;
        }
        map.end()
    }
}
