use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Sensors,
    Plants,
    Schedules,
    IrrigationControllers,
    Pumps,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Plants,
        Collection::Sensors,
        Collection::Schedules,
        Collection::IrrigationControllers,
        Collection::Pumps,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Sensors => "sensors",
            Collection::Plants => "plants",
            Collection::Schedules => "schedules",
            Collection::IrrigationControllers => "irrigation_controllers",
            Collection::Pumps => "pumps",
        }
    }

    /// Attributes every document of this kind must carry before it reaches the dashboard.
    pub fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            Collection::Sensors => SENSOR_ATTRIBUTES,
            Collection::Plants => PLANT_ATTRIBUTES,
            Collection::Schedules => SCHEDULE_ATTRIBUTES,
            Collection::IrrigationControllers => CONTROLLER_ATTRIBUTES,
            Collection::Pumps => PUMP_ATTRIBUTES,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .iter()
            .find(|collection| collection.name() == name)
            .copied()
            .ok_or_else(|| format!("Unknown collection '{}'", name))
    }
}

pub const SENSOR_ID: &str = "sensorID";
pub const READINGS: &str = "readings";
pub const SCHEDULE_ID: &str = "scheduleID";
pub const LAST_MODIFIED: &str = "lastModified";
pub const SCHEDULE_TIMESTAMP: &str = "timestamp";
pub const DEVICE_TYPE: &str = "deviceType";
pub const PRODUCTION_DEVICE: &str = "production";
pub const STORE_ID: &str = "_id";

const SENSOR_ATTRIBUTES: &[&str] = &[
    "sensorID",
    "sensorName",
    "controllerID",
    "gpioPort",
    "type",
    "readings",
];

const PLANT_ATTRIBUTES: &[&str] = &[
    "plantID",
    "plantName",
    "plantType",
    "location",
    "controllerID",
    "sensorIDs",
    "pumpIDs",
    "waterRequirement",
    "imagePath",
    "wateringHistory",
];

const SCHEDULE_ATTRIBUTES: &[&str] = &[
    "scheduleID",
    "weekdays",
    "startTime",
    "type",
    "plantID",
    "controllerID",
    "threshold",
];

const CONTROLLER_ATTRIBUTES: &[&str] = &[
    "controllerID",
    "deviceName",
    "deviceType",
    "ipAddress",
    "status",
];

const PUMP_ATTRIBUTES: &[&str] = &[
    "name",
    "controllerID",
    "plantID",
    "gpioPort",
    "type",
    "status",
    "flowRate",
];

/// Required-attribute sets keyed by entity kind. Built-in sets apply unless
/// the configuration overrides a kind.
#[derive(Clone, Debug, PartialEq)]
pub struct RequiredAttributes {
    sets: HashMap<Collection, Vec<String>>,
}

impl RequiredAttributes {
    pub fn with_overrides(overrides: &HashMap<Collection, Vec<String>>) -> Self {
        let mut attributes = Self::default();
        for (collection, set) in overrides {
            attributes.sets.insert(*collection, set.clone());
        }
        attributes
    }

    pub fn for_collection(&self, collection: Collection) -> &[String] {
        self.sets
            .get(&collection)
            .map(|set| set.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for RequiredAttributes {
    fn default() -> Self {
        let sets = Collection::ALL
            .iter()
            .map(|collection| {
                let set = collection
                    .required_attributes()
                    .iter()
                    .map(|attr| attr.to_string())
                    .collect();
                (*collection, set)
            })
            .collect();
        RequiredAttributes { sets }
    }
}
