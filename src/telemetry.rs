use futures::future::try_join_all;
use log::debug;

use crate::database::{Document, Filter, FindOptions, ReadingsProjection, Session};
use crate::error::{ensure_same_arity, TelemetryError};
use crate::schema::{self, Collection};
use crate::sensor::{Reading, ReadingsBySensor, SensorId};
use crate::validation;
use crate::window::TimeWindow;

/// Reading queries for one or many sensors, issued through a borrowed session.
pub struct TelemetryReader<'s, S: Session> {
    session: &'s S,
}

impl<'s, S: Session> TelemetryReader<'s, S> {
    pub fn new(session: &'s S) -> Self {
        TelemetryReader { session }
    }

    /// The last reading of the sensor, or `None` for an empty or unknown sensor.
    pub async fn most_recent(&self, sensor_id: SensorId) -> Result<Option<Reading>, TelemetryError> {
        let readings = self
            .readings(sensor_id, Some(ReadingsProjection::Last))
            .await?;
        Ok(readings.into_iter().last())
    }

    /// Readings at or after the window's boundary, oldest first.
    pub async fn window(
        &self,
        sensor_id: SensorId,
        window: TimeWindow,
        now: i64,
    ) -> Result<Vec<Reading>, TelemetryError> {
        let projection = window.boundary(now).map(ReadingsProjection::Since);
        self.readings(sensor_id, projection).await
    }

    /// Like [`window`](Self::window), resolving the window name first.
    /// An unknown name fails before the store is queried.
    pub async fn window_by_name(
        &self,
        sensor_id: SensorId,
        window_name: &str,
        now: i64,
    ) -> Result<Vec<Reading>, TelemetryError> {
        let window = window_name.parse::<TimeWindow>()?;
        self.window(sensor_id, window, now).await
    }

    /// Readings strictly newer than `watermark`.
    pub async fn newer_than(
        &self,
        sensor_id: SensorId,
        watermark: i64,
    ) -> Result<Vec<Reading>, TelemetryError> {
        self.readings(sensor_id, Some(ReadingsProjection::After(watermark)))
            .await
    }

    /// Queries every sensor concurrently. Any failure fails the whole batch.
    ///
    /// A sensor requested more than once is queried once, from the lowest of
    /// its watermarks, and keeps the position of its first occurrence.
    pub async fn batch_newer_than(
        &self,
        sensor_ids: &[SensorId],
        watermarks: &[i64],
    ) -> Result<ReadingsBySensor, TelemetryError> {
        ensure_same_arity(sensor_ids, watermarks)?;

        let mut requests: Vec<(SensorId, i64)> = Vec::with_capacity(sensor_ids.len());
        for (&sensor_id, &watermark) in sensor_ids.iter().zip(watermarks) {
            match requests.iter_mut().find(|(id, _)| *id == sensor_id) {
                Some((_, lowest)) => *lowest = (*lowest).min(watermark),
                None => requests.push((sensor_id, watermark)),
            }
        }

        let queries = requests
            .into_iter()
            .map(|(sensor_id, watermark)| async move {
                let readings = self.newer_than(sensor_id, watermark).await?;
                Ok::<_, TelemetryError>((sensor_id, readings))
            });

        let batch = try_join_all(queries).await?;
        debug!(
            "Batch of {} sensors fetched for {} requested",
            batch.len(),
            sensor_ids.len()
        );
        Ok(ReadingsBySensor(batch))
    }

    /// Every sensor document with its readings trimmed to `window`, in one store pass.
    pub async fn sensors_in_window(
        &self,
        window: TimeWindow,
        now: i64,
    ) -> Result<Vec<Document>, TelemetryError> {
        let options = FindOptions {
            readings: window.boundary(now).map(ReadingsProjection::Since),
            exclude_id: true,
        };
        Ok(self
            .session
            .find(Collection::Sensors, &Filter::All, &options)
            .await?)
    }

    async fn readings(
        &self,
        sensor_id: SensorId,
        projection: Option<ReadingsProjection>,
    ) -> Result<Vec<Reading>, TelemetryError> {
        let options = FindOptions {
            readings: projection,
            exclude_id: true,
        };
        let documents = self
            .session
            .find(Collection::Sensors, &Filter::eq(schema::SENSOR_ID, sensor_id), &options)
            .await?;

        match documents.first() {
            Some(document) => decode_readings(document),
            None => {
                debug!("Sensor {} not found", sensor_id);
                Ok(Vec::new())
            }
        }
    }
}

fn decode_readings(document: &Document) -> Result<Vec<Reading>, TelemetryError> {
    validation::validate(Collection::Sensors, document, &[schema::READINGS])?;
    serde_json::from_value(document[schema::READINGS].clone()).map_err(|err| {
        TelemetryError::MalformedDocument {
            collection: Collection::Sensors,
            reason: format!("readings: {}", err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DocumentStore;
    use crate::memory_database::MemoryStore;
    use serde_json::{json, Number, Value};
    use std::time::Duration;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(
            Collection::Sensors,
            doc(json!({
                "sensorID": 7,
                "sensorName": "bed-1 moisture",
                "controllerID": 1,
                "gpioPort": 4,
                "type": "moisture",
                "readings": [
                    {"value": 41.0, "timestamp": 100},
                    {"value": 40.5, "timestamp": 200},
                    {"value": 39.0, "timestamp": 300}
                ]
            })),
        );
        store.insert(
            Collection::Sensors,
            doc(json!({
                "sensorID": 8,
                "sensorName": "bed-2 moisture",
                "controllerID": 1,
                "gpioPort": 5,
                "type": "moisture",
                "readings": []
            })),
        );
        store
    }

    fn reading(value: f64, timestamp: i64) -> Reading {
        Reading {
            value: Number::from_f64(value).unwrap(),
            timestamp,
        }
    }

    fn timestamps(readings: &[Reading]) -> Vec<i64> {
        readings.iter().map(|r| r.timestamp).collect()
    }

    #[async_std::test]
    async fn most_recent_is_the_last_reading() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let latest = reader.most_recent(7).await.unwrap().unwrap();
        assert_eq!(latest, reading(39.0, 300));
        assert_eq!(reader.most_recent(8).await.unwrap(), None);
        assert_eq!(reader.most_recent(99).await.unwrap(), None);
    }

    #[async_std::test]
    async fn window_keeps_the_matching_suffix() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        assert!(reader.window(7, TimeWindow::PastDay, 500_000).await.unwrap().is_empty());
        let recent = reader.window(7, TimeWindow::PastDay, 86_600).await.unwrap();
        assert_eq!(timestamps(&recent), vec![200, 300]);
        assert!(reader.window(99, TimeWindow::PastYear, 500).await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn all_window_ignores_now() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        for now in [0, 150, 1_700_000_000] {
            let all = reader.window(7, TimeWindow::All, now).await.unwrap();
            assert_eq!(timestamps(&all), vec![100, 200, 300]);
        }
    }

    #[async_std::test]
    async fn invalid_window_name_fails_before_querying() {
        let store = store();
        store.set_faulty(Collection::Sensors, true);
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let err = reader.window_by_name(7, "pastFortnight", 500).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidWindow");
    }

    #[async_std::test]
    async fn newer_than_never_redelivers() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let first = reader.newer_than(7, 200).await.unwrap();
        assert_eq!(first, vec![reading(39.0, 300)]);
        assert_eq!(reader.newer_than(7, 200).await.unwrap(), first);

        let watermark = first.iter().map(|r| r.timestamp).max().unwrap();
        assert!(reader.newer_than(7, watermark).await.unwrap().is_empty());
    }

    #[async_std::test]
    async fn batch_preserves_request_order() {
        let store = store();
        store.delay_matching(
            Collection::Sensors,
            Filter::eq(schema::SENSOR_ID, 8),
            Duration::from_millis(100),
        );
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let batch = reader
            .batch_newer_than(&[8, 99, 7], &[0, 0, 100])
            .await
            .unwrap();
        assert_eq!(batch.sensor_ids(), vec![8, 99, 7]);
        assert_eq!(timestamps(batch.get(7).unwrap()), vec![200, 300]);
        assert!(batch.get(8).unwrap().is_empty());
        assert!(batch.get(99).unwrap().is_empty());
    }

    #[async_std::test]
    async fn batch_merges_repeated_sensors() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let batch = reader
            .batch_newer_than(&[7, 8, 7], &[200, 0, 0])
            .await
            .unwrap();
        assert_eq!(batch.sensor_ids(), vec![7, 8]);
        assert_eq!(timestamps(batch.get(7).unwrap()), vec![100, 200, 300]);

        let rendered: Value = serde_json::from_str(&serde_json::to_string(&batch).unwrap()).unwrap();
        assert_eq!(rendered["7"].as_array().unwrap().len(), 3);
        assert!(rendered["8"].as_array().unwrap().is_empty());
    }

    #[async_std::test]
    async fn batch_arity_mismatch_fails() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        for (ids, marks) in [(vec![], vec![1]), (vec![7], vec![]), (vec![7, 8], vec![1])] {
            let err = reader.batch_newer_than(&ids, &marks).await.unwrap_err();
            assert_eq!(err.kind(), "ArityMismatch");
        }
    }

    #[async_std::test]
    async fn batch_fails_as_a_whole() {
        let store = store();
        let session = store.session().await.unwrap();
        store.set_faulty(Collection::Sensors, true);
        let reader = TelemetryReader::new(&session);

        let err = reader.batch_newer_than(&[7, 8], &[0, 0]).await.unwrap_err();
        assert_eq!(err.kind(), "StoreUnavailable");
    }

    #[async_std::test]
    async fn undecodable_readings_are_reported() {
        let store = MemoryStore::new();
        store.insert(
            Collection::Sensors,
            doc(json!({"sensorID": 3, "readings": [{"value": "wet"}]})),
        );
        store.insert(Collection::Sensors, doc(json!({"sensorID": 4})));
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let err = reader.window(3, TimeWindow::All, 0).await.unwrap_err();
        assert_eq!(err.kind(), "MalformedDocument");
        let err = reader.most_recent(4).await.unwrap_err();
        assert_eq!(err.kind(), "MissingAttribute");
    }

    #[async_std::test]
    async fn sensors_in_window_trims_every_sensor() {
        let store = store();
        let session = store.session().await.unwrap();
        let reader = TelemetryReader::new(&session);

        let sensors = reader.sensors_in_window(TimeWindow::PastDay, 86_650).await.unwrap();
        assert_eq!(sensors.len(), 2);
        assert_eq!(sensors[0]["readings"].as_array().unwrap().len(), 1);
        assert!(!sensors[0].contains_key("_id"));
    }
}
