use std::time::Instant;

use futures::try_join;
use log::{debug, warn};
use serde::Serialize;

use crate::database::{Document, Filter, FindOptions, Session};
use crate::error::TelemetryError;
use crate::schema::{self, Collection, RequiredAttributes};
use crate::telemetry::TelemetryReader;
use crate::validation::SchemaValidator;
use crate::window::TimeWindow;

/// Everything the dashboard needs for its first render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub plants: Vec<Document>,
    pub sensors: Vec<Document>,
    pub schedules: Vec<Document>,
    pub controllers: Vec<Document>,
    pub pumps: Vec<Document>,
}

pub struct DashboardAssembler<'s, S: Session> {
    session: &'s S,
    validator: SchemaValidator<'s>,
}

impl<'s, S: Session> DashboardAssembler<'s, S> {
    pub fn new(session: &'s S, attributes: &'s RequiredAttributes) -> Self {
        DashboardAssembler {
            session,
            validator: SchemaValidator::new(attributes),
        }
    }

    /// Fetches and validates one entity kind as the dashboard sees it:
    /// sensors carry only the past day of readings, controllers only
    /// production devices.
    pub async fn collection(
        &self,
        collection: Collection,
        now: i64,
    ) -> Result<Vec<Document>, TelemetryError> {
        let documents = match collection {
            Collection::Sensors => {
                TelemetryReader::new(self.session)
                    .sensors_in_window(TimeWindow::PastDay, now)
                    .await?
            }
            Collection::IrrigationControllers => {
                let production = Filter::eq(schema::DEVICE_TYPE, schema::PRODUCTION_DEVICE);
                self.find(collection, &production).await?
            }
            _ => self.find(collection, &Filter::All).await?,
        };

        self.validator.validate_batch(collection, &documents)?;
        debug!("{} {} documents valid", documents.len(), collection);
        Ok(documents)
    }

    /// Fetches all five kinds concurrently. Any failed fetch or invalid
    /// document fails the whole snapshot.
    pub async fn assemble(&self, now: i64) -> Result<DashboardSnapshot, TelemetryError> {
        let before = Instant::now();

        let result = try_join!(
            self.collection(Collection::Plants, now),
            self.collection(Collection::Sensors, now),
            self.collection(Collection::Schedules, now),
            self.collection(Collection::IrrigationControllers, now),
            self.collection(Collection::Pumps, now),
        );

        match result {
            Ok((plants, sensors, schedules, controllers, pumps)) => {
                debug!("Dashboard snapshot assembled in {}ms", before.elapsed().as_millis());
                Ok(DashboardSnapshot {
                    plants,
                    sensors,
                    schedules,
                    controllers,
                    pumps,
                })
            }
            Err(err) => {
                warn!("Dashboard snapshot aborted: {}", err);
                Err(err)
            }
        }
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, TelemetryError> {
        let options = FindOptions {
            readings: None,
            exclude_id: true,
        };
        Ok(self.session.find(collection, filter, &options).await?)
    }
}
