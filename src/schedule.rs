//! Incremental sync for irrigation schedules.

use std::time::Duration;

use async_std::future::timeout;
use async_std::stream::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::database::{ChangeEvent, Document, Filter, FindOptions, Session, StoreError};
use crate::error::{ensure_same_arity, TelemetryError};
use crate::schema::{self, Collection};

pub type ScheduleId = i64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Watching,
    Resolved,
    TimedOut,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WatchOutcome {
    Changed { event: ChangeEvent },
    /// The stored document was already newer than the caller's version.
    Current { document: Document },
    TimedOut,
}

/// Version of a schedule document: `lastModified`, else `timestamp`.
pub fn schedule_watermark(document: &Document) -> Option<i64> {
    document
        .get(schema::LAST_MODIFIED)
        .or_else(|| document.get(schema::SCHEDULE_TIMESTAMP))
        .and_then(Value::as_i64)
}

pub struct ScheduleWatcher<'s, S: Session> {
    session: &'s S,
    state: WatchState,
}

impl<'s, S: Session> ScheduleWatcher<'s, S> {
    pub fn new(session: &'s S) -> Self {
        ScheduleWatcher {
            session,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Schedules among `schedule_ids` modified after the newest of `watermarks`.
    pub async fn changed_since(
        &self,
        schedule_ids: &[ScheduleId],
        watermarks: &[i64],
    ) -> Result<Vec<Document>, TelemetryError> {
        ensure_same_arity(schedule_ids, watermarks)?;

        let bound = match watermarks.iter().max() {
            Some(bound) => *bound,
            None => return Ok(Vec::new()),
        };

        let filter = Filter::And(vec![
            Filter::any_of(schema::SCHEDULE_ID, schedule_ids.iter().copied()),
            Filter::Or(vec![
                Filter::gt(schema::LAST_MODIFIED, bound),
                Filter::And(vec![
                    Filter::Not(Box::new(Filter::exists(schema::LAST_MODIFIED))),
                    Filter::gt(schema::SCHEDULE_TIMESTAMP, bound),
                ]),
            ]),
        ]);
        let options = FindOptions {
            readings: None,
            exclude_id: true,
        };

        let schedules = self
            .session
            .find(Collection::Schedules, &filter, &options)
            .await?;
        debug!(
            "{} of {} schedules changed after {}",
            schedules.len(),
            schedule_ids.len(),
            bound
        );
        Ok(schedules)
    }

    /// Waits for the next change to one schedule, up to `wait`.
    ///
    /// With `since`, changes whose document version is not above it are
    /// skipped, so a client never receives an edit it has already rendered.
    /// The stored document is checked once the subscription is open, so an
    /// edit made before the call is not missed.
    pub async fn await_change(
        &mut self,
        schedule_id: ScheduleId,
        wait: Duration,
        since: Option<i64>,
    ) -> Result<WatchOutcome, TelemetryError> {
        self.state = WatchState::Idle;

        let filter = Filter::eq(schema::SCHEDULE_ID, schedule_id);
        let mut stream = match self.session.watch(Collection::Schedules, &filter).await {
            Ok(stream) => stream,
            Err(err) => {
                self.state = WatchState::Failed;
                warn!("Could not watch schedule {}: {}", schedule_id, err);
                return Err(TelemetryError::WatchFailed(err.to_string()));
            }
        };
        self.state = WatchState::Watching;
        debug!("Watching schedule {} for {:?}", schedule_id, wait);

        if let Some(seen) = since {
            let options = FindOptions {
                readings: None,
                exclude_id: true,
            };
            match self.session.find(Collection::Schedules, &filter, &options).await {
                Ok(documents) => {
                    let newer = documents
                        .into_iter()
                        .find(|document| schedule_watermark(document).map_or(false, |v| v > seen));
                    if let Some(document) = newer {
                        drop(stream);
                        self.state = WatchState::Resolved;
                        debug!("Schedule {} already changed after {}", schedule_id, seen);
                        return Ok(WatchOutcome::Current { document });
                    }
                }
                Err(err) => {
                    drop(stream);
                    self.state = WatchState::Failed;
                    warn!("Could not read schedule {}: {}", schedule_id, err);
                    return Err(TelemetryError::WatchFailed(err.to_string()));
                }
            }
        }

        let first_match = async {
            while let Some(change) = stream.next().await {
                let event = match change {
                    Ok(event) => event,
                    Err(err) => return Err(err),
                };
                let fresh = match since {
                    Some(seen) => schedule_watermark(&event.full_document).map_or(false, |v| v > seen),
                    None => true,
                };
                if fresh {
                    return Ok(event);
                }
                debug!("Skipping already seen change of schedule {}", schedule_id);
            }
            Err(StoreError::Closed)
        };

        let result = timeout(wait, first_match).await;
        drop(stream);

        match result {
            Ok(Ok(event)) => {
                self.state = WatchState::Resolved;
                Ok(WatchOutcome::Changed { event })
            }
            Ok(Err(err)) => {
                self.state = WatchState::Failed;
                warn!("Watch on schedule {} failed: {}", schedule_id, err);
                Err(TelemetryError::WatchFailed(err.to_string()))
            }
            Err(_) => {
                self.state = WatchState::TimedOut;
                info!("No change to schedule {} within {:?}", schedule_id, wait);
                Ok(WatchOutcome::TimedOut)
            }
        }
    }
}
