use thiserror::Error;

use crate::database::StoreError;
use crate::schema::Collection;

#[derive(Debug, Clone, Error)]
pub enum TelemetryError {
    #[error("Invalid window '{0}', expected one of pastDay, pastWeek, pastMonth, pastYear, all")]
    InvalidWindow(String),

    #[error("Got {ids} ids but {watermarks} watermarks")]
    ArityMismatch { ids: usize, watermarks: usize },

    #[error("Missing attribute {attribute} in {collection} data: {document}")]
    MissingAttribute {
        collection: Collection,
        attribute: String,
        document: String,
    },

    #[error("Malformed {collection} document: {reason}")]
    MalformedDocument { collection: Collection, reason: String },

    #[error("Watching for changes failed: {0}")]
    WatchFailed(String),

    #[error("Document store unavailable: {0}")]
    StoreUnavailable(String),
}

impl TelemetryError {
    /// Stable classification exposed at the boundary.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryError::InvalidWindow(_) => "InvalidWindow",
            TelemetryError::ArityMismatch { .. } => "ArityMismatch",
            TelemetryError::MissingAttribute { .. } => "MissingAttribute",
            TelemetryError::MalformedDocument { .. } => "MalformedDocument",
            TelemetryError::WatchFailed(_) => "WatchFailed",
            TelemetryError::StoreUnavailable(_) => "StoreUnavailable",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::StoreUnavailable(_) | TelemetryError::WatchFailed(_)
        )
    }

    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            TelemetryError::InvalidWindow(_) | TelemetryError::ArityMismatch { .. }
        )
    }
}

impl From<StoreError> for TelemetryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Closed => TelemetryError::WatchFailed(err.to_string()),
            StoreError::Unavailable(_) | StoreError::Query(_) => {
                TelemetryError::StoreUnavailable(err.to_string())
            }
        }
    }
}

/// Fails with `ArityMismatch` unless both parallel arrays have the same length.
pub fn ensure_same_arity<A, B>(ids: &[A], watermarks: &[B]) -> Result<(), TelemetryError> {
    if ids.len() == watermarks.len() {
        Ok(())
    } else {
        Err(TelemetryError::ArityMismatch {
            ids: ids.len(),
            watermarks: watermarks.len(),
        })
    }
}
