use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;

pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = 7 * SECONDS_PER_DAY;
pub const SECONDS_PER_MONTH: i64 = 30 * SECONDS_PER_DAY;
pub const SECONDS_PER_YEAR: i64 = 365 * SECONDS_PER_DAY;

/// A named range of history relative to a reference instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimeWindow {
    PastDay,
    PastWeek,
    PastMonth,
    PastYear,
    All,
}

impl TimeWindow {
    pub const ALL_WINDOWS: [TimeWindow; 5] = [
        TimeWindow::PastDay,
        TimeWindow::PastWeek,
        TimeWindow::PastMonth,
        TimeWindow::PastYear,
        TimeWindow::All,
    ];

    fn span(&self) -> Option<i64> {
        match self {
            TimeWindow::PastDay => Some(SECONDS_PER_DAY),
            TimeWindow::PastWeek => Some(SECONDS_PER_WEEK),
            TimeWindow::PastMonth => Some(SECONDS_PER_MONTH),
            TimeWindow::PastYear => Some(SECONDS_PER_YEAR),
            TimeWindow::All => None,
        }
    }

    /// Lower timestamp bound (inclusive) of the window ending at `now`.
    /// `All` has no bound.
    pub fn boundary(&self, now: i64) -> Option<i64> {
        self.span().map(|span| now.saturating_sub(span))
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeWindow::PastDay => "pastDay",
            TimeWindow::PastWeek => "pastWeek",
            TimeWindow::PastMonth => "pastMonth",
            TimeWindow::PastYear => "pastYear",
            TimeWindow::All => "all",
        }
    }
}

impl FromStr for TimeWindow {
    type Err = TelemetryError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        TimeWindow::ALL_WINDOWS
            .iter()
            .find(|window| window.name() == name)
            .copied()
            .ok_or_else(|| TelemetryError::InvalidWindow(name.to_string()))
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolves a window by name against `now`.
pub fn boundary(window_name: &str, now: i64) -> Result<Option<i64>, TelemetryError> {
    window_name
        .parse::<TimeWindow>()
        .map(|window| window.boundary(now))
}
