//! Time Budget — global deadline and per-challenge slices
//!
//! The global deadline is authoritative. Every slice is derived from the
//! time remaining *now*, never from a cached value:
//!
//! ```text
//! remaining = deadline - now
//! slice     = clamp(remaining / items_left, floor, ceiling)
//! ```
//!
//! The floor always wins over the remaining budget. Under pressure the last
//! items get skipped by the orchestrator instead of receiving a slice too
//! short to solve anything.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ConfigError;

/// Default minimum slice.
pub const DEFAULT_FLOOR_SECS: f64 = 8.0;
/// Default maximum slice.
pub const DEFAULT_CEILING_SECS: f64 = 15.0;

/// Slice bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub floor_secs: f64,
    pub ceiling_secs: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            floor_secs: DEFAULT_FLOOR_SECS,
            ceiling_secs: DEFAULT_CEILING_SECS,
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let floor = seconds("budget.floor_secs", self.floor_secs)?;
        let ceiling = seconds("budget.ceiling_secs", self.ceiling_secs)?;
        if ceiling < floor {
            return Err(ConfigError::Invalid {
                field: "budget.ceiling_secs".into(),
                reason: format!(
                    "must be >= floor ({}), got {}",
                    self.floor_secs, self.ceiling_secs
                ),
            });
        }
        Ok(())
    }

    pub fn floor(&self) -> Duration {
        Duration::try_from_secs_f64(self.floor_secs).unwrap_or(Duration::MAX)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::try_from_secs_f64(self.ceiling_secs).unwrap_or(Duration::MAX)
    }
}

/// Positive `secs` as a [`Duration`] that still fits on the clock from now.
pub fn seconds(field: &str, secs: f64) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        field: field.into(),
        reason,
    };
    if !(secs.is_finite() && secs > 0.0) {
        return Err(invalid(format!("must be a positive number, got {secs}")));
    }
    let duration =
        Duration::try_from_secs_f64(secs).map_err(|e| invalid(format!("{secs}: {e}")))?;
    if Instant::now().checked_add(duration).is_none() {
        return Err(invalid(format!("{secs} seconds is out of range")));
    }
    Ok(duration)
}

/// Split `remaining` evenly over `items_left`, clamped to `[floor, ceiling]`.
pub fn apportion(
    remaining: Duration,
    items_left: u32,
    floor: Duration,
    ceiling: Duration,
) -> Duration {
    let share = remaining / items_left.max(1);
    share.clamp(floor, ceiling)
}

/// The run-wide deadline plus slice bounds.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    deadline: Instant,
    floor: Duration,
    ceiling: Duration,
}

impl TimeBudget {
    /// Budget of `timeout` starting now.
    pub fn new(timeout: Duration, config: &BudgetConfig) -> Result<Self, ConfigError> {
        Self::starting_at(Instant::now(), timeout, config)
    }

    pub fn starting_at(
        start: Instant,
        timeout: Duration,
        config: &BudgetConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let deadline = start
            .checked_add(timeout)
            .ok_or_else(|| ConfigError::Invalid {
                field: "timeout".into(),
                reason: format!("{timeout:?} is out of range"),
            })?;
        Ok(Self {
            deadline,
            floor: config.floor(),
            ceiling: config.ceiling(),
        })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Slice for the next item when `items_left` items (including it) remain.
    pub fn slice(&self, items_left: u32) -> Duration {
        apportion(self.remaining(), items_left, self.floor, self.ceiling)
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }
}
