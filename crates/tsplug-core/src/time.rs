//! Series granularity and time stepping

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, Result};

/// Upper bound on generated steps, guards against absurd ranges
pub const MAX_TIME_STEPS: usize = 100_000;

/// `gran` block of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GranSpec {
    pub granularity_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_in_seconds: Option<i64>,
}

/// Time granularity of a series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Yearly,
    Monthly,
    Weekly,
    Daily,
    Hourly,
    Minutely,
    Secondly,
    /// Custom step in seconds
    Custom(u32),
}

impl Granularity {
    pub fn from_spec(spec: &GranSpec) -> Result<Self> {
        Self::from_name(&spec.granularity_string, spec.custom_in_seconds.unwrap_or(0))
    }

    /// Parse a granularity name; `amount` is only meaningful for `Custom`
    pub fn from_name(name: &str, amount: i64) -> Result<Self> {
        match name {
            "Yearly" => Ok(Self::Yearly),
            "Monthly" => Ok(Self::Monthly),
            "Weekly" => Ok(Self::Weekly),
            "Daily" => Ok(Self::Daily),
            "Hourly" => Ok(Self::Hourly),
            "Minutely" => Ok(Self::Minutely),
            "Secondly" => Ok(Self::Secondly),
            "Custom" => u32::try_from(amount)
                .ok()
                .filter(|secs| *secs > 0)
                .map(Self::Custom)
                .ok_or_else(|| {
                    CoreError::InvalidRequest(format!("invalid custom granularity: {}", amount))
                }),
            other => Err(CoreError::InvalidRequest(format!(
                "unknown granularity: {}",
                other
            ))),
        }
    }

    /// Move `time` by `steps` granules (negative steps go backwards)
    pub fn offset(self, time: DateTime<Utc>, steps: i64) -> Result<DateTime<Utc>> {
        let shifted = match self {
            Self::Yearly => shift_months(time, steps.saturating_mul(12)),
            Self::Monthly => shift_months(time, steps),
            Self::Weekly => time.checked_add_signed(Duration::weeks(steps)),
            Self::Daily => time.checked_add_signed(Duration::days(steps)),
            Self::Hourly => time.checked_add_signed(Duration::hours(steps)),
            Self::Minutely => time.checked_add_signed(Duration::minutes(steps)),
            Self::Secondly => time.checked_add_signed(Duration::seconds(steps)),
            Self::Custom(secs) => {
                time.checked_add_signed(Duration::seconds(steps.saturating_mul(i64::from(secs))))
            }
        };
        shifted.ok_or_else(|| CoreError::InvalidTime(format!("{} shifted by {}", time, steps)))
    }

    /// Every granule from `start` through `end`, inclusive
    pub fn steps(self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let mut out = Vec::new();
        let mut cursor = start;
        while cursor <= end {
            if out.len() >= MAX_TIME_STEPS {
                return Err(CoreError::InvalidTime(format!(
                    "range {} .. {} exceeds {} steps",
                    start, end, MAX_TIME_STEPS
                )));
            }
            out.push(cursor);
            cursor = self.offset(cursor, 1)?;
        }
        Ok(out)
    }
}

fn shift_months(time: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        time.checked_add_months(magnitude)
    } else {
        time.checked_sub_months(magnitude)
    }
}
