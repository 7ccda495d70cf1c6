use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunrunError};
use crate::model::task::Task;

const DESIRED_HOUR: u32 = 19;
// America/Sao_Paulo (sem horário de verão desde 2019)
const UTC_OFFSET_HOURS: i32 = -3;

fn default_hour() -> u32 {
    DESIRED_HOUR
}

fn default_utc_offset_hours() -> i32 {
    UTC_OFFSET_HOURS
}

/// Where the desired date lands: the start date's calendar day, at `hour`
/// o'clock, in a fixed UTC offset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredDateRule {
    #[serde(default = "default_hour")]
    pub hour: u32,

    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl Default for DesiredDateRule {
    fn default() -> Self {
        DesiredDateRule {
            hour: DESIRED_HOUR,
            utc_offset_hours: UTC_OFFSET_HOURS,
        }
    }
}

impl DesiredDateRule {
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(RunrunError::Config(format!(
                "desired hour must be 0-23, got {}",
                self.hour
            )));
        }
        self.offset().map(|_| ())
    }

    fn offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            RunrunError::Config(format!(
                "utc offset out of range: {}",
                self.utc_offset_hours
            ))
        })
    }

    /// Returns the RFC 3339 timestamp for `start`, or `None` if `start` is not
    /// a date this rule understands.
    pub fn apply(&self, start: &str) -> Result<Option<String>> {
        let offset = self.offset()?;

        let day = match parse_local(start.trim(), &offset) {
            Some(d) => d,
            None => return Ok(None),
        };

        let at_hour = day
            .and_hms_opt(self.hour, 0, 0)
            .ok_or_else(|| RunrunError::Config(format!("invalid hour {}", self.hour)))?;

        // offset fixo: nunca ambíguo
        Ok(offset
            .from_local_datetime(&at_hour)
            .single()
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false)))
    }
}

fn parse_local(value: &str, offset: &FixedOffset) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(offset).date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Only tasks with a start date and no desired date yet are touched.
pub fn should_update(task: &Task) -> bool {
    task.desired_date.is_none() && task.desired_start_date.is_some()
}

pub fn desired_date_for(task: &Task, rule: &DesiredDateRule) -> Result<String> {
    let start = task
        .desired_start_date
        .as_deref()
        .ok_or(RunrunError::MissingStartDate { id: task.id })?;

    rule.apply(start)?.ok_or_else(|| RunrunError::InvalidDate {
        id: task.id,
        value: start.to_string(),
    })
}
