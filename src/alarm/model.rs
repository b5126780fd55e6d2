use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const DEFAULT_LABEL: &str = "Alarm";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("arguments must be a map, got {0}")]
    NotAMap(&'static str),
    #[error("missing required argument '{0}'")]
    Missing(&'static str),
    #[error("argument '{key}' must be {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },
    #[error("argument '{key}' out of range: {value}")]
    OutOfRange { key: &'static str, value: i64 },
    #[error("no such calendar date {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
    #[error("local time {0} cannot be resolved in this time zone")]
    Unresolvable(NaiveDateTime),
}

/// One `setAlarm` call from the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRequest {
    pub identifier: String,
    pub label: String,
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl AlarmRequest {
    pub fn from_arguments(args: &Value) -> Result<Self, RequestError> {
        let map = match args {
            Value::Object(map) => map,
            other => return Err(RequestError::NotAMap(json_kind(other))),
        };

        let year = int_arg(map, "year")?;
        let year = i32::try_from(year).map_err(|_| RequestError::OutOfRange {
            key: "year",
            value: year,
        })?;
        let month = ranged_arg(map, "month", 1, 12)?;
        let day = ranged_arg(map, "day", 1, 31)?;
        let hour = ranged_arg(map, "hour", 0, 23)?;
        let minute = ranged_arg(map, "minute", 0, 59)?;
        let label = string_arg(map, "label")?;
        let identifier = string_arg(map, "alarmId")?;

        let request = Self {
            identifier,
            label,
            year,
            month,
            day,
            hour,
            minute,
        };
        request.date()?;
        Ok(request)
    }

    fn date(&self) -> Result<NaiveDate, RequestError> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).ok_or(RequestError::InvalidDate {
            year: self.year,
            month: self.month,
            day: self.day,
        })
    }

    /// Wall-clock time of the alarm, seconds and sub-seconds zeroed.
    pub fn local_datetime(&self) -> Result<NaiveDateTime, RequestError> {
        let time = NaiveTime::from_hms_opt(self.hour, self.minute, 0).ok_or(
            RequestError::OutOfRange {
                key: "hour",
                value: i64::from(self.hour),
            },
        )?;
        Ok(self.date()?.and_time(time))
    }

    pub fn fire_time(&self) -> Result<DateTime<Local>, RequestError> {
        self.fire_time_in(&Local)
    }

    /// Resolves the wall-clock time to an instant. Past instants are returned as-is.
    pub fn fire_time_in<Tz>(&self, timezone: &Tz) -> Result<DateTime<Tz>, RequestError>
    where
        Tz: TimeZone,
        Tz::Offset: Copy,
    {
        let naive = self.local_datetime()?;
        resolve_local_datetime(timezone, naive).ok_or(RequestError::Unresolvable(naive))
    }

    pub fn payload(&self) -> AlarmPayload {
        AlarmPayload {
            identifier: Some(self.identifier.clone()),
            label: Some(self.label.clone()),
        }
    }
}

/// Extras carried by a wake event and handed back when it fires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmPayload {
    pub identifier: Option<String>,
    pub label: Option<String>,
}

impl AlarmPayload {
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(DEFAULT_LABEL)
    }
}

/// Ambiguous times take the earlier instant; times inside a gap move forward an hour.
fn resolve_local_datetime<Tz>(timezone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, _second) => Some(first),
        LocalResult::None => match timezone.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) => Some(dt),
            LocalResult::Ambiguous(first, _second) => Some(first),
            LocalResult::None => None,
        },
    }
}

fn int_arg(map: &Map<String, Value>, key: &'static str) -> Result<i64, RequestError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(RequestError::Missing(key)),
        Some(value) => value.as_i64().ok_or(RequestError::WrongType {
            key,
            expected: "an integer",
        }),
    }
}

fn ranged_arg(
    map: &Map<String, Value>,
    key: &'static str,
    min: i64,
    max: i64,
) -> Result<u32, RequestError> {
    let value = int_arg(map, key)?;
    if !(min..=max).contains(&value) {
        return Err(RequestError::OutOfRange { key, value });
    }
    // bounded by max above
    Ok(value as u32)
}

fn string_arg(map: &Map<String, Value>, key: &'static str) -> Result<String, RequestError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(RequestError::Missing(key)),
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(RequestError::WrongType {
            key,
            expected: "a string",
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
