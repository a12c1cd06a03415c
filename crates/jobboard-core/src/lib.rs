//! Core domain model for the Ashby job board sync service.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobboard-core";

/// Hard cap on daily fetch slots.
pub const MAX_SCHEDULE_SLOTS: usize = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("organization id must not be empty")]
    EmptyOrganizationId,
    #[error("invalid schedule time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("at least one schedule time is required")]
    NoScheduleTimes,
    #[error("at most {MAX_SCHEDULE_SLOTS} schedule times are supported, got {0}")]
    TooManyScheduleTimes(usize),
}

/// Non-empty Ashby organization identifier, trimmed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ConfigError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyOrganizationId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrganizationId {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrganizationId> for String {
    fn from(value: OrganizationId) -> Self {
        value.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wall-clock HH:MM slot for the daily fetch schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime {
    hour: u8,
    minute: u8,
}

impl SlotTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ConfigError> {
        if hour > 23 || minute > 59 {
            return Err(ConfigError::InvalidTime(format!("{hour:02}:{minute:02}")));
        }
        Ok(Self { hour, minute })
    }

    /// Strict two-digit `HH:MM` parse; anything else is rejected.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTime(input.to_string());
        let bytes = input.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(invalid());
        }
        if !bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 2 || b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let hour = (bytes[0] - b'0') * 10 + (bytes[1] - b'0');
        let minute = (bytes[3] - b'0') * 10 + (bytes[4] - b'0');
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for SlotTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Validated sync settings: which organization to poll and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub organization_id: OrganizationId,
    pub times_of_day: Vec<SlotTime>,
    pub setup_complete: bool,
}

impl ScheduleConfig {
    /// Build a validated config. Duplicate times collapse to their first
    /// occurrence; more than [`MAX_SCHEDULE_SLOTS`] distinct times is
    /// rejected.
    pub fn new(
        organization_id: OrganizationId,
        times: impl IntoIterator<Item = SlotTime>,
    ) -> Result<Self, ConfigError> {
        let mut times_of_day: Vec<SlotTime> = Vec::new();
        for time in times {
            if !times_of_day.contains(&time) {
                times_of_day.push(time);
            }
        }
        if times_of_day.is_empty() {
            return Err(ConfigError::NoScheduleTimes);
        }
        if times_of_day.len() > MAX_SCHEDULE_SLOTS {
            return Err(ConfigError::TooManyScheduleTimes(times_of_day.len()));
        }
        Ok(Self {
            organization_id,
            times_of_day,
            setup_complete: true,
        })
    }

    pub fn parse_times(raw: &[String]) -> Result<Vec<SlotTime>, ConfigError> {
        raw.iter().map(|t| SlotTime::parse(t)).collect()
    }
}

/// Parser output for a single posting before it is written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedJob {
    pub external_id: String,
    pub title: String,
    pub department: String,
    pub team: String,
    pub location: String,
    pub employment_type: String,
    pub compensation: String,
    pub published_at: String,
    pub is_remote: bool,
    pub application_url: String,
}

impl NormalizedJob {
    /// Promote to a persisted row. `created_at` and `updated_at` both start
    /// at `now`; on update the store keeps the original `created_at`.
    pub fn into_job(self, fingerprint: &str, now: DateTime<Utc>) -> Job {
        Job {
            external_id: self.external_id,
            title: self.title,
            department: self.department,
            team: self.team,
            location: self.location,
            employment_type: self.employment_type,
            compensation: self.compensation,
            published_at: self.published_at,
            is_remote: self.is_remote,
            application_url: self.application_url,
            created_at: now,
            updated_at: now,
            last_fetch_fingerprint: fingerprint.to_string(),
        }
    }
}

/// One cached posting, keyed by the id assigned upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub external_id: String,
    pub title: String,
    pub department: String,
    pub team: String,
    pub location: String,
    pub employment_type: String,
    pub compensation: String,
    pub published_at: String,
    pub is_remote: bool,
    pub application_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetch_fingerprint: String,
}

/// Counts for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed_writes: usize,
}

/// Outcome of the most recent run. A single overwritten record, not a log;
/// `payload_hash` is present whenever the fetch itself succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRunRecord {
    pub run_id: Uuid,
    pub ran_at: DateTime<Utc>,
    pub payload_hash: Option<String>,
    pub summary: ChangeSummary,
    pub error: Option<String>,
}
