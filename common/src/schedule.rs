use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::PointStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ConfigError> {
        let time = Self { hour, minute };
        time.validate()?;
        Ok(time)
    }

    pub fn validate(self) -> Result<(), ConfigError> {
        if self.hour > 23 || self.minute > 59 {
            return Err(ConfigError::InvalidTime {
                hour: self.hour,
                minute: self.minute,
            });
        }
        Ok(())
    }

    pub fn to_naive(self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(u32::from(self.hour), u32::from(self.minute), 0)
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

// Bit 0 is Sunday. Stored and persisted, not yet used by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayMask(pub u8);

impl DayMask {
    pub const SUNDAY: Self = Self(1);
    pub const MONDAY: Self = Self(2);
    pub const TUESDAY: Self = Self(4);
    pub const WEDNESDAY: Self = Self(8);
    pub const THURSDAY: Self = Self(16);
    pub const FRIDAY: Self = Self(32);
    pub const SATURDAY: Self = Self(64);
    pub const WEEKDAYS: Self = Self(62);
    pub const HOLIDAY: Self = Self(65);
    pub const ALL: Self = Self(127);

    pub fn validate(self) -> Result<(), ConfigError> {
        if self.0 > Self::ALL.0 {
            return Err(ConfigError::InvalidDayMask(self.0));
        }
        Ok(())
    }
}

impl Default for DayMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePoint {
    #[serde(flatten)]
    pub time: TimeOfDay,
    #[serde(default)]
    pub days: DayMask,
    #[serde(default = "default_fade")]
    pub fade: bool,
    pub values: Vec<u8>,
}

fn default_fade() -> bool {
    true
}

impl SchedulePoint {
    pub fn new(time: TimeOfDay, fade: bool, values: Vec<u8>) -> Self {
        Self {
            time,
            days: DayMask::ALL,
            fade,
            values,
        }
    }

    pub fn validate(&self, channel_count: usize) -> Result<(), ConfigError> {
        self.time.validate()?;
        self.days.validate()?;
        if self.values.len() > channel_count {
            return Err(ConfigError::TooManyValues {
                got: self.values.len(),
                channels: channel_count,
            });
        }
        if let Some((channel, &value)) = self
            .values
            .iter()
            .enumerate()
            .find(|(_, value)| **value > 100)
        {
            return Err(ConfigError::ValueOutOfRange { channel, value });
        }
        Ok(())
    }

    pub fn value_for(&self, channel: usize) -> Option<u8> {
        self.values.get(channel).copied()
    }
}

// Replaced wholesale, never edited in place while a tick may read it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleStore {
    points: Vec<SchedulePoint>,
}

impl ScheduleStore {
    pub fn from_points_lossy(
        points: Vec<SchedulePoint>,
        channel_count: usize,
        max_points: usize,
    ) -> (Self, usize) {
        let total = points.len();
        let points: Vec<SchedulePoint> = points
            .into_iter()
            .filter(|point| point.validate(channel_count).is_ok())
            .take(max_points)
            .collect();
        let dropped = total - points.len();
        (Self { points }, dropped)
    }

    pub fn from_points(
        points: Vec<SchedulePoint>,
        channel_count: usize,
        max_points: usize,
    ) -> Result<Self, ConfigError> {
        if points.len() > max_points {
            return Err(ConfigError::TooManyPoints { max: max_points });
        }
        for point in &points {
            point.validate(channel_count)?;
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[SchedulePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn add(
        &mut self,
        point: SchedulePoint,
        channel_count: usize,
        max_points: usize,
    ) -> Result<(), ConfigError> {
        if self.points.len() >= max_points {
            return Err(ConfigError::TooManyPoints { max: max_points });
        }
        point.validate(channel_count)?;
        self.points.push(point);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPoint<'a> {
    pub at: NaiveDateTime,
    pub index: usize,
    pub point: &'a SchedulePoint,
}

impl ResolvedPoint<'_> {
    pub fn status(&self) -> PointStatus {
        PointStatus {
            index: self.index,
            time: self.point.time.to_string(),
            effective_at: self.at.format("%Y-%m-%d %H:%M").to_string(),
            fade: self.point.fade,
            values: self.point.values.clone(),
        }
    }
}

// A point exactly at `now` counts as the next one. Ties keep the first point.
pub fn resolve(
    now: NaiveDateTime,
    points: &[SchedulePoint],
    direction: Direction,
) -> Option<ResolvedPoint<'_>> {
    let today = now.date();
    let mut best: Option<ResolvedPoint<'_>> = None;

    for (index, point) in points.iter().enumerate() {
        let Some(time) = point.time.to_naive() else {
            continue;
        };
        let mut at = today.and_time(time);

        match direction {
            Direction::Previous if at >= now => at -= Duration::days(1),
            Direction::Next if at < now => at += Duration::days(1),
            _ => {}
        }

        let better = match (best, direction) {
            (None, _) => true,
            (Some(current), Direction::Previous) => at > current.at,
            (Some(current), Direction::Next) => at < current.at,
        };

        if better {
            best = Some(ResolvedPoint { at, index, point });
        }
    }

    best
}

pub fn next_tick_delay(now: NaiveDateTime, offset_secs: u32) -> std::time::Duration {
    let second = now.second().min(59);
    std::time::Duration::from_secs(u64::from(60 - second + offset_secs))
}
