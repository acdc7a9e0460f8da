use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    channel::ChannelSettings,
    error::PersistError,
    schedule::{DayMask, SchedulePoint, TimeOfDay},
};

pub const CURRENT_VERSION: u64 = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub points: Vec<SchedulePoint>,
    pub channels: Vec<ChannelSettings>,
}

#[derive(Serialize)]
struct CurrentRecordRef<'a> {
    version: u64,
    points: &'a [SchedulePoint],
    channels: &'a [ChannelSettings],
}

#[derive(Deserialize)]
struct CurrentRecord {
    #[serde(default)]
    points: Vec<SchedulePoint>,
    #[serde(default)]
    channels: Vec<ChannelSettings>,
}

#[derive(Deserialize)]
struct LegacyRecord {
    #[serde(default)]
    points: Vec<LegacyPoint>,
    #[serde(default)]
    channels: Vec<LegacyChannel>,
}

#[derive(Deserialize)]
struct LegacyPoint {
    day: u8,
    hour: u8,
    minute: u8,
    fade: u8,
    value: [u8; 5],
}

#[derive(Deserialize)]
struct LegacyChannel {
    // Channel id plus one, zero marks an unused slot.
    num: usize,
    enabled: bool,
    max: u16,
    min: u16,
    pwm: u16,
}

pub fn encode(
    points: &[SchedulePoint],
    channels: &[ChannelSettings],
) -> Result<Vec<u8>, PersistError> {
    let record = CurrentRecordRef {
        version: CURRENT_VERSION,
        points,
        channels,
    };
    Ok(serde_json::to_vec_pretty(&record)?)
}

pub fn decode(raw: &[u8], channel_count: usize) -> Result<PersistedState, PersistError> {
    let value: Value = serde_json::from_slice(raw)?;
    let version = value
        .get("version")
        .and_then(Value::as_u64)
        .ok_or(PersistError::MissingVersion)?;

    match version {
        1 => {
            let legacy: LegacyRecord = serde_json::from_value(value)?;
            Ok(migrate_v1(legacy, channel_count))
        }
        CURRENT_VERSION => {
            let current: CurrentRecord = serde_json::from_value(value)?;
            Ok(PersistedState {
                points: current.points,
                channels: current.channels,
            })
        }
        other => Err(PersistError::UnsupportedVersion(other)),
    }
}

fn migrate_v1(legacy: LegacyRecord, channel_count: usize) -> PersistedState {
    let points = legacy
        .points
        .into_iter()
        .map(|point| {
            let mut migrated = SchedulePoint::new(
                TimeOfDay {
                    hour: point.hour,
                    minute: point.minute,
                },
                point.fade != 0,
                point.value.iter().copied().take(channel_count).collect(),
            );
            migrated.days = DayMask(point.day);
            migrated
        })
        .collect();

    let channels = legacy
        .channels
        .into_iter()
        .filter(|channel| channel.num > 0)
        .map(|channel| ChannelSettings {
            id: channel.num - 1,
            enabled: channel.enabled,
            min_limit: channel.min,
            max_limit: channel.max,
            current_output: channel.pwm,
        })
        .collect();

    PersistedState { points, channels }
}
