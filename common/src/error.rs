use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid time {hour:02}:{minute:02}")]
    InvalidTime { hour: u8, minute: u8 },

    #[error("day mask {0} is outside 0-127")]
    InvalidDayMask(u8),

    #[error("value {value} for channel {channel} is outside 0-100")]
    ValueOutOfRange { channel: usize, value: u8 },

    #[error("point carries {got} values but only {channels} channels exist")]
    TooManyValues { got: usize, channels: usize },

    #[error("channel {0} does not exist")]
    UnknownChannel(usize),

    #[error("limits {min}-{max} are invalid for a {resolution}-bit channel")]
    InvalidLimits { min: u16, max: u16, resolution: u8 },

    #[error("unsupported PWM resolution {0} (use 8, 10, 12 or 15)")]
    UnsupportedResolution(u8),

    #[error("schedule is limited to {max} points")]
    TooManyPoints { max: usize },

    #[error("override needs {expected} values, got {got}")]
    OverrideValueCount { expected: usize, got: usize },

    #[error("override value {value} exceeds channel {channel} maximum {max}")]
    OverrideValueTooLarge { channel: usize, value: u16, max: u16 },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("malformed persisted record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("persisted record is missing its version tag")]
    MissingVersion,

    #[error("unsupported persisted record version {0}")]
    UnsupportedVersion(u64),
}
