use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunMode {
    Stopped,
    Scheduled,
    Overridden,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Scheduled => "SCHEDULED",
            Self::Overridden => "OVERRIDDEN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub id: usize,
    pub pin: u8,
    pub resolution: u8,
    pub enabled: bool,
    #[serde(rename = "minLimit")]
    pub min_limit: u16,
    #[serde(rename = "maxLimit")]
    pub max_limit: u16,
    #[serde(rename = "maxPwm")]
    pub max_pwm: u16,
    #[serde(rename = "currentOutput")]
    pub current_output: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointStatus {
    pub index: usize,
    pub time: String,
    #[serde(rename = "effectiveAt")]
    pub effective_at: String,
    pub fade: bool,
    pub values: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub at: String,
    pub outcome: &'static str,
    pub writes: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FanStatus {
    #[serde(rename = "temperatureC")]
    pub temperature_c: f32,
    #[serde(rename = "voltageV")]
    pub voltage_v: f32,
    pub pwm: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    #[serde(rename = "overrideActive")]
    pub override_active: bool,
    #[serde(rename = "overrideRemainingMs")]
    pub override_remaining_ms: u64,
    #[serde(rename = "overrideValues")]
    pub override_values: Vec<u16>,
    pub channels: Vec<ChannelStatus>,
    #[serde(rename = "schedulePoints")]
    pub schedule_points: usize,
    #[serde(rename = "previousPoint")]
    pub previous_point: Option<PointStatus>,
    #[serde(rename = "nextPoint")]
    pub next_point: Option<PointStatus>,
    #[serde(rename = "lastTick")]
    pub last_tick: Option<TickSummary>,
    pub fan: Option<FanStatus>,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    pub timezone: String,
    #[serde(rename = "localTime")]
    pub local_time: Option<String>,
}
