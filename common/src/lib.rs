pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fan;
pub mod interpolation;
pub mod persist;
pub mod schedule;
pub mod topics;
pub mod types;

pub use channel::{Channel, ChannelSettings};
pub use config::{ChannelHardwareConfig, FanConfig, RuntimeConfig, SchedulerConfig};
pub use engine::{EngineAction, LightingEngine, SkipReason, TickOutcome, TickReport, TickWarning};
pub use error::{ConfigError, PersistError};
pub use fan::FanCurve;
pub use persist::PersistedState;
pub use schedule::{DayMask, Direction, SchedulePoint, ScheduleStore, TimeOfDay};
pub use topics::*;
pub use types::{ControllerStatus, FanStatus, RunMode};
