use chrono::{NaiveDateTime, Timelike};

use crate::{
    channel::{Channel, ChannelSettings},
    config::{ChannelHardwareConfig, SchedulerConfig},
    error::ConfigError,
    interpolation::compute,
    schedule::{resolve, Direction, ScheduleStore, TimeOfDay},
    types::{ControllerStatus, FanStatus, PointStatus, RunMode, TickSummary},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    WriteOutput { channel: usize, value: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotScheduled(RunMode),
    EmptySchedule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Applied,
    Skipped(SkipReason),
}

impl TickOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "APPLIED",
            Self::Skipped(SkipReason::NotScheduled(_)) => "SKIPPED_NOT_SCHEDULED",
            Self::Skipped(SkipReason::EmptySchedule) => "SKIPPED_EMPTY_SCHEDULE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickWarning {
    ZeroSpanFade { point: TimeOfDay },
    MissingValues { channels: Vec<usize> },
    EmptySchedule,
}

impl std::fmt::Display for TickWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroSpanFade { point } => {
                write!(f, "fade into {point} has zero span, applied target directly")
            }
            Self::MissingValues { channels } => {
                write!(f, "schedule has no values for channels {channels:?}, using 0")
            }
            Self::EmptySchedule => write!(f, "schedule is empty, outputs held"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at: NaiveDateTime,
    pub outcome: TickOutcome,
    pub actions: Vec<EngineAction>,
    pub warnings: Vec<TickWarning>,
    pub previous: Option<PointStatus>,
    pub next: Option<PointStatus>,
}

impl TickReport {
    fn skipped(at: NaiveDateTime, reason: SkipReason) -> Self {
        let warnings = match reason {
            SkipReason::EmptySchedule => vec![TickWarning::EmptySchedule],
            SkipReason::NotScheduled(_) => Vec::new(),
        };
        Self {
            at,
            outcome: TickOutcome::Skipped(reason),
            actions: Vec::new(),
            warnings,
            previous: None,
            next: None,
        }
    }

    pub fn summary(&self) -> TickSummary {
        TickSummary {
            at: self.at.format("%Y-%m-%d %H:%M").to_string(),
            outcome: self.outcome.as_str(),
            writes: self.actions.len(),
            warnings: self.warnings.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct OverrideState {
    id: u64,
    values: Vec<u16>,
    started_ms: u64,
    resume_to: RunMode,
}

#[derive(Debug, Clone)]
pub struct LightingEngine {
    pub config: SchedulerConfig,
    channels: Vec<Channel>,
    mode: RunMode,
    override_state: Option<OverrideState>,
    next_override_id: u64,
    last_tick: Option<TickSummary>,
}

impl LightingEngine {
    pub fn new(
        config: SchedulerConfig,
        hardware: &[ChannelHardwareConfig],
    ) -> Result<Self, ConfigError> {
        let channels = hardware
            .iter()
            .enumerate()
            .map(|(id, hw)| Channel::new(id, *hw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            channels,
            mode: RunMode::Stopped,
            override_state: None,
            next_override_id: 0,
            last_tick: None,
        })
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_settings(&self) -> Vec<ChannelSettings> {
        self.channels.iter().map(Channel::settings).collect()
    }

    pub fn restore_channels(&mut self, settings: &[ChannelSettings]) -> usize {
        let mut unmatched = 0;
        for record in settings {
            match self.channels.get_mut(record.id) {
                Some(channel) => channel.restore(record),
                None => unmatched += 1,
            }
        }
        unmatched
    }

    pub fn sync_actions(&self) -> Vec<EngineAction> {
        self.channels
            .iter()
            .map(|channel| EngineAction::WriteOutput {
                channel: channel.id(),
                value: channel.current_output(),
            })
            .collect()
    }

    pub fn start(&mut self) -> bool {
        self.request_mode(RunMode::Scheduled)
    }

    pub fn stop(&mut self) -> bool {
        self.request_mode(RunMode::Stopped)
    }

    pub fn set_channel_enabled(
        &mut self,
        id: usize,
        enabled: bool,
    ) -> Result<(bool, Vec<EngineAction>), ConfigError> {
        let override_value = self.override_value_for(id);
        let channel = self
            .channels
            .get_mut(id)
            .ok_or(ConfigError::UnknownChannel(id))?;

        let changed = channel.set_enabled(enabled);
        let mut actions = Vec::new();
        if changed {
            let requested = if enabled {
                override_value.unwrap_or(channel.current_output())
            } else {
                0
            };
            if let Some(value) = channel.apply_output(requested) {
                actions.push(EngineAction::WriteOutput { channel: id, value });
            }
        }
        Ok((changed, actions))
    }

    pub fn set_channel_limits(
        &mut self,
        id: usize,
        min_limit: u16,
        max_limit: u16,
    ) -> Result<(bool, Vec<EngineAction>), ConfigError> {
        let channel = self
            .channels
            .get_mut(id)
            .ok_or(ConfigError::UnknownChannel(id))?;

        let changed = channel.set_limits(min_limit, max_limit)?;
        let mut actions = Vec::new();
        if let Some(value) = channel.apply_output(channel.current_output()) {
            actions.push(EngineAction::WriteOutput { channel: id, value });
        }
        Ok((changed, actions))
    }

    pub fn validate_override(&self, values: &[u16]) -> Result<(), ConfigError> {
        if values.len() != self.channels.len() {
            return Err(ConfigError::OverrideValueCount {
                expected: self.channels.len(),
                got: values.len(),
            });
        }
        for (channel, &value) in self.channels.iter().zip(values) {
            if value > channel.max_pwm() {
                return Err(ConfigError::OverrideValueTooLarge {
                    channel: channel.id(),
                    value,
                    max: channel.max_pwm(),
                });
            }
        }
        Ok(())
    }

    pub fn begin_override(
        &mut self,
        values: &[u16],
        now_ms: u64,
    ) -> Result<(u64, Vec<EngineAction>), ConfigError> {
        self.validate_override(values)?;

        let resume_to = match &self.override_state {
            Some(active) => active.resume_to,
            None => self.mode,
        };
        self.next_override_id += 1;
        let id = self.next_override_id;
        self.mode = RunMode::Overridden;

        let mut actions = Vec::new();
        for (channel, &value) in self.channels.iter_mut().zip(values) {
            if let Some(applied) = channel.apply_output(value) {
                actions.push(EngineAction::WriteOutput {
                    channel: channel.id(),
                    value: applied,
                });
            }
        }

        self.override_state = Some(OverrideState {
            id,
            values: values.to_vec(),
            started_ms: now_ms,
            resume_to,
        });
        Ok((id, actions))
    }

    // Stale ids are ignored.
    pub fn finish_override(&mut self, id: u64) -> Option<RunMode> {
        if self.override_state.as_ref().map(|active| active.id) != Some(id) {
            return None;
        }
        let state = self.override_state.take()?;
        self.mode = state.resume_to;
        Some(self.mode)
    }

    pub fn active_override_id(&self) -> Option<u64> {
        self.override_state.as_ref().map(|active| active.id)
    }

    pub fn override_remaining_ms(&self, now_ms: u64) -> u64 {
        match &self.override_state {
            Some(active) => {
                let elapsed = now_ms.saturating_sub(active.started_ms);
                self.config.override_duration_ms().saturating_sub(elapsed)
            }
            None => 0,
        }
    }

    pub fn tick(&mut self, now: NaiveDateTime, schedule: &ScheduleStore) -> TickReport {
        let now = truncate_to_minute(now);

        if self.mode != RunMode::Scheduled {
            return self.record(TickReport::skipped(
                now,
                SkipReason::NotScheduled(self.mode),
            ));
        }

        let points = schedule.points();
        let (Some(previous), Some(next)) = (
            resolve(now, points, Direction::Previous),
            resolve(now, points, Direction::Next),
        ) else {
            return self.record(TickReport::skipped(now, SkipReason::EmptySchedule));
        };

        let mut actions = Vec::new();
        let mut missing = Vec::new();
        let mut zero_span = false;

        for channel in &mut self.channels {
            let target = compute(now, &previous, &next, channel);
            zero_span |= target.zero_span;
            if target.missing_value {
                missing.push(channel.id());
            }
            if let Some(value) = channel.apply_output(target.output) {
                actions.push(EngineAction::WriteOutput {
                    channel: channel.id(),
                    value,
                });
            }
        }

        let mut warnings = Vec::new();
        if zero_span {
            warnings.push(TickWarning::ZeroSpanFade {
                point: next.point.time,
            });
        }
        if !missing.is_empty() {
            warnings.push(TickWarning::MissingValues { channels: missing });
        }

        let report = TickReport {
            at: now,
            outcome: TickOutcome::Applied,
            actions,
            warnings,
            previous: Some(previous.status()),
            next: Some(next.status()),
        };
        self.record(report)
    }

    pub fn last_tick(&self) -> Option<&TickSummary> {
        self.last_tick.as_ref()
    }

    pub fn status(
        &self,
        now: Option<NaiveDateTime>,
        schedule: &ScheduleStore,
        now_ms: u64,
        fan: Option<FanStatus>,
        timezone: &str,
    ) -> ControllerStatus {
        let now = now.map(truncate_to_minute);
        let (previous_point, next_point) = match now {
            Some(now) => (
                resolve(now, schedule.points(), Direction::Previous).map(|p| p.status()),
                resolve(now, schedule.points(), Direction::Next).map(|p| p.status()),
            ),
            None => (None, None),
        };

        ControllerStatus {
            mode: self.mode.as_str(),
            override_active: self.override_state.is_some(),
            override_remaining_ms: self.override_remaining_ms(now_ms),
            override_values: self
                .override_state
                .as_ref()
                .map(|active| active.values.clone())
                .unwrap_or_default(),
            channels: self.channels.iter().map(Channel::status).collect(),
            schedule_points: schedule.len(),
            previous_point,
            next_point,
            last_tick: self.last_tick.clone(),
            fan,
            time_synced: now.is_some(),
            timezone: timezone.to_string(),
            local_time: now.map(|now| now.format("%Y-%m-%d %H:%M").to_string()),
        }
    }

    fn request_mode(&mut self, target: RunMode) -> bool {
        if let Some(active) = self.override_state.as_mut() {
            // Applied once the override ends.
            let changed = active.resume_to != target;
            active.resume_to = target;
            return changed;
        }
        if self.mode == target {
            return false;
        }
        self.mode = target;
        true
    }

    fn override_value_for(&self, id: usize) -> Option<u16> {
        self.override_state
            .as_ref()
            .and_then(|active| active.values.get(id).copied())
    }

    fn record(&mut self, report: TickReport) -> TickReport {
        self.last_tick = Some(report.summary());
        report
    }
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|now| now.with_nanosecond(0))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::schedule::SchedulePoint;

    fn engine() -> LightingEngine {
        let hardware = [ChannelHardwareConfig {
            pin: 25,
            resolution: 10,
        }; 3];
        LightingEngine::new(SchedulerConfig::default(), &hardware).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 4, 2)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn store(points: Vec<SchedulePoint>) -> ScheduleStore {
        ScheduleStore::from_points(points, 3, 50).unwrap()
    }

    fn point(hour: u8, fade: bool, values: Vec<u8>) -> SchedulePoint {
        SchedulePoint::new(TimeOfDay::new(hour, 0).unwrap(), fade, values)
    }

    fn outputs(engine: &LightingEngine) -> Vec<u16> {
        engine.channels().iter().map(Channel::current_output).collect()
    }

    #[test]
    fn stopped_engine_skips_ticks() {
        let mut engine = engine();
        let schedule = store(vec![point(8, false, vec![50, 50, 50])]);

        let report = engine.tick(at(9, 0), &schedule);

        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(SkipReason::NotScheduled(RunMode::Stopped))
        );
        assert!(report.actions.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_schedule_is_reported_and_outputs_hold() {
        let mut engine = engine();
        engine.start();
        engine.begin_override(&[5, 6, 7], 0).unwrap();
        let id = engine.active_override_id().unwrap();
        engine.finish_override(id);

        let report = engine.tick(at(9, 0), &ScheduleStore::default());

        assert_eq!(report.outcome, TickOutcome::Skipped(SkipReason::EmptySchedule));
        assert_eq!(report.warnings, vec![TickWarning::EmptySchedule]);
        assert_eq!(outputs(&engine), vec![5, 6, 7]);
        let last = engine.last_tick().unwrap();
        assert_eq!(last.outcome, "SKIPPED_EMPTY_SCHEDULE");
        assert_eq!(last.warnings, vec!["schedule is empty, outputs held".to_string()]);
    }

    #[test]
    fn scheduled_tick_writes_only_changed_channels() {
        let mut engine = engine();
        engine.start();
        let schedule = store(vec![
            point(8, true, vec![0, 100, 0]),
            point(10, true, vec![100, 100, 0]),
        ]);

        let report = engine.tick(at(9, 0) + Duration::seconds(45), &schedule);

        assert_eq!(report.outcome, TickOutcome::Applied);
        assert_eq!(
            report.actions,
            vec![
                EngineAction::WriteOutput {
                    channel: 0,
                    value: 512
                },
                EngineAction::WriteOutput {
                    channel: 1,
                    value: 1023
                },
            ]
        );
        assert_eq!(report.previous.as_ref().map(|p| p.index), Some(0));
        assert_eq!(report.next.as_ref().map(|p| p.index), Some(1));

        let repeat = engine.tick(at(9, 0), &schedule);
        assert!(repeat.actions.is_empty());
    }

    #[test]
    fn single_point_warns_zero_span_and_applies_value() {
        let mut engine = engine();
        engine.start();
        let schedule = store(vec![point(7, true, vec![100, 50, 0])]);

        let report = engine.tick(at(15, 0), &schedule);

        assert_eq!(outputs(&engine), vec![1023, 512, 0]);
        assert_eq!(
            report.warnings,
            vec![TickWarning::ZeroSpanFade {
                point: TimeOfDay::new(7, 0).unwrap()
            }]
        );
    }

    #[test]
    fn short_value_lists_warn_once_per_tick() {
        let mut engine = engine();
        engine.start();
        let schedule = store(vec![point(7, false, vec![100]), point(9, false, vec![100])]);

        let report = engine.tick(at(8, 0), &schedule);

        assert_eq!(
            report.warnings,
            vec![TickWarning::MissingValues {
                channels: vec![1, 2]
            }]
        );
        assert_eq!(outputs(&engine), vec![1023, 0, 0]);
    }

    #[test]
    fn override_applies_values_and_suppresses_ticks() {
        let mut engine = engine();
        engine.start();
        let schedule = store(vec![point(7, false, vec![100, 100, 100])]);

        let (id, actions) = engine.begin_override(&[10, 20, 30], 1_000).unwrap();

        assert_eq!(actions.len(), 3);
        assert_eq!(outputs(&engine), vec![10, 20, 30]);
        assert_eq!(engine.mode(), RunMode::Overridden);

        let report = engine.tick(at(12, 0), &schedule);
        assert_eq!(
            report.outcome,
            TickOutcome::Skipped(SkipReason::NotScheduled(RunMode::Overridden))
        );
        assert_eq!(outputs(&engine), vec![10, 20, 30]);
        assert_eq!(engine.override_remaining_ms(11_000), 20_000);

        assert_eq!(engine.finish_override(id), Some(RunMode::Scheduled));
        engine.tick(at(12, 0), &schedule);
        assert_eq!(outputs(&engine), vec![1023, 1023, 1023]);
    }

    #[test]
    fn override_values_respect_limits() {
        let mut engine = engine();
        engine.set_channel_limits(0, 100, 800).unwrap();

        engine.begin_override(&[10, 900, 1023], 0).unwrap();

        assert_eq!(outputs(&engine), vec![100, 900, 1023]);
        assert!(matches!(
            engine.begin_override(&[10, 20], 0),
            Err(ConfigError::OverrideValueCount { expected: 3, got: 2 })
        ));
        assert!(matches!(
            engine.begin_override(&[10, 20, 2_000], 0),
            Err(ConfigError::OverrideValueTooLarge { channel: 2, .. })
        ));
    }

    #[test]
    fn override_from_stopped_resumes_stopped() {
        let mut engine = engine();

        let (id, _) = engine.begin_override(&[1, 2, 3], 0).unwrap();

        assert_eq!(engine.finish_override(id), Some(RunMode::Stopped));
        assert_eq!(engine.mode(), RunMode::Stopped);
    }

    #[test]
    fn replacing_override_keeps_first_resume_target() {
        let mut engine = engine();
        engine.start();

        let (first, _) = engine.begin_override(&[1, 2, 3], 0).unwrap();
        let (second, _) = engine.begin_override(&[4, 5, 6], 10).unwrap();

        assert_eq!(engine.finish_override(first), None);
        assert_eq!(engine.mode(), RunMode::Overridden);
        assert_eq!(outputs(&engine), vec![4, 5, 6]);
        assert_eq!(engine.finish_override(second), Some(RunMode::Scheduled));
    }

    #[test]
    fn start_and_stop_during_override_change_resume_target() {
        let mut engine = engine();
        engine.start();
        let (id, _) = engine.begin_override(&[1, 2, 3], 0).unwrap();

        assert!(engine.stop());
        assert_eq!(engine.mode(), RunMode::Overridden);
        assert_eq!(engine.finish_override(id), Some(RunMode::Stopped));
    }

    #[test]
    fn disabling_channel_drives_it_off() {
        let mut engine = engine();
        engine.begin_override(&[400, 400, 400], 0).unwrap();

        let (changed, actions) = engine.set_channel_enabled(1, false).unwrap();
        assert!(changed);
        assert_eq!(
            actions,
            vec![EngineAction::WriteOutput {
                channel: 1,
                value: 0
            }]
        );

        let (_, actions) = engine.set_channel_enabled(1, true).unwrap();
        assert_eq!(
            actions,
            vec![EngineAction::WriteOutput {
                channel: 1,
                value: 400
            }]
        );
        assert_eq!(
            engine.set_channel_enabled(7, true),
            Err(ConfigError::UnknownChannel(7))
        );
    }

    #[test]
    fn tightening_limits_reclamps_current_output() {
        let mut engine = engine();
        engine.begin_override(&[900, 0, 0], 0).unwrap();

        let (changed, actions) = engine.set_channel_limits(0, 0, 500).unwrap();

        assert!(changed);
        assert_eq!(
            actions,
            vec![EngineAction::WriteOutput {
                channel: 0,
                value: 500
            }]
        );
    }

    #[test]
    fn restore_ignores_unknown_channels() {
        let mut engine = engine();
        let mut settings = engine.channel_settings();
        settings[2].current_output = 300;
        settings.push(ChannelSettings {
            id: 9,
            enabled: true,
            min_limit: 0,
            max_limit: 10,
            current_output: 0,
        });

        assert_eq!(engine.restore_channels(&settings), 1);
        assert_eq!(outputs(&engine), vec![0, 0, 300]);
        assert_eq!(engine.sync_actions().len(), 3);
    }

    #[test]
    fn status_reports_resolved_points() {
        let mut engine = engine();
        engine.start();
        let schedule = store(vec![point(6, true, vec![1]), point(20, false, vec![2])]);

        let status = engine.status(Some(at(21, 30)), &schedule, 0, None, "UTC");

        assert_eq!(status.mode, "SCHEDULED");
        assert_eq!(status.previous_point.map(|p| p.index), Some(1));
        assert_eq!(status.next_point.map(|p| p.time), Some("06:00".to_string()));
        assert!(status.time_synced);
    }
}
