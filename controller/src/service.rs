use std::{sync::Arc, time::Duration};

use lightctl_common::{
    fan::feedback_voltage,
    persist::PersistedState,
    schedule::next_tick_delay,
    types::ChannelStatus,
    ConfigError, ControllerStatus, EngineAction, FanConfig, FanCurve, FanStatus, LightingEngine,
    RunMode, RuntimeConfig, SchedulePoint, ScheduleStore, TickReport,
};
use serde::Deserialize;
use tokio::{
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    clock::Clock,
    hardware::{FanSensors, PwmDriver},
};

const UNSYNCED_RETRY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OverrideStop {
    Cancelled,
    Replaced,
}

struct ActiveOverride {
    id: u64,
    stop: oneshot::Sender<OverrideStop>,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChannelUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(rename = "minLimit", default)]
    pub min_limit: Option<u16>,
    #[serde(rename = "maxLimit", default)]
    pub max_limit: Option<u16>,
}

// Every PWM write happens under the engine lock.
#[derive(Clone)]
pub struct LightingService {
    engine: Arc<Mutex<LightingEngine>>,
    schedule: Arc<Mutex<Arc<ScheduleStore>>>,
    active_override: Arc<Mutex<Option<ActiveOverride>>>,
    fan: Arc<Mutex<Option<FanStatus>>>,
    mode_tx: Arc<watch::Sender<RunMode>>,
    clock: Arc<dyn Clock>,
    pwm: Arc<dyn PwmDriver>,
    epoch: Instant,
}

impl LightingService {
    pub fn new(
        runtime: &RuntimeConfig,
        persisted: PersistedState,
        clock: Arc<dyn Clock>,
        pwm: Arc<dyn PwmDriver>,
    ) -> Result<Self, ConfigError> {
        let mut engine = LightingEngine::new(runtime.scheduler.clone(), &runtime.channels)?;

        let unmatched = engine.restore_channels(&persisted.channels);
        if unmatched > 0 {
            warn!("ignored {unmatched} persisted settings for unknown channels");
        }

        let (schedule, dropped) = ScheduleStore::from_points_lossy(
            persisted.points,
            engine.channel_count(),
            runtime.scheduler.max_points,
        );
        if dropped > 0 {
            warn!("dropped {dropped} invalid persisted schedule points");
        }
        info!(
            channels = engine.channel_count(),
            points = schedule.len(),
            "lighting engine restored"
        );

        let (mode_tx, _) = watch::channel(engine.mode());
        let service = Self {
            engine: Arc::new(Mutex::new(engine)),
            schedule: Arc::new(Mutex::new(Arc::new(schedule))),
            active_override: Arc::new(Mutex::new(None)),
            fan: Arc::new(Mutex::new(None)),
            mode_tx: Arc::new(mode_tx),
            clock,
            pwm,
            epoch: Instant::now(),
        };
        Ok(service)
    }

    pub async fn boot(&self) {
        let mut engine = self.engine.lock().await;
        let actions = engine.sync_actions();
        self.execute(&actions);
        if engine.config.autostart && engine.start() {
            info!("scheduler autostarted");
        }
        self.mode_tx.send_replace(engine.mode());
    }

    pub async fn start(&self) -> RunMode {
        let mut engine = self.engine.lock().await;
        if engine.start() {
            info!("scheduler start requested");
            self.mode_tx.send_replace(engine.mode());
        }
        engine.mode()
    }

    pub async fn stop(&self) -> RunMode {
        let mut engine = self.engine.lock().await;
        if engine.stop() {
            info!("scheduler stop requested");
            self.mode_tx.send_replace(engine.mode());
        }
        engine.mode()
    }

    pub async fn tick_once(&self) -> Option<TickReport> {
        let Some(now) = self.clock.now() else {
            warn!("local time unavailable, skipping scheduler tick");
            return None;
        };
        let schedule = self.schedule_snapshot().await;

        let mut engine = self.engine.lock().await;
        let report = engine.tick(now, &schedule);
        self.execute(&report.actions);
        drop(engine);

        for warning in &report.warnings {
            warn!("scheduler tick at {}: {warning}", report.at);
        }
        debug!(
            at = %report.at,
            outcome = report.outcome.as_str(),
            writes = report.actions.len(),
            "scheduler tick"
        );
        Some(report)
    }

    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_scheduler())
    }

    async fn run_scheduler(self) {
        let mut mode_rx = self.mode_tx.subscribe();
        let offset = self.engine.lock().await.config.tick_offset_secs;

        loop {
            while *mode_rx.borrow_and_update() != RunMode::Scheduled {
                if mode_rx.changed().await.is_err() {
                    return;
                }
            }

            self.tick_once().await;

            let delay = self
                .clock
                .now()
                .map(|now| next_tick_delay(now, offset))
                .unwrap_or(UNSYNCED_RETRY);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = mode_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub async fn start_override(&self, values: Vec<u16>) -> Result<u64, ConfigError> {
        let mut slot = self.active_override.lock().await;
        self.engine.lock().await.validate_override(&values)?;

        if let Some(previous) = slot.take() {
            let _ = previous.stop.send(OverrideStop::Replaced);
            if let Err(err) = previous.handle.await {
                warn!("override {} watchdog ended abnormally: {err}", previous.id);
            }
        }

        let (id, duration_ms) = {
            let mut engine = self.engine.lock().await;
            let (id, actions) = engine.begin_override(&values, self.now_ms())?;
            self.execute(&actions);
            self.mode_tx.send_replace(engine.mode());
            (id, engine.config.override_duration_ms())
        };
        info!("override {id} started for {duration_ms} ms: {values:?}");

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(self.clone().watch_override(id, stop_rx));
        *slot = Some(ActiveOverride { id, stop, handle });
        Ok(id)
    }

    pub async fn cancel_override(&self) -> bool {
        let mut slot = self.active_override.lock().await;
        let Some(active) = slot.take() else {
            return false;
        };

        let running = self.engine.lock().await.active_override_id() == Some(active.id);
        let _ = active.stop.send(OverrideStop::Cancelled);
        if let Err(err) = active.handle.await {
            warn!("override {} watchdog ended abnormally: {err}", active.id);
        }
        running
    }

    async fn watch_override(self, id: u64, mut stop: oneshot::Receiver<OverrideStop>) {
        let (poll, max_polls) = {
            let engine = self.engine.lock().await;
            (
                Duration::from_millis(engine.config.override_poll_interval_ms),
                engine.config.override_max_polls,
            )
        };

        let mut stopped = None;
        for _ in 0..max_polls {
            tokio::select! {
                reason = &mut stop => {
                    stopped = Some(reason.unwrap_or(OverrideStop::Cancelled));
                    break;
                }
                _ = tokio::time::sleep(poll) => {}
            }
        }

        match stopped {
            Some(OverrideStop::Replaced) => {
                debug!("override {id} replaced");
                return;
            }
            Some(OverrideStop::Cancelled) => info!("override {id} cancelled"),
            None => info!("override {id} expired"),
        }

        let mut engine = self.engine.lock().await;
        if let Some(mode) = engine.finish_override(id) {
            self.mode_tx.send_replace(mode);
            info!("override {id} finished, resuming {}", mode.as_str());
        }
    }

    pub async fn schedule(&self) -> Vec<SchedulePoint> {
        self.schedule_snapshot().await.points().to_vec()
    }

    pub async fn replace_schedule(&self, points: Vec<SchedulePoint>) -> Result<usize, ConfigError> {
        let (channels, max_points) = self.schedule_limits().await;
        let store = ScheduleStore::from_points(points, channels, max_points)?;
        let count = store.len();
        *self.schedule.lock().await = Arc::new(store);
        info!("schedule replaced with {count} points");
        Ok(count)
    }

    pub async fn add_point(&self, point: SchedulePoint) -> Result<usize, ConfigError> {
        let (channels, max_points) = self.schedule_limits().await;
        let mut active = self.schedule.lock().await;
        let mut next = ScheduleStore::clone(&active);
        next.add(point, channels, max_points)?;
        let count = next.len();
        *active = Arc::new(next);
        info!("schedule point added, {count} points");
        Ok(count)
    }

    pub async fn clear_schedule(&self) {
        *self.schedule.lock().await = Arc::new(ScheduleStore::default());
        info!("schedule cleared");
    }

    pub async fn channels(&self) -> Vec<ChannelStatus> {
        self.engine
            .lock()
            .await
            .channels()
            .iter()
            .map(|channel| channel.status())
            .collect()
    }

    pub async fn update_channel(
        &self,
        id: usize,
        update: ChannelUpdate,
    ) -> Result<ChannelStatus, ConfigError> {
        let mut engine = self.engine.lock().await;
        let current = engine
            .channels()
            .get(id)
            .map(|channel| (channel.min_limit(), channel.max_limit()))
            .ok_or(ConfigError::UnknownChannel(id))?;

        if update.min_limit.is_some() || update.max_limit.is_some() {
            let min_limit = update.min_limit.unwrap_or(current.0);
            let max_limit = update.max_limit.unwrap_or(current.1);
            let (changed, actions) = engine.set_channel_limits(id, min_limit, max_limit)?;
            self.execute(&actions);
            if changed {
                info!("channel {id} limits set to {min_limit}-{max_limit}");
            }
        }

        if let Some(enabled) = update.enabled {
            let (changed, actions) = engine.set_channel_enabled(id, enabled)?;
            self.execute(&actions);
            if changed {
                info!("channel {id} {}", if enabled { "enabled" } else { "disabled" });
            }
        }

        engine
            .channels()
            .get(id)
            .map(|channel| channel.status())
            .ok_or(ConfigError::UnknownChannel(id))
    }

    pub async fn persisted_state(&self) -> PersistedState {
        let channels = self.engine.lock().await.channel_settings();
        let points = self.schedule().await;
        PersistedState { points, channels }
    }

    pub async fn status(&self) -> ControllerStatus {
        let now = self.clock.now();
        let schedule = self.schedule_snapshot().await;
        let fan = *self.fan.lock().await;
        let engine = self.engine.lock().await;
        engine.status(now, &schedule, self.now_ms(), fan, &self.clock.timezone())
    }

    pub fn spawn_fan_loop(&self, config: FanConfig, sensors: Arc<dyn FanSensors>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut curve = FanCurve::new(&config);
            let mut interval =
                tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
            loop {
                interval.tick().await;
                service.fan_step(&mut curve, &config, sensors.as_ref()).await;
            }
        })
    }

    async fn fan_step(&self, curve: &mut FanCurve, config: &FanConfig, sensors: &dyn FanSensors) {
        let temperature = sensors.temperature_c();
        let samples = sensors.feedback_samples(usize::from(config.sample_count));
        let voltage = feedback_voltage(&samples, config).unwrap_or(0.0);

        if temperature.is_none() {
            warn!("fan temperature probe unavailable, running fan at full speed");
        }
        if let Some(pwm) = curve.update(temperature.unwrap_or(f32::NAN)) {
            debug!(pwm, "fan duty changed");
            if let Err(err) = self.pwm.write(usize::from(config.pwm_channel), pwm) {
                warn!("fan pwm write failed: {err:#}");
            }
        }

        *self.fan.lock().await = Some(FanStatus {
            temperature_c: temperature.unwrap_or(f32::NAN),
            voltage_v: voltage,
            pwm: curve.current_pwm(),
        });
    }

    async fn schedule_snapshot(&self) -> Arc<ScheduleStore> {
        Arc::clone(&*self.schedule.lock().await)
    }

    async fn schedule_limits(&self) -> (usize, usize) {
        let engine = self.engine.lock().await;
        (engine.channel_count(), engine.config.max_points)
    }

    fn execute(&self, actions: &[EngineAction]) {
        for action in actions {
            match *action {
                EngineAction::WriteOutput { channel, value } => {
                    if let Err(err) = self.pwm.write(channel, value) {
                        warn!("pwm write to channel {channel} failed: {err:#}");
                    }
                }
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}
