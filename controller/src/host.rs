use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lightctl_common::{
    persist::{self, PersistedState},
    ConfigError, RuntimeConfig, SchedulePoint, TOPIC_CMD_OVERRIDE, TOPIC_CMD_SCHEDULE,
    TOPIC_CMD_SCHEDULER, TOPIC_CONTROLLER_STATE,
};

use crate::{
    clock::{parse_timezone, Clock, SystemClock},
    hardware::{LoggingPwm, StaticSensors},
    service::{ChannelUpdate, LightingService},
};

const HOST_ENCLOSURE_TEMP_C: f32 = 25.0;

const MAX_MQTT_PAYLOAD_BYTES: usize = 2048;

#[derive(Clone)]
struct AppState {
    service: LightingService,
    clock: Arc<SystemClock>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct TimezoneUpdate {
    timezone: String,
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    values: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct OverrideStarted {
    id: u64,
    values: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct TimeStatus {
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
    #[serde(rename = "localTime")]
    local_time: Option<String>,
    #[serde(rename = "nowEpoch")]
    now_epoch: i64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let channel_count = runtime.channels.len();
    let persisted = store.load_state(channel_count).await.unwrap_or_else(|err| {
        warn!("failed to load persisted state, starting empty: {err:#}");
        PersistedState::default()
    });

    let timezone = parse_timezone(&runtime.timezone).unwrap_or_else(|| {
        warn!("unknown timezone {}, using UTC", runtime.timezone);
        chrono_tz::UTC
    });
    let clock = Arc::new(SystemClock::new(timezone));

    let service = LightingService::new(
        &runtime,
        persisted,
        clock.clone() as Arc<dyn Clock>,
        Arc::new(LoggingPwm),
    )
    .context("invalid channel configuration")?;
    service.boot().await;

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("lightctl-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        service: service.clone(),
        clock,
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_state_publish_loop(app_state.clone());
    service.spawn_scheduler();
    service.spawn_fan_loop(
        runtime.fan.clone(),
        Arc::new(StaticSensors::new(HOST_ENCLOSURE_TEMP_C, 0)),
    );

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/scheduler/start", post(handle_scheduler_start))
        .route("/api/scheduler/stop", post(handle_scheduler_stop))
        .route(
            "/api/schedule",
            get(handle_get_schedule)
                .put(handle_put_schedule)
                .delete(handle_delete_schedule),
        )
        .route("/api/schedule/points", post(handle_post_schedule_point))
        .route("/api/channels", get(handle_get_channels))
        .route("/api/channels/{id}", put(handle_put_channel))
        .route(
            "/api/override",
            post(handle_post_override).delete(handle_delete_override),
        )
        .route("/api/time", get(handle_get_time))
        .route("/api/timezone", put(handle_put_timezone))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state.clone());

    let port = std::env::var("LIGHTCTL_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    persist_state(&app_state)
        .await
        .context("failed to persist state on shutdown")?;
    info!("controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [TOPIC_CMD_SCHEDULER, TOPIC_CMD_OVERRIDE, TOPIC_CMD_SCHEDULE];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let status = app_state.service.status().await;
            match serde_json::to_vec(&status) {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();
    let service = &app_state.service;

    match topic.as_str() {
        TOPIC_CMD_SCHEDULER => match message.to_ascii_lowercase().as_str() {
            "start" => {
                service.start().await;
            }
            "stop" => {
                service.stop().await;
            }
            other => warn!("unknown scheduler command {other:?}"),
        },
        TOPIC_CMD_OVERRIDE => {
            if message.eq_ignore_ascii_case("cancel") {
                service.cancel_override().await;
            } else {
                let values: Vec<u16> =
                    serde_json::from_str(message).context("override payload is not a list")?;
                service.start_override(values).await?;
                persist_state(app_state).await?;
            }
        }
        TOPIC_CMD_SCHEDULE => {
            let points: Vec<SchedulePoint> =
                serde_json::from_str(message).context("schedule payload is not a point list")?;
            service.replace_schedule(points).await?;
            persist_state(app_state).await?;
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status().await)
}

async fn handle_scheduler_start(State(state): State<AppState>) -> impl IntoResponse {
    state.service.start().await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_scheduler_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.service.stop().await;
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.schedule().await)
}

async fn handle_put_schedule(
    State(state): State<AppState>,
    Json(points): Json<Vec<SchedulePoint>>,
) -> impl IntoResponse {
    if let Err(err) = state.service.replace_schedule(points).await {
        return config_error_response(&err);
    }
    if let Some(response) = persist_or_error(&state, "schedule").await {
        return response;
    }
    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_post_schedule_point(
    State(state): State<AppState>,
    Json(point): Json<SchedulePoint>,
) -> impl IntoResponse {
    if let Err(err) = state.service.add_point(point).await {
        return config_error_response(&err);
    }
    if let Some(response) = persist_or_error(&state, "schedule").await {
        return response;
    }
    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_delete_schedule(State(state): State<AppState>) -> impl IntoResponse {
    state.service.clear_schedule().await;
    if let Some(response) = persist_or_error(&state, "schedule").await {
        return response;
    }
    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_get_channels(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.channels().await)
}

async fn handle_put_channel(
    State(state): State<AppState>,
    Path(id): Path<usize>,
    Json(update): Json<ChannelUpdate>,
) -> impl IntoResponse {
    let channel = match state.service.update_channel(id, update).await {
        Ok(channel) => channel,
        Err(err @ ConfigError::UnknownChannel(_)) => {
            return error_response(StatusCode::NOT_FOUND, &err.to_string());
        }
        Err(err) => return config_error_response(&err),
    };
    if let Some(response) = persist_or_error(&state, "channel settings").await {
        return response;
    }
    Json(channel).into_response()
}

async fn handle_post_override(
    State(state): State<AppState>,
    Json(request): Json<OverrideRequest>,
) -> impl IntoResponse {
    let values = request.values.clone();
    match state.service.start_override(request.values).await {
        Ok(id) => {
            if let Some(response) = persist_or_error(&state, "channel outputs").await {
                return response;
            }
            Json(OverrideStarted { id, values }).into_response()
        }
        Err(err) => config_error_response(&err),
    }
}

async fn handle_delete_override(State(state): State<AppState>) -> impl IntoResponse {
    if !state.service.cancel_override().await {
        return error_response(StatusCode::NOT_FOUND, "No override is active");
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_time(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.clock.now();
    Json(TimeStatus {
        time_synced: now.is_some(),
        timezone: state.clock.timezone(),
        local_time: now.map(|now| now.format("%Y-%m-%d %H:%M:%S").to_string()),
        now_epoch: state.clock.epoch_secs(),
    })
}

async fn handle_put_timezone(
    State(state): State<AppState>,
    Json(update): Json<TimezoneUpdate>,
) -> impl IntoResponse {
    let Some(timezone) = parse_timezone(&update.timezone) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid timezone value");
    };

    state.clock.set_timezone(timezone);

    if let Err(err) = persist_timezone(&state).await {
        warn!("failed to persist timezone update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }

    handle_get_time(State(state)).await.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("LIGHTCTL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.lightctl"));

        Self::in_dir(data_dir)
    }

    fn in_dir(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_path()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let payload = serde_json::to_vec_pretty(runtime)?;
        self.write(self.runtime_path.as_path(), payload).await
    }

    async fn load_state(&self, channel_count: usize) -> anyhow::Result<PersistedState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_path()).await {
            Ok(raw) => Ok(persist::decode(&raw, channel_count)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let payload = persist::encode(&state.points, &state.channels)?;
        self.write(self.state_path.as_path(), payload).await
    }

    async fn write(&self, path: &std::path::Path, payload: Vec<u8>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

async fn persist_state(state: &AppState) -> anyhow::Result<()> {
    let snapshot = state.service.persisted_state().await;
    state.store.save_state(&snapshot).await
}

async fn persist_timezone(state: &AppState) -> anyhow::Result<()> {
    let mut runtime = state.store.load_runtime_config().await?;
    runtime.timezone = state.clock.timezone();
    state.store.save_runtime_config(&runtime).await
}

async fn persist_or_error(state: &AppState, what: &str) -> Option<axum::response::Response> {
    let err = persist_state(state).await.err()?;
    warn!("failed to persist {what} update: {err:#}");
    Some(error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Failed to persist {what}"),
    ))
}

fn config_error_response(err: &ConfigError) -> axum::response::Response {
    error_response(StatusCode::BAD_REQUEST, &err.to_string())
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
