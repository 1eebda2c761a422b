use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use thermoguard_common::{
    ActuatorId, ControlEngine, ControllerStatus, Mode, PersistedSettings, RelayDriver,
    RuntimeConfig, SafetyLayer, SettingsStore, StatePayload, StoreError, MAX_TARGET_TEMP_F,
    MIN_TARGET_TEMP_F, TOPIC_CMD_MODE, TOPIC_CMD_TARGET, TOPIC_CONTROLLER_STATE,
    TOPIC_REMOTE_TEMP, TOPIC_SENSOR_TEMP,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const SENSOR_VALID_RANGE_F: std::ops::RangeInclusive<f32> = -40.0..=150.0;

/// Host relay backend. Hardware builds replace this with a GPIO driver;
/// here every write is just traced so the control path can be exercised
/// end to end.
struct LogRelayDriver;

impl RelayDriver for LogRelayDriver {
    fn set(&mut self, actuator: ActuatorId, on: bool) {
        info!("relay {actuator:?} -> {}", if on { "ON" } else { "OFF" });
    }

    fn is_energized(&self, _actuator: ActuatorId) -> bool {
        false
    }
}

/// Engine and safety layer share one lock: the control path is a single
/// cooperative owner, never two tasks mutating concurrently.
struct Control {
    engine: ControlEngine,
    safety: SafetyLayer<LogRelayDriver>,
}

#[derive(Clone)]
struct AppState {
    control: Arc<Mutex<Control>>,
    mqtt: AsyncClient,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Settings live inside the runtime config JSON document; a save reads the
/// current document, swaps the settings slice, and writes it back.
struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load_runtime(&self) -> Result<RuntimeConfig, StoreError> {
        match std::fs::read(&self.path) {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    fn save_runtime(&self, runtime: &RuntimeConfig) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        std::fs::write(&self.path, payload)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<PersistedSettings, StoreError> {
        Ok(self.load_runtime()?.settings)
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), StoreError> {
        let mut runtime = self.load_runtime().unwrap_or_default();
        runtime.settings = settings.clone();
        self.save_runtime(&runtime)
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("THERMOGUARD_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.thermoguard"));
    let store = JsonSettingsStore::new(data_dir.join("runtime.json"));

    let runtime = store.load_runtime().unwrap_or_else(|err| {
        warn!("failed to load runtime config, using defaults: {err}");
        RuntimeConfig::default()
    });

    let now_ms = monotonic_ms();
    let safety = SafetyLayer::new(LogRelayDriver, runtime.safety.clone(), now_ms);
    let engine = ControlEngine::new(runtime.control.clone(), Box::new(store), now_ms);

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("thermoguard-controller", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        control: Arc::new(Mutex::new(Control { engine, safety })),
        mqtt,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_REMOTE_TEMP,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
    ];

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
                    handle_mqtt_message(&app_state, &message.topic, &message.payload[..]).await;
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

/// The one periodic driver of the whole control path: failsafe check first,
/// then the decision cycle, every second, under a single lock.
fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let mut control = app_state.control.lock().await;
            let Control { engine, safety } = &mut *control;
            safety.tick(now_ms);
            engine.tick(now_ms, safety);
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let now_ms = monotonic_ms();
            let payload = {
                let control = app_state.control.lock().await;
                let status = control.engine.status(now_ms);
                serde_json::to_vec(&StatePayload {
                    temp: status.effective_temp,
                    target: status.target_temp,
                    mode: status.mode,
                    state: status.state,
                    failsafe: control.safety.failsafe_active(),
                })
            };

            match payload {
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

async fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {topic} ({} bytes)",
            payload.len()
        );
        return;
    }

    let Ok(message) = std::str::from_utf8(payload) else {
        warn!("dropping non-utf8 MQTT payload on topic {topic}");
        return;
    };
    let now_ms = monotonic_ms();

    match topic {
        TOPIC_SENSOR_TEMP => {
            // A payload that does not parse into a plausible reading is the
            // sensor's "invalid" signal and clears the cache.
            let reading = message
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|t| t.is_finite() && SENSOR_VALID_RANGE_F.contains(t));
            if reading.is_none() {
                warn!("invalid sensor reading: {message:?}");
            }
            let mut control = app_state.control.lock().await;
            control.engine.provide_local_temp(reading, now_ms);
        }
        TOPIC_REMOTE_TEMP => {
            if let Ok(temp) = message.trim().parse::<f32>() {
                if temp.is_finite() && SENSOR_VALID_RANGE_F.contains(&temp) {
                    let mut control = app_state.control.lock().await;
                    control.engine.provide_remote_temp(temp, now_ms);
                }
            }
        }
        TOPIC_CMD_MODE => {
            // Accept either a mode name or the legacy integer encoding.
            let mode = Mode::parse(message.trim()).or_else(|| {
                message.trim().parse::<i64>().ok().and_then(Mode::from_index)
            });
            match mode {
                Some(mode) => {
                    let mut control = app_state.control.lock().await;
                    let Control { engine, safety } = &mut *control;
                    engine.set_mode(mode, now_ms, safety);
                }
                None => warn!("ignoring invalid mode command: {message:?}"),
            }
        }
        TOPIC_CMD_TARGET => {
            match message.trim().parse::<f32>() {
                Ok(target) if (MIN_TARGET_TEMP_F..=MAX_TARGET_TEMP_F).contains(&target) => {
                    let mut control = app_state.control.lock().await;
                    control.engine.set_target(target, now_ms);
                }
                _ => warn!("ignoring invalid target command: {message:?}"),
            }
        }
        _ => {}
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now_ms = monotonic_ms();
    let control = state.control.lock().await;

    let engine = control.engine.status(now_ms);
    let safety = control.safety.snapshot();

    Json(ControllerStatus {
        mode: engine.mode,
        state: engine.state,
        target_temp: engine.target_temp,
        effective_temp: engine.effective_temp,
        using_remote: engine.using_remote,
        state_age_ms: engine.state_age_ms,
        relays: safety.relays,
        failsafe_active: safety.failsafe_active,
        uptime_sec: now_ms / 1000,
        started_at_epoch: started_at_epoch(),
    })
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let Some(mode) = Mode::parse(value) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid mode. Use OFF, HEAT, COOL, AUTO, or FAN",
        );
    };

    let now_ms = monotonic_ms();
    {
        let mut control = state.control.lock().await;
        let Control { engine, safety } = &mut *control;
        engine.set_mode(mode, now_ms, safety);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };
    if !(MIN_TARGET_TEMP_F..=MAX_TARGET_TEMP_F).contains(&target) {
        return error_response(StatusCode::BAD_REQUEST, "Target out of safe range (50-90F)");
    }

    {
        let mut control = state.control.lock().await;
        control.engine.set_target(target, monotonic_ms());
    }

    handle_get_status(State(state)).await.into_response()
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

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

fn started_at_epoch() -> i64 {
    static STARTED: OnceLock<i64> = OnceLock::new();
    *STARTED.get_or_init(|| Utc::now().timestamp())
}
