use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};

use anyhow::Context;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tokio::{net::TcpListener, sync::Notify};
use tracing::{debug, info, warn};

use waterlevel_common::{
    ButtonConfig, DepthEstimator, FrontPanel, IndicatorConfig, LinkStatus, NetworkMode,
    PanelAction, RuntimeConfig, SamplingConfig, TickSource, Ticks, TOPIC_SENSOR_DEPTH,
    TOPIC_SENSOR_STATUS,
};

use crate::{
    assets,
    web::{self, AppState},
};

const CONTROL_PERIOD: Duration = Duration::from_millis(10);

struct HostClock {
    start: Instant,
    offset: Ticks,
}

impl HostClock {
    fn new(offset: Ticks) -> Self {
        Self {
            start: Instant::now(),
            offset,
        }
    }
}

impl TickSource for HostClock {
    fn now(&self) -> Ticks {
        // Truncation is the wrap.
        let millis = self.start.elapsed().as_millis() as Ticks;
        self.offset.wrapping_add(millis)
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config(&runtime_config_path())
        .await
        .unwrap_or_else(|err| {
            warn!("failed to load runtime config: {err:#}");
            RuntimeConfig::default()
        });
    apply_env_overrides(&mut runtime);

    let assets = assets::bundled();
    info!(
        "{} web assets bundled ({} bytes)",
        assets.len(),
        assets.total_bytes()
    );

    let mode = if runtime.network.has_station_credentials() {
        NetworkMode::Station
    } else {
        NetworkMode::AccessPoint
    };

    let app_state = AppState::new(
        assets,
        web::default_main_handler(),
        runtime.network.clone(),
        runtime.calibration,
        mode,
    )?;

    let mut mqtt_options = MqttOptions::new(
        "waterlevel-node-rust",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }
    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 32);

    mqtt.publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish node online status")?;

    let report_now = Arc::new(Notify::new());

    spawn_mqtt_loop(eventloop);
    spawn_sampling_loop(app_state.clone(), runtime.sampling.clone());
    spawn_publish_loop(
        app_state.clone(),
        mqtt,
        runtime.sampling.publish_interval_ms,
        report_now.clone(),
    );
    spawn_control_loop(
        app_state.clone(),
        runtime.button.clone(),
        runtime.indicator.clone(),
        report_now,
    );

    let app = web::build_router(app_state);

    let port = std::env::var("NODE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind node server at {addr}"))?;

    info!("node listening on http://{addr} in {} mode", mode.as_str());
    axum::serve(listener, app).await?;
    Ok(())
}

fn runtime_config_path() -> PathBuf {
    std::env::var("WATERLEVEL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./waterlevel.json"))
}

async fn load_runtime_config(path: &Path) -> anyhow::Result<RuntimeConfig> {
    match tokio::fs::read(path).await {
        Ok(raw) => RuntimeConfig::from_json(&raw)
            .with_context(|| format!("failed to parse {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
        network.mqtt_pass = std::env::var("MQTT_PASS").unwrap_or_default();
    }
}

fn tick_offset() -> Ticks {
    std::env::var("WATERLEVEL_TICK_OFFSET")
        .ok()
        .and_then(|value| value.parse::<Ticks>().ok())
        .unwrap_or(0)
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            if let Err(err) = eventloop.poll().await {
                warn!("node mqtt poll error: {err}");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    });
}

fn spawn_control_loop(
    app_state: AppState,
    button: ButtonConfig,
    indicator: IndicatorConfig,
    report_now: Arc<Notify>,
) {
    tokio::spawn(async move {
        let clock = HostClock::new(tick_offset());
        let level = app_state.button_level.clone();
        let input = move || level.load(Ordering::Relaxed);
        let mut panel = FrontPanel::new(input, button, indicator);
        let mut interval = tokio::time::interval(CONTROL_PERIOD);

        loop {
            interval.tick().await;

            let status = {
                let mode = *app_state.mode.lock().await;
                let network = app_state.network.lock().await;
                link_status(mode, network.has_station_credentials())
            };
            if panel.set_status(status) {
                info!("link status {}", status.as_str());
            }

            for action in panel.tick(clock.now()) {
                match action {
                    PanelAction::Led(lit) => {
                        debug!("status led {}", if lit { "on" } else { "off" })
                    }
                    PanelAction::ToggleAccessPoint => {
                        let mut mode = app_state.mode.lock().await;
                        *mode = mode.toggled();
                        info!("long press: switching to {} mode", mode.as_str());
                    }
                    PanelAction::ReportNow => {
                        info!("button press: reporting now");
                        report_now.notify_one();
                    }
                }
            }
        }
    });
}

fn link_status(mode: NetworkMode, has_credentials: bool) -> LinkStatus {
    match mode {
        NetworkMode::AccessPoint => LinkStatus::AccessPoint,
        NetworkMode::Station if has_credentials => LinkStatus::Connected,
        NetworkMode::Station => LinkStatus::Offline,
    }
}

fn spawn_sampling_loop(app_state: AppState, sampling: SamplingConfig) {
    tokio::spawn(async move {
        let mut estimator = DepthEstimator::new(sampling.window);
        let mut calibration = *app_state.calibration.lock().await;
        let mut interval =
            tokio::time::interval(Duration::from_millis(sampling.sample_interval_ms));
        let mut sample: u64 = 0;

        loop {
            interval.tick().await;
            sample = sample.wrapping_add(1);

            let current = *app_state.calibration.lock().await;
            if current != calibration {
                calibration = current;
                estimator.clear();
            }

            // Hardware integration point:
            // the ESP build reads the pressure transducer here.
            let pressure = simulated_pressure(sample);
            estimator.push(pressure, &calibration);

            let reading = estimator.reading();
            *app_state.reading.lock().await = reading;
        }
    });
}

fn simulated_pressure(sample: u64) -> f32 {
    let slow = ((sample % 400) as f32 / 400.0 * std::f32::consts::TAU).sin() * 18.0;
    let jitter = ((sample.wrapping_mul(7_919) % 13) as f32 - 6.0) * 0.15;
    250.0 + slow + jitter
}

fn spawn_publish_loop(
    app_state: AppState,
    mqtt: AsyncClient,
    publish_interval_ms: u64,
    report_now: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(publish_interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = report_now.notified() => {}
            }

            let reading = *app_state.reading.lock().await;
            let Some(reading) = reading else {
                continue;
            };

            match serde_json::to_vec(&reading) {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_SENSOR_DEPTH, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("depth publish failed: {err}");
                    }
                }
                Err(err) => warn!("depth serialization failed: {err}"),
            }
        }
    });
}
