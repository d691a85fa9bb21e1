use core::convert::TryInto;
use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::QoS,
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{AnyIOPin, Gpio34, Input, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::prelude::Peripherals,
    http::server::{
        Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request,
    },
    ipv4::{Configuration as IpConfiguration, Mask, RouterConfiguration, Subnet},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    netif::{EspNetif, NetifConfiguration},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use waterlevel_common::{
    config::validate_connect_settings, has_elapsed, ActiveLow, AssetEntry, AssetTable,
    Calibration, ConnectSettings, DepthEstimator, DigitalInput, FrontPanel, LinkStatus,
    NetworkConfig, NetworkMode, PanelAction, RuntimeConfig, SensorReading, TickSource, Ticks,
    INDEX_ASSET, TOPIC_SENSOR_DEPTH, TOPIC_SENSOR_STATUS,
};

use crate::assets;

const AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
const CONTROL_PERIOD: Duration = Duration::from_millis(10);
const MAX_HTTP_BODY: usize = 1024;
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(90);
const WIFI_CONNECT_ATTEMPTS: u32 = 3;
const WIFI_RETRY_DELAY_MS: u64 = 1_000;

struct EspClock;

impl TickSource for EspClock {
    fn now(&self) -> Ticks {
        let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
        (micros / 1000) as Ticks
    }
}

struct ButtonPin(PinDriver<'static, AnyIOPin, Input>);

impl DigitalInput for ButtonPin {
    fn is_high(&mut self) -> bool {
        self.0.is_high()
    }
}

struct PressureInput {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
}

impl PressureInput {
    fn new(adc: ADC1, pin: Gpio34) -> anyhow::Result<Self> {
        let adc = AdcDriver::new(adc)?;
        let config = AdcChannelConfig {
            attenuation: DB_11,
            ..Default::default()
        };
        Ok(Self {
            channel: AdcChannelDriver::new(adc, pin, &config)?,
        })
    }

    fn sample(&mut self) -> anyhow::Result<f32> {
        Ok(self.channel.read()? as f32)
    }
}

#[derive(Debug)]
struct NodeState {
    network: NetworkConfig,
    calibration: Calibration,
    reading: Option<SensorReading>,
    mode: NetworkMode,
    requested_mode: Option<NetworkMode>,
}

type SharedState = Arc<Mutex<NodeState>>;

fn lock_state(state: &SharedState) -> anyhow::Result<MutexGuard<'_, NodeState>> {
    state.lock().map_err(|_| anyhow!("node state lock poisoned"))
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let runtime = build_runtime_config();
    let assets = assets::bundled();
    info!(
        "{} web assets bundled ({} bytes)",
        assets.len(),
        assets.total_bytes()
    );

    let sys_loop = EspSystemEventLoop::take()?;
    let peripherals = Peripherals::take()?;

    // SAFETY: the configured pins are claimed nowhere else.
    let button_pin = unsafe { AnyIOPin::new(runtime.button.pin) };
    let led_pin = unsafe { AnyIOPin::new(runtime.indicator.led_pin) };

    let mut button = PinDriver::input(button_pin)?;
    button.set_pull(if runtime.button.active_low {
        Pull::Up
    } else {
        Pull::Down
    })?;
    let led = PinDriver::output(led_pin)?;
    let pressure = PressureInput::new(peripherals.adc1, peripherals.pins.gpio34)
        .context("failed to initialize pressure input")?;

    let mut esp_wifi = EspWifi::new(peripherals.modem, sys_loop.clone(), None)?;
    esp_wifi
        .swap_netif_ap(EspNetif::new_with_conf(&access_point_netif()?)?)
        .context("failed to configure access point address")?;
    let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let mode = if runtime.network.has_station_credentials() {
        NetworkMode::Station
    } else {
        NetworkMode::AccessPoint
    };
    let state: SharedState = Arc::new(Mutex::new(NodeState {
        network: runtime.network.clone(),
        calibration: runtime.calibration,
        reading: None,
        mode,
        requested_mode: Some(mode),
    }));

    let server = create_http_server(&assets, state.clone())?;

    let (mqtt, mut conn) = create_mqtt_client(&runtime)?;
    thread::Builder::new()
        .name("mqtt-poll".to_string())
        .stack_size(8192)
        .spawn(move || loop {
            if let Err(err) = conn.next() {
                warn!("node mqtt poll error: {err:?}");
                thread::sleep(Duration::from_secs(2));
            }
        })
        .context("failed to spawn mqtt thread")?;

    let watchdog = TaskWatchdog::subscribe(WATCHDOG_TIMEOUT)?;

    let node = Node {
        state,
        runtime,
        wifi,
        led,
        pressure,
        mqtt,
        watchdog,
        online_announced: false,
    };

    // Keep the server alive for the program lifetime.
    let _server = server;
    if node.runtime.button.active_low {
        node.control_loop(ActiveLow(ButtonPin(button)))
    } else {
        node.control_loop(ButtonPin(button))
    }
}

struct Node {
    state: SharedState,
    runtime: RuntimeConfig,
    wifi: BlockingWifi<EspWifi<'static>>,
    led: PinDriver<'static, AnyIOPin, Output>,
    pressure: PressureInput,
    mqtt: EspMqttClient<'static>,
    watchdog: TaskWatchdog,
    online_announced: bool,
}

impl Node {
    fn control_loop<P: DigitalInput>(mut self, button: P) -> anyhow::Result<()> {
        let clock = EspClock;
        let mut panel = FrontPanel::new(
            button,
            self.runtime.button.clone(),
            self.runtime.indicator.clone(),
        );
        let mut estimator = DepthEstimator::new(self.runtime.sampling.window);
        let mut calibration = self.runtime.calibration;
        let sample_span = self.runtime.sampling.sample_interval_ms as Ticks;
        let publish_span = self.runtime.sampling.publish_interval_ms as Ticks;

        let start = clock.now();
        let mut last_sample = start;
        let mut last_publish = start;

        loop {
            self.watchdog.feed();

            let requested = lock_state(&self.state)?.requested_mode.take();
            if let Some(mode) = requested {
                // The connect attempt blocks this loop, so hold the LED lit meanwhile.
                panel.set_status(LinkStatus::Connecting);
                self.led.set_high()?;
                let status = self.apply_mode(mode);
                lock_state(&self.state)?.mode = mode;
                panel.set_status(status);
                info!("link status {}", status.as_str());
            }

            let now = clock.now();
            let mut report_now = false;
            for action in panel.tick(now) {
                match action {
                    PanelAction::Led(true) => self.led.set_high()?,
                    PanelAction::Led(false) => self.led.set_low()?,
                    PanelAction::ToggleAccessPoint => {
                        let mut state = lock_state(&self.state)?;
                        let next = state.mode.toggled();
                        info!("long press: switching to {} mode", next.as_str());
                        state.requested_mode = Some(next);
                    }
                    PanelAction::ReportNow => {
                        info!("button press: reporting now");
                        report_now = true;
                    }
                }
            }

            if has_elapsed(now, last_sample, sample_span) {
                last_sample = now;
                let current = lock_state(&self.state)?.calibration;
                if current != calibration {
                    calibration = current;
                    estimator.clear();
                }
                match self.pressure.sample() {
                    Ok(pressure) => estimator.push(pressure, &calibration),
                    Err(err) => warn!("pressure read failed: {err:#}"),
                }
                lock_state(&self.state)?.reading = estimator.reading();
            }

            if report_now || has_elapsed(now, last_publish, publish_span) {
                last_publish = now;
                if panel.status() == Some(LinkStatus::Connected) {
                    self.publish_reading();
                }
            }

            thread::sleep(CONTROL_PERIOD);
        }
    }

    fn apply_mode(&mut self, mode: NetworkMode) -> LinkStatus {
        let network = match lock_state(&self.state) {
            Ok(state) => state.network.clone(),
            Err(err) => {
                warn!("{err:#}");
                return LinkStatus::Offline;
            }
        };

        if let Ok(true) = self.wifi.is_started() {
            if let Err(err) = self.wifi.stop() {
                warn!("wifi stop failed: {err:#}");
            }
        }

        let result = match mode {
            NetworkMode::AccessPoint => {
                start_access_point(&mut self.wifi, &network).map(|()| LinkStatus::AccessPoint)
            }
            NetworkMode::Station if !network.has_station_credentials() => {
                warn!("wifi credentials missing; staying offline");
                Ok(LinkStatus::Offline)
            }
            NetworkMode::Station => connect_station(&mut self.wifi, &network, &self.watchdog),
        };

        match result {
            Ok(status) => status,
            Err(err) => {
                warn!("wifi {} startup failed: {err:#}", mode.as_str());
                LinkStatus::Offline
            }
        }
    }

    fn publish_reading(&mut self) {
        if !self.online_announced {
            match self
                .mqtt
                .publish(TOPIC_SENSOR_STATUS, QoS::AtLeastOnce, true, b"online")
            {
                Ok(_) => self.online_announced = true,
                Err(err) => warn!("failed to publish node online status: {err:?}"),
            }
        }

        let reading = match lock_state(&self.state) {
            Ok(state) => state.reading,
            Err(err) => {
                warn!("{err:#}");
                return;
            }
        };
        let Some(reading) = reading else {
            return;
        };

        match serde_json::to_vec(&reading) {
            Ok(body) => {
                if let Err(err) = self
                    .mqtt
                    .publish(TOPIC_SENSOR_DEPTH, QoS::AtLeastOnce, true, &body)
                {
                    warn!("failed to publish depth: {err:?}");
                }
            }
            Err(err) => warn!("depth serialization failed: {err}"),
        }
    }
}

fn build_runtime_config() -> RuntimeConfig {
    let mut runtime = RuntimeConfig::default();
    let network = &mut runtime.network;

    if let Some(ssid) = option_env!("WATERLEVEL_WIFI_SSID") {
        network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WATERLEVEL_WIFI_PASS") {
        network.wifi_pass = pass.to_string();
    }
    if let Some(host) = option_env!("MQTT_HOST") {
        network.mqtt_host = host.to_string();
    }
    if let Some(port) = option_env!("MQTT_PORT").and_then(|value| value.parse().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = option_env!("MQTT_USER") {
        network.mqtt_user = user.to_string();
        network.mqtt_pass = option_env!("MQTT_PASS").unwrap_or_default().to_string();
    }

    runtime.sanitize();
    runtime
}

fn access_point_netif() -> anyhow::Result<NetifConfiguration> {
    let mut conf = NetifConfiguration::wifi_default_router();
    conf.key = "WIFI_AP_PORTAL"
        .try_into()
        .map_err(|_| anyhow!("netif key too long"))?;
    conf.ip_configuration = Some(IpConfiguration::Router(RouterConfiguration {
        subnet: Subnet {
            gateway: AP_ADDRESS,
            mask: Mask(24),
        },
        dhcp_enabled: true,
        dns: Some(AP_ADDRESS),
        secondary_dns: None,
    }));
    Ok(conf)
}

fn start_access_point(
    wifi: &mut BlockingWifi<EspWifi<'static>>,
    network: &NetworkConfig,
) -> anyhow::Result<()> {
    let auth_method = if network.ap_password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: network
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point SSID too long"))?,
        password: network
            .ap_password
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("access point password too long"))?,
        auth_method,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;
    info!("access point `{}` up at {AP_ADDRESS}", network.ap_ssid);
    Ok(())
}

fn connect_station(
    wifi: &mut BlockingWifi<EspWifi<'static>>,
    network: &NetworkConfig,
    watchdog: &TaskWatchdog,
) -> anyhow::Result<LinkStatus> {
    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        watchdog.feed();
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                return Ok(LinkStatus::Connected);
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}")
            }
        }
        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    Ok(LinkStatus::Offline)
}

fn create_http_server(
    assets: &AssetTable,
    state: SharedState,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&conf)?;

    let index = assets
        .resolve(INDEX_ASSET)
        .context("bundled web assets are incomplete")?;

    server.fn_handler("/", Method::Get, move |req| write_asset(req, index))?;

    {
        let state = state.clone();
        server.fn_handler("/sensor", Method::Get, move |req| {
            let reading = lock_state(&state)?.reading;
            match reading {
                Some(reading) => write_json(req, &reading),
                None => write_error(req, 503, "no sensor reading yet"),
            }
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/connect-settings", Method::Get, move |req| {
            let settings = lock_state(&state)?.network.connect_settings();
            write_json(req, &settings)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/connect", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let settings: ConnectSettings = match serde_urlencoded::from_bytes(&body) {
                Ok(settings) => settings,
                Err(err) => return write_error(req, 400, &err.to_string()),
            };
            if let Err(err) = validate_connect_settings(&settings.ssid, &settings.password) {
                return write_error(req, 400, &err.to_string());
            }

            {
                let mut state = lock_state(&state)?;
                state.network.wifi_ssid = settings.ssid;
                state.network.wifi_pass = settings.password;
                state.requested_mode = Some(NetworkMode::Station);
                info!("station credentials updated for `{}`", state.network.wifi_ssid);
            }
            redirect_home(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/calibration", Method::Get, move |req| {
            let calibration = lock_state(&state)?.calibration;
            write_json(req, &calibration)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/calibration", Method::Post, move |mut req| {
            let body = read_request_body(&mut req)?;
            let calibration: Calibration = match serde_urlencoded::from_bytes(&body) {
                Ok(calibration) => calibration,
                Err(err) => return write_error(req, 400, &err.to_string()),
            };
            if let Err(err) = calibration.validate() {
                return write_error(req, 400, &err.to_string());
            }

            lock_state(&state)?.calibration = calibration;
            info!(
                "calibration set to k={} p0={}",
                calibration.k_coeff, calibration.p_zero
            );
            redirect_home(req)
        })?;
    }

    // First entry wins for duplicate names; later ones would never be reached.
    let mut registered = Vec::new();
    for entry in assets.iter().copied() {
        if registered.contains(&entry.name()) {
            continue;
        }
        registered.push(entry.name());
        server.fn_handler(&entry.route(), Method::Get, move |req| write_asset(req, entry))?;
    }
    info!("registered {} asset routes", registered.len());

    // Registered last so every concrete route above takes precedence.
    server.fn_handler("/*", Method::Get, move |req| {
        let mode = lock_state(&state)?.mode;
        if mode == NetworkMode::AccessPoint {
            write_asset(req, index)
        } else {
            write_error(req, 404, "not found")
        }
    })?;

    Ok(server)
}

fn read_request_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_asset(req: Request<&mut EspHttpConnection<'_>>, entry: AssetEntry) -> anyhow::Result<()> {
    req.into_response(200, Some("OK"), &[("Content-Type", entry.content_type())])?
        .write_all(entry.content())?;
    Ok(())
}

fn write_json<T: Serialize>(
    req: Request<&mut EspHttpConnection<'_>>,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: Request<&mut EspHttpConnection<'_>>,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn redirect_home(req: Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<()> {
    req.into_response(303, Some("See Other"), &[("Location", "/")])?;
    Ok(())
}

fn create_mqtt_client(
    runtime: &RuntimeConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!(
        "mqtt://{}:{}",
        runtime.network.mqtt_host, runtime.network.mqtt_port
    );

    let conf = MqttClientConfiguration {
        client_id: Some("waterlevel-node"),
        username: if runtime.network.mqtt_user.is_empty() {
            None
        } else {
            Some(runtime.network.mqtt_user.as_str())
        },
        password: if runtime.network.mqtt_pass.is_empty() {
            None
        } else {
            Some(runtime.network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(&url, &conf)?)
}

// Subscribes the control loop task to the ESP task watchdog. Both calls accept an already
// initialised watchdog or an already subscribed task.
struct TaskWatchdog;

impl TaskWatchdog {
    fn subscribe(timeout: Duration) -> anyhow::Result<Self> {
        use esp_idf_svc::sys::{
            esp_task_wdt_add, esp_task_wdt_config_t, esp_task_wdt_init, ESP_ERR_INVALID_STATE,
            ESP_OK,
        };

        let config = esp_task_wdt_config_t {
            timeout_ms: timeout.as_millis() as u32,
            idle_core_mask: 0,
            trigger_panic: true,
        };
        match unsafe { esp_task_wdt_init(&config) } {
            ESP_OK | ESP_ERR_INVALID_STATE => {}
            rc => return Err(anyhow!("watchdog init failed with code {rc}")),
        }
        match unsafe { esp_task_wdt_add(core::ptr::null_mut()) } {
            ESP_OK | ESP_ERR_INVALID_STATE => Ok(Self),
            rc => Err(anyhow!("watchdog subscribe failed with code {rc}")),
        }
    }

    fn feed(&self) {
        let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
    }
}
