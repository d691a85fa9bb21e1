use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use axum::{
    extract::{rejection::FormRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use waterlevel_common::{
    config::validate_connect_settings, AssetEntry, AssetTable, Calibration, ConnectSettings,
    NetworkConfig, NetworkMode, SensorReading, INDEX_ASSET,
};

// Receives the index asset resolved at startup.
pub type MainHandler = Arc<dyn Fn(AssetEntry) -> Response + Send + Sync>;

pub fn default_main_handler() -> MainHandler {
    Arc::new(asset_response)
}

#[derive(Clone)]
pub struct AppState {
    pub assets: Arc<AssetTable>,
    index: AssetEntry,
    main_handler: MainHandler,
    pub mode: Arc<Mutex<NetworkMode>>,
    pub network: Arc<Mutex<NetworkConfig>>,
    pub calibration: Arc<Mutex<Calibration>>,
    pub reading: Arc<Mutex<Option<SensorReading>>>,
    pub button_level: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        assets: AssetTable,
        main_handler: MainHandler,
        network: NetworkConfig,
        calibration: Calibration,
        mode: NetworkMode,
    ) -> anyhow::Result<Self> {
        let index = assets
            .resolve(INDEX_ASSET)
            .context("bundled web assets are incomplete")?;

        Ok(Self {
            assets: Arc::new(assets),
            index,
            main_handler,
            mode: Arc::new(Mutex::new(mode)),
            network: Arc::new(Mutex::new(network)),
            calibration: Arc::new(Mutex::new(calibration)),
            reading: Arc::new(Mutex::new(None)),
            button_level: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ButtonUpdate {
    pressed: bool,
}

#[derive(Debug, Serialize)]
struct ModeView {
    mode: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(handle_main))
        .route("/sensor", get(handle_get_sensor))
        .route("/connect-settings", get(handle_get_connect_settings))
        .route("/connect", post(handle_post_connect))
        .route(
            "/calibration",
            get(handle_get_calibration).post(handle_post_calibration),
        )
        .route("/api/mode", get(handle_get_mode))
        .route("/api/button", post(handle_post_button));

    // Each handler owns a copy of its entry; later duplicates are shadowed by the first.
    let mut registered = HashSet::new();
    for entry in state.assets.iter().copied() {
        if !registered.insert(entry.name()) {
            continue;
        }
        router = router.route(
            &entry.route(),
            get(move || async move { asset_response(entry) }),
        );
    }
    info!("registered {} asset routes", registered.len());

    router
        .fallback(handle_fallback)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn asset_response(entry: AssetEntry) -> Response {
    (
        [(header::CONTENT_TYPE, entry.content_type())],
        entry.content(),
    )
        .into_response()
}

async fn handle_main(State(state): State<AppState>) -> Response {
    (state.main_handler)(state.index)
}

async fn handle_fallback(State(state): State<AppState>) -> Response {
    // Captive portal: every unknown path lands on the main page while hosting the AP.
    let mode = *state.mode.lock().await;
    if mode == NetworkMode::AccessPoint {
        return (state.main_handler)(state.index);
    }
    error_response(StatusCode::NOT_FOUND, "not found")
}

async fn handle_get_sensor(State(state): State<AppState>) -> Response {
    let reading = *state.reading.lock().await;
    match reading {
        Some(reading) => Json(reading).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "no sensor reading yet"),
    }
}

async fn handle_get_connect_settings(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.network.lock().await.connect_settings();
    Json(settings)
}

async fn handle_post_connect(
    State(state): State<AppState>,
    form: Result<Form<ConnectSettings>, FormRejection>,
) -> Response {
    let Form(settings) = match form {
        Ok(form) => form,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    if let Err(err) = validate_connect_settings(&settings.ssid, &settings.password) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    {
        let mut network = state.network.lock().await;
        network.wifi_ssid = settings.ssid;
        network.wifi_pass = settings.password;
        info!("station credentials updated for `{}`", network.wifi_ssid);
    }
    *state.mode.lock().await = NetworkMode::Station;

    Redirect::to("/").into_response()
}

async fn handle_get_calibration(State(state): State<AppState>) -> impl IntoResponse {
    let calibration = *state.calibration.lock().await;
    Json(calibration)
}

async fn handle_post_calibration(
    State(state): State<AppState>,
    form: Result<Form<Calibration>, FormRejection>,
) -> Response {
    let Form(calibration) = match form {
        Ok(form) => form,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };
    if let Err(err) = calibration.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    *state.calibration.lock().await = calibration;
    info!(
        "calibration set to k={} p0={}",
        calibration.k_coeff, calibration.p_zero
    );
    Redirect::to("/").into_response()
}

async fn handle_get_mode(State(state): State<AppState>) -> impl IntoResponse {
    let mode = *state.mode.lock().await;
    Json(ModeView {
        mode: mode.as_str(),
    })
}

// Stands in for the physical button on host builds.
async fn handle_post_button(
    State(state): State<AppState>,
    Json(update): Json<ButtonUpdate>,
) -> impl IntoResponse {
    state.button_level.store(update.pressed, Ordering::Relaxed);
    StatusCode::NO_CONTENT
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    use super::*;

    const MANIFEST: &[AssetEntry] = &[
        AssetEntry::new("index.html", "text/html", b"<p>index</p>"),
        AssetEntry::new("main.js", "text/javascript", b"let x = 1;"),
        AssetEntry::new("main.js", "text/javascript", b"shadowed"),
    ];

    fn state(mode: NetworkMode) -> AppState {
        AppState::new(
            AssetTable::new(MANIFEST),
            default_main_handler(),
            NetworkConfig::default(),
            Calibration::default(),
            mode,
        )
        .unwrap()
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, String, String) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn form_request(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn serves_assets_by_name() {
        let state = state(NetworkMode::Station);

        let (status, content_type, body) = send(&state, get_request("/main.js")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/javascript");
        assert_eq!(body, "let x = 1;");

        let (_, content_type, body) = send(&state, get_request("/index.html")).await;
        assert_eq!(content_type, "text/html");
        assert_eq!(body, "<p>index</p>");
    }

    #[tokio::test]
    async fn root_serves_index() {
        let state = state(NetworkMode::Station);
        let (status, content_type, body) = send(&state, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/html");
        assert_eq!(body, "<p>index</p>");
    }

    #[tokio::test]
    async fn unknown_path_depends_on_mode() {
        let station = state(NetworkMode::Station);
        let (status, _, _) = send(&station, get_request("/generate_204")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let access_point = state(NetworkMode::AccessPoint);
        let (status, _, body) = send(&access_point, get_request("/generate_204")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<p>index</p>");
    }

    #[tokio::test]
    async fn custom_main_handler_replaces_default_page() {
        let handler: MainHandler = Arc::new(|index: AssetEntry| {
            format!("custom:{}", index.name()).into_response()
        });
        let state = AppState::new(
            AssetTable::new(MANIFEST),
            handler,
            NetworkConfig::default(),
            Calibration::default(),
            NetworkMode::Station,
        )
        .unwrap();

        let (_, _, body) = send(&state, get_request("/")).await;
        assert_eq!(body, "custom:index.html");
    }

    #[test]
    fn missing_index_is_fatal() {
        let result = AppState::new(
            AssetTable::new(&MANIFEST[1..]),
            default_main_handler(),
            NetworkConfig::default(),
            Calibration::default(),
            NetworkMode::Station,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sensor_reports_latest_reading() {
        let state = state(NetworkMode::Station);
        let (status, _, _) = send(&state, get_request("/sensor")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        *state.reading.lock().await = Some(SensorReading {
            depth: 1.5,
            depth_sd: 0.25,
            raw_pressure: 280.0,
        });
        let (status, _, body) = send(&state, get_request("/sensor")).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["depthSd"], 0.25);
    }

    #[tokio::test]
    async fn connect_stores_credentials_and_leaves_access_point() {
        let state = state(NetworkMode::AccessPoint);

        let request = form_request("/connect", "ssid=home&password=hunter2");
        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(*state.mode.lock().await, NetworkMode::Station);

        let (_, _, body) = send(&state, get_request("/connect-settings")).await;
        let settings: ConnectSettings = serde_json::from_str(&body).unwrap();
        assert_eq!(settings.ssid, "home");
        assert_eq!(settings.password, "hunter2");
    }

    #[tokio::test]
    async fn connect_rejects_blank_ssid() {
        let state = state(NetworkMode::AccessPoint);
        let (status, _, body) = send(&state, form_request("/connect", "ssid=&password=x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("ssid"));
        assert_eq!(*state.mode.lock().await, NetworkMode::AccessPoint);
    }

    #[tokio::test]
    async fn calibration_round_trip() {
        let state = state(NetworkMode::Station);

        let (status, _, _) =
            send(&state, form_request("/calibration", "kCoeff=98.5&pZero=-12")).await;
        assert_eq!(status, StatusCode::SEE_OTHER);

        let (_, _, body) = send(&state, get_request("/calibration")).await;
        let calibration: Calibration = serde_json::from_str(&body).unwrap();
        assert_eq!(calibration.k_coeff, 98.5);
        assert_eq!(calibration.p_zero, -12.0);

        let request = form_request("/calibration", "kCoeff=0&pZero=0");
        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.calibration.lock().await.k_coeff, 98.5);
    }

    #[tokio::test]
    async fn malformed_forms_get_json_errors() {
        let state = state(NetworkMode::Station);

        let request = form_request("/calibration", "kCoeff=abc&pZero=1");
        let (status, content_type, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(content_type, "application/json");
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("kCoeff"));
        assert_eq!(
            state.calibration.lock().await.k_coeff,
            Calibration::default().k_coeff
        );

        let (status, content_type, _) =
            send(&state, form_request("/connect", "password=only")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(content_type, "application/json");
    }

    #[tokio::test]
    async fn button_route_drives_simulated_input() {
        let state = state(NetworkMode::Station);
        let request = Request::builder()
            .method("POST")
            .uri("/api/button")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"pressed":true}"#))
            .unwrap();

        let (status, _, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.button_level.load(Ordering::Relaxed));
    }
}
