use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    sensor::Calibration,
    tick::Ticks,
    types::{ConnectSettings, LinkStatus},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: f32,
        max: f32,
    },
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} must be at most {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub ap_ssid: String,
    pub ap_password: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            ap_ssid: "WaterLevel-RX".to_string(),
            ap_password: "waterlevel".to_string(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

impl NetworkConfig {
    pub fn has_station_credentials(&self) -> bool {
        !self.wifi_ssid.trim().is_empty()
    }

    pub fn connect_settings(&self) -> ConnectSettings {
        ConnectSettings {
            ssid: self.wifi_ssid.clone(),
            password: self.wifi_pass.clone(),
        }
    }
}

pub fn validate_connect_settings(ssid: &str, password: &str) -> Result<(), ConfigError> {
    if ssid.trim().is_empty() {
        return Err(ConfigError::Empty("ssid"));
    }
    if ssid.len() > 32 {
        return Err(ConfigError::TooLong {
            field: "ssid",
            max: 32,
        });
    }
    if password.len() > 64 {
        return Err(ConfigError::TooLong {
            field: "password",
            max: 64,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlinkSpans {
    pub on_ms: Ticks,
    pub off_ms: Ticks,
}

impl BlinkSpans {
    pub const fn new(on_ms: Ticks, off_ms: Ticks) -> Self {
        Self { on_ms, off_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub led_pin: i32,
    pub connecting: BlinkSpans,
    pub connected: BlinkSpans,
    pub access_point: BlinkSpans,
    pub offline: BlinkSpans,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            led_pin: 2,
            connecting: BlinkSpans::new(200, 200),
            connected: BlinkSpans::new(50, 2_950),
            access_point: BlinkSpans::new(1_000, 250),
            // Solid on.
            offline: BlinkSpans::new(1, 0),
        }
    }
}

impl IndicatorConfig {
    pub fn spans_for(&self, status: LinkStatus) -> BlinkSpans {
        match status {
            LinkStatus::Connecting => self.connecting,
            LinkStatus::Connected => self.connected,
            LinkStatus::AccessPoint => self.access_point,
            LinkStatus::Offline => self.offline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub pin: i32,
    pub active_low: bool,
    pub press_ms: Ticks,
    pub long_press_ms: Ticks,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            pin: 0,
            active_low: true,
            press_ms: 50,
            long_press_ms: 2_000,
        }
    }
}

impl ButtonConfig {
    pub fn sanitize(&mut self) {
        if self.pin < 0 {
            self.pin = 0;
        }
        self.press_ms = self.press_ms.clamp(10, 1_000);
        if self.long_press_ms <= self.press_ms {
            self.long_press_ms = Ticks::max(2_000, self.press_ms + 1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub sample_interval_ms: u64,
    pub publish_interval_ms: u64,
    pub window: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 250,
            publish_interval_ms: 30_000,
            window: 20,
        }
    }
}

impl SamplingConfig {
    pub fn sanitize(&mut self) {
        self.sample_interval_ms = self.sample_interval_ms.clamp(50, 60_000);
        self.publish_interval_ms = self.publish_interval_ms.clamp(1_000, 3_600_000);
        self.window = self.window.clamp(1, 500);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub calibration: Calibration,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub button: ButtonConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl RuntimeConfig {
    pub fn from_json(raw: &[u8]) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_slice(raw)?;
        config.sanitize();
        Ok(config)
    }

    pub fn sanitize(&mut self) {
        self.calibration.sanitize();
        self.button.sanitize();
        self.sampling.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let raw = br#"{
            "button": { "pin": 4, "active_low": false, "press_ms": 30, "long_press_ms": 3000 }
        }"#;
        let config = RuntimeConfig::from_json(raw).unwrap();

        assert_eq!(config.button.pin, 4);
        assert_eq!(config.button.long_press_ms, 3_000);
        assert_eq!(config.indicator, IndicatorConfig::default());
        assert_eq!(config.sampling, SamplingConfig::default());
        assert_eq!(config.network.mqtt_port, 1883);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            RuntimeConfig::from_json(b"{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn sanitize_repairs_button_spans() {
        let mut button = ButtonConfig {
            pin: -3,
            active_low: false,
            press_ms: 0,
            long_press_ms: 5,
        };
        button.sanitize();

        assert_eq!(button.pin, 0);
        assert_eq!(button.press_ms, 10);
        assert_eq!(button.long_press_ms, 2_000);
    }

    #[test]
    fn sanitize_clamps_sampling() {
        let mut sampling = SamplingConfig {
            sample_interval_ms: 1,
            publish_interval_ms: u64::MAX,
            window: 0,
        };
        sampling.sanitize();

        assert_eq!(sampling.sample_interval_ms, 50);
        assert_eq!(sampling.publish_interval_ms, 3_600_000);
        assert_eq!(sampling.window, 1);
    }

    #[test]
    fn indicator_spans_per_status() {
        let indicator = IndicatorConfig::default();
        assert_eq!(indicator.spans_for(LinkStatus::Offline), BlinkSpans::new(1, 0));
        assert_eq!(indicator.spans_for(LinkStatus::Connecting), indicator.connecting);
    }

    #[test]
    fn connect_settings_validation() {
        assert!(validate_connect_settings("home", "secret").is_ok());
        assert!(validate_connect_settings("home", "").is_ok());
        assert!(matches!(
            validate_connect_settings("  ", "x"),
            Err(ConfigError::Empty("ssid"))
        ));
        assert!(validate_connect_settings(&"s".repeat(33), "x").is_err());
        assert!(validate_connect_settings("home", &"p".repeat(65)).is_err());
    }
}
