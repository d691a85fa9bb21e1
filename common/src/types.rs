use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub depth: f32,
    #[serde(rename = "depthSd")]
    pub depth_sd: f32,
    #[serde(rename = "rawPressure")]
    pub raw_pressure: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectSettings {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkMode {
    Station,
    AccessPoint,
}

impl NetworkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Station => "STATION",
            Self::AccessPoint => "ACCESS_POINT",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Station => Self::AccessPoint,
            Self::AccessPoint => Self::Station,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkStatus {
    Connecting,
    Connected,
    AccessPoint,
    Offline,
}

impl LinkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::AccessPoint => "ACCESS_POINT",
            Self::Offline => "OFFLINE",
        }
    }
}
