pub mod assets;
pub mod blink;
pub mod button;
pub mod config;
pub mod indicator;
pub mod panel;
pub mod sensor;
pub mod tick;
pub mod topics;
pub mod types;

pub use assets::{content_type_for_name, AssetEntry, AssetError, AssetTable, INDEX_ASSET};
pub use blink::{BlinkPattern, BlinkPhase};
pub use button::{ActiveLow, Button, DigitalInput};
pub use config::{
    BlinkSpans, ButtonConfig, ConfigError, IndicatorConfig, NetworkConfig, RuntimeConfig,
    SamplingConfig,
};
pub use indicator::StatusIndicator;
pub use panel::{FrontPanel, PanelAction};
pub use sensor::{Calibration, DepthEstimator};
pub use tick::{elapsed, has_elapsed, TickSource, Ticks};
pub use topics::*;
pub use types::{ConnectSettings, LinkStatus, NetworkMode, SensorReading};
