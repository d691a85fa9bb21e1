pub const TOPIC_SENSOR_DEPTH: &str = "waterlevel/sensor/depth";
pub const TOPIC_SENSOR_STATUS: &str = "waterlevel/sensor/status";
