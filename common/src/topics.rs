pub const TOPIC_SENSOR_TEMP: &str = "thermoguard/sensor/temperature";
pub const TOPIC_SENSOR_STATUS: &str = "thermoguard/sensor/status";
pub const TOPIC_REMOTE_TEMP: &str = "thermoguard/remote/temperature";

pub const TOPIC_CONTROLLER_STATE: &str = "thermoguard/controller/state";

pub const TOPIC_CMD_MODE: &str = "thermoguard/cmnd/mode";
pub const TOPIC_CMD_TARGET: &str = "thermoguard/cmnd/target";
