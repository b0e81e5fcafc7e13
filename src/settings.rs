use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct MqttSettings {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub qos: u8,
    pub topic_in: String,
    pub topic_out: String,
    pub topic_log: String,
    pub topic_offline: String,
    pub offline_message: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct StripSettings {
    pub name: String,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PwmBackend {
    /// Only logs duty writes, for running without PWM hardware.
    Log,
    Sysfs,
}

#[derive(Clone, Deserialize, Debug)]
pub struct PwmSettings {
    pub backend: PwmBackend,
    pub chip: u32,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub frequency_hz: u32,
}

#[derive(Clone, Deserialize, Debug)]
pub struct SupervisorSettings {
    pub retry_delay_secs: u64,
    pub flush_interval_secs: u64,
    pub log_capacity: usize,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub strip: StripSettings,
    pub pwm: PwmSettings,
    pub supervisor: SupervisorSettings,
}

type Builder = config::ConfigBuilder<config::builder::DefaultState>;

fn builder_with_defaults() -> Result<Builder, config::ConfigError> {
    config::Config::builder()
        .set_default("mqtt.id", "rgb-mqtt")?
        .set_default("mqtt.port", 1883)?
        .set_default("mqtt.keep_alive_secs", 10)?
        .set_default("mqtt.qos", 1)?
        .set_default("mqtt.topic_in", "home/led_strip/in")?
        .set_default("mqtt.topic_out", "home/led_strip/out")?
        .set_default("mqtt.topic_log", "home/led_strip/logs")?
        .set_default("mqtt.topic_offline", "home/led_strip/offline")?
        .set_default("mqtt.offline_message", "0")?
        .set_default("strip.name", "led_strip")?
        .set_default("pwm.backend", "log")?
        .set_default("pwm.chip", 0)?
        .set_default("pwm.red", 0)?
        .set_default("pwm.green", 1)?
        .set_default("pwm.blue", 2)?
        .set_default("pwm.frequency_hz", 1000)?
        .set_default("supervisor.retry_delay_secs", 15)?
        .set_default("supervisor.flush_interval_secs", 3)?
        .set_default("supervisor.log_capacity", 256)
}

impl Settings {
    fn validate(self) -> Result<Self, config::ConfigError> {
        if self.supervisor.log_capacity == 0 {
            return Err(config::ConfigError::Message(
                "supervisor.log_capacity must be greater than zero".to_string(),
            ));
        }

        if self.supervisor.flush_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "supervisor.flush_interval_secs must be greater than zero".to_string(),
            ));
        }

        Ok(self)
    }
}

pub fn read_settings() -> Result<Settings, config::ConfigError> {
    builder_with_defaults()?
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(
            config::Environment::with_prefix("RGB_MQTT")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?
        .try_deserialize::<Settings>()?
        .validate()
}
