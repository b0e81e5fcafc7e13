use std::time::Duration;

use color_eyre::Result;
use log_buffer::LogBuffer;
use mqtt::supervisor::{SupervisorBuilder, Topics};
use protocols::mqtt::{mk_mqtt_transport, qos_from_level};
use pwm::mk_pwm_driver;
use strip::StripController;

use crate::settings::read_settings;

mod log_buffer;
mod mqtt;
mod protocols;
mod pwm;
mod settings;
mod strip;

fn init_logger() {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logger();

    let settings = read_settings()?;

    // Exporting sysfs channels sleeps while udev catches up
    let pwm_settings = settings.pwm.clone();
    let driver = tokio::task::spawn_blocking(move || mk_pwm_driver(&pwm_settings)).await??;
    let strip = StripController::new(settings.strip.name.clone(), driver);
    let transport = mk_mqtt_transport(&settings.mqtt)?;
    let log_buffer = LogBuffer::new(settings.supervisor.log_capacity);

    let mut supervisor = SupervisorBuilder::default()
        .transport(transport)
        .strip(strip)
        .log_buffer(log_buffer)
        .topics(Topics::from(&settings.mqtt))
        .qos(qos_from_level(settings.mqtt.qos)?)
        .retry_delay(Duration::from_secs(settings.supervisor.retry_delay_secs))
        .flush_interval(Duration::from_secs(settings.supervisor.flush_interval_secs))
        .build()?;

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    log::info!("Shutting down");

    Ok(())
}
