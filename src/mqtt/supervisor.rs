use std::{convert::Infallible, time::Duration};

use color_eyre::Result;
use derive_builder::Builder;
use eyre::WrapErr;
use log::Level;
use rumqttc::QoS;
use tokio::time::MissedTickBehavior;

use super::{events::handle_command_payload, state_message::StateMessage};
use crate::{
    log_buffer::LogBuffer,
    protocols::mqtt::{Inbound, Transport},
    pwm::PwmDriver,
    settings::MqttSettings,
    strip::StripController,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    /// Incoming light commands.
    pub command: String,
    /// Retained state messages.
    pub state: String,
    /// Retained diagnostic messages.
    pub log: String,
}

impl From<&MqttSettings> for Topics {
    fn from(settings: &MqttSettings) -> Self {
        Topics {
            command: settings.topic_in.clone(),
            state: settings.topic_out.clone(),
            log: settings.topic_log.clone(),
        }
    }
}

/// Keeps the MQTT connection up for the lifetime of the process.
///
/// Each session connects, subscribes to the command topic and publishes the
/// current strip state. It then serves incoming commands and drains the log
/// buffer every `flush_interval` until anything fails, after which the
/// supervisor waits `retry_delay` and starts a new session. The strip is
/// owned here and outlives every session, so a reconnect republishes the
/// state as it was left.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct Supervisor<T, D> {
    transport: T,
    strip: StripController<D>,
    log_buffer: LogBuffer,
    topics: Topics,
    #[builder(default = "QoS::AtLeastOnce")]
    qos: QoS,
    #[builder(default = "Duration::from_secs(15)")]
    retry_delay: Duration,
    #[builder(default = "Duration::from_secs(3)")]
    flush_interval: Duration,
    #[builder(setter(skip))]
    connection: ConnectionState,
    #[builder(setter(skip))]
    reported_dropped: u64,
}

impl<T, D> SupervisorBuilder<T, D> {
    fn validate(&self) -> Result<(), String> {
        match self.flush_interval {
            Some(interval) if interval.is_zero() => {
                Err("flush interval must be greater than zero".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl<T: Transport, D: PwmDriver> Supervisor<T, D> {
    #[cfg(test)]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    fn set_connection(&mut self, connection: ConnectionState) {
        log::debug!("MQTT {:?} -> {:?}", self.connection, connection);
        self.connection = connection;
    }

    /// Runs sessions back to back, forever.
    pub async fn run(&mut self) {
        loop {
            self.set_connection(ConnectionState::Connecting);

            match self.run_session().await {
                Ok(never) => match never {},
                Err(e) => {
                    self.set_connection(ConnectionState::Disconnected);
                    self.log_buffer.report(
                        Level::Warn,
                        format!(
                            "MQTT connection failed, reconnecting in {}s: {:#}",
                            self.retry_delay.as_secs(),
                            e
                        ),
                    );
                }
            }

            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn run_session(&mut self) -> Result<Infallible> {
        log::info!("Connecting to MQTT...");
        self.transport.connect().await?;
        self.set_connection(ConnectionState::Connected);
        self.log_buffer.report(Level::Info, "Connected to MQTT");

        self.transport
            .subscribe(&self.topics.command, self.qos)
            .await?;
        self.publish_state().await?;

        // The first tick completes immediately, flushing whatever piled up
        // while we were disconnected.
        let mut flush = tokio::time::interval(self.flush_interval);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = flush.tick() => self.flush_logs().await?,
                inbound = self.transport.next_message() => self.handle_inbound(inbound?).await?,
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<()> {
        log::debug!(
            "MQTT message on {} ({} bytes, retained: {})",
            inbound.topic,
            inbound.payload.len(),
            inbound.retained
        );

        if inbound.topic != self.topics.command {
            return Ok(());
        }

        if handle_command_payload(&mut self.strip, &self.log_buffer, &inbound.payload).is_some() {
            self.publish_state().await?;
        }

        Ok(())
    }

    async fn publish_state(&mut self) -> Result<()> {
        let payload = StateMessage::from_strip(&self.strip).to_payload()?;

        self.transport
            .publish(&self.topics.state, payload, true, self.qos)
            .await
            .wrap_err("Failed to publish strip state")
    }

    async fn flush_logs(&mut self) -> Result<()> {
        if !self.log_buffer.is_empty() {
            log::debug!("Flushing {} log messages", self.log_buffer.len());
        }

        while let Some(message) = self.log_buffer.drain_one() {
            let result = self
                .transport
                .publish(&self.topics.log, message.as_bytes().to_vec(), true, self.qos)
                .await;

            if let Err(e) = result {
                self.log_buffer.requeue_front(message);
                return Err(e.wrap_err("Failed to publish log message"));
            }
        }

        let dropped = self.log_buffer.dropped();
        if dropped > self.reported_dropped {
            let notice = format!(
                "{} log messages were dropped while the buffer was full",
                dropped - self.reported_dropped
            );
            self.transport
                .publish(&self.topics.log, notice.into_bytes(), true, self.qos)
                .await
                .wrap_err("Failed to publish log message")?;
            self.reported_dropped = dropped;
        }

        Ok(())
    }
}
