use std::{future::Future, time::Duration};

use color_eyre::Result;
use eyre::{eyre, WrapErr};
use rumqttc::{AsyncClient, ConnectionError, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver},
    task::JoinHandle,
};

use crate::settings::MqttSettings;

/// Size of the rumqttc request queue between client handle and event loop.
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// A message delivered on one of the subscribed topics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retained: bool,
}

/// The operations the bridge needs from a publish/subscribe connection.
///
/// `next_message` must be cancel safe: it is raced against the log flush
/// timer and may be dropped before completing. An `Err` from any method means
/// the connection is unusable until the next successful `connect`.
pub trait Transport {
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> impl Future<Output = Result<()>> + Send;

    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> impl Future<Output = Result<()>> + Send;

    fn next_message(&mut self) -> impl Future<Output = Result<Inbound>> + Send;
}

pub fn qos_from_level(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        _ => Err(eyre!("Invalid MQTT QoS level {}, expected 0, 1 or 2", level)),
    }
}

pub fn mk_mqtt_options(settings: &MqttSettings) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(
        settings.id.clone(),
        settings.host.clone(),
        settings.port,
    );
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));

    if let Some(user) = &settings.user {
        options.set_credentials(user, settings.password.clone().unwrap_or_default());
    }

    // The broker publishes this for us if we drop off without disconnecting
    options.set_last_will(LastWill::new(
        settings.topic_offline.clone(),
        settings.offline_message.clone(),
        qos_from_level(settings.qos)?,
        true,
    ));

    Ok(options)
}

/// [`Transport`] backed by a rumqttc client.
///
/// Every `connect` starts a fresh client and event loop. Once the broker has
/// acknowledged the connection, the event loop is driven by a background task
/// that forwards incoming publishes, and finally the error that ended the
/// connection, to `next_message`.
pub struct RumqttTransport {
    options: MqttOptions,
    client: Option<AsyncClient>,
    inbound: Option<UnboundedReceiver<Result<Inbound, ConnectionError>>>,
    poll_task: Option<JoinHandle<()>>,
}

pub fn mk_mqtt_transport(settings: &MqttSettings) -> Result<RumqttTransport> {
    Ok(RumqttTransport {
        options: mk_mqtt_options(settings)?,
        client: None,
        inbound: None,
        poll_task: None,
    })
}

impl RumqttTransport {
    fn close(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.client = None;
        self.inbound = None;
    }

    fn client(&self) -> Result<&AsyncClient> {
        self.client
            .as_ref()
            .ok_or_else(|| eyre!("MQTT client is not connected"))
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for RumqttTransport {
    async fn connect(&mut self) -> Result<()> {
        self.close();

        let (client, mut eventloop) =
            AsyncClient::new(self.options.clone(), REQUEST_QUEUE_CAPACITY);

        loop {
            let event = eventloop.poll().await.wrap_err_with(|| {
                let (host, port) = self.options.broker_address();
                format!("Failed to connect to {}:{}", host, port)
            })?;

            if let Event::Incoming(Packet::ConnAck(_)) = event {
                break;
            }
        }

        // Unbounded so the event loop never waits on us while we wait on it
        // to accept a publish request.
        let (tx, rx) = unbounded_channel();

        let poll_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(msg))) => {
                        let inbound = Inbound {
                            topic: msg.topic,
                            payload: msg.payload.to_vec(),
                            retained: msg.retain,
                        };

                        if tx.send(Ok(inbound)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        self.client = Some(client);
        self.inbound = Some(rx);
        self.poll_task = Some(poll_task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<()> {
        self.client()?
            .subscribe(topic, qos)
            .await
            .wrap_err_with(|| format!("Failed to subscribe to {}", topic))?;

        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
        qos: QoS,
    ) -> Result<()> {
        self.client()?
            .publish(topic, qos, retain, payload)
            .await
            .wrap_err_with(|| format!("Failed to publish to {}", topic))?;

        Ok(())
    }

    async fn next_message(&mut self) -> Result<Inbound> {
        let inbound = self
            .inbound
            .as_mut()
            .ok_or_else(|| eyre!("MQTT client is not connected"))?;

        match inbound.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(eyre!(e).wrap_err("MQTT connection lost")),
            None => Err(eyre!("MQTT event loop stopped")),
        }
    }
}
