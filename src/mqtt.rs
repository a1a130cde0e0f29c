use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, QoS};
use std::sync::{Arc, Mutex};

const PUBLISH_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
    cache: Arc<Mutex<bus::Cache>>,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self {
            config,
            channels,
            cache: Arc::new(Mutex::new(bus::Cache::new())),
        }
    }

    /// Everything published so far, last value per path.
    pub fn cached(&self) -> Vec<bus::Message> {
        self.lock_cache().messages()
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, bus::Cache> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `messages` must be subscribed before anything publishes on the bus, so the
    /// static paths sent once at startup are not missed.
    pub async fn start(&self, messages: broadcast::Receiver<bus::ChannelData>) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new(
            format!("tristar-bridge-{}", c.controller().device_instance()),
            c.mqtt().host(),
            c.mqtt().port(),
        );

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 64);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop, client.clone()),
            self.sender(client, messages)
        )?;

        Ok(())
    }

    pub fn stop(&self) {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_bus.send(bus::ChannelData::Shutdown);
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        Ok(())
    }

    // drives the connection; nothing is subscribed so incoming publishes are not expected
    async fn receiver(&self, mut eventloop: EventLoop, client: AsyncClient) -> Result<()> {
        let mut shutdown = self.channels.to_bus.subscribe();

        loop {
            tokio::select! {
                msg = shutdown.recv() => {
                    if matches!(msg, Ok(bus::ChannelData::Shutdown) | Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(rumqttc::Incoming::ConnAck(_))) => {
                        info!("mqtt connected");
                        // broker may have lost our retained state
                        if let Err(e) =
                            client.try_publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
                        {
                            warn!("failed to queue online status: {}", e);
                        }
                        self.replay(client.clone());
                    }
                    Ok(_) => {} // keepalives etc
                    Err(e) => {
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                },
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    // scheduler -> mqtt
    async fn sender(
        &self,
        client: AsyncClient,
        mut receiver: broadcast::Receiver<bus::ChannelData>,
    ) -> Result<()> {
        use bus::ChannelData::*;

        loop {
            match receiver.recv().await {
                Ok(Shutdown) | Err(broadcast::error::RecvError::Closed) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagged, {} updates dropped", n);
                }
                Ok(Messages(messages)) => {
                    self.remember(&messages);
                    for message in messages {
                        self.publish(&client, &message).await;
                    }
                }
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    // publishing from inside the event loop would stall it once the request queue fills
    fn replay(&self, client: AsyncClient) {
        let cached = self.cached();
        if cached.is_empty() {
            return;
        }

        info!("republishing {} cached paths", cached.len());
        let mqtt = self.clone();
        tokio::spawn(async move {
            for message in cached {
                mqtt.publish(&client, &message).await;
            }
        });
    }

    pub fn remember(&self, messages: &[bus::Message]) {
        self.lock_cache().update(messages);
    }

    async fn publish(&self, client: &AsyncClient, message: &bus::Message) {
        let topic = self.topic(message);
        let payload = message.payload();
        debug!("publishing: {} = {}", topic, payload);

        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client
                .publish(&topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
                .await
            {
                Ok(_) => return,
                Err(err) => {
                    error!(
                        "MQTT publish failed: {:?} (attempt {}/{})",
                        err, attempt, PUBLISH_ATTEMPTS
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn topic(&self, message: &bus::Message) -> String {
        format!("{}{}", self.config.mqtt().namespace(), message.path)
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}
