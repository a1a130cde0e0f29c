use crate::prelude::*;
use crate::tristar::{Controller, DeviceIdentity, RegisterClient};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Clone, Debug)]
pub enum ChannelData {
    Reconfigure(config::Controller),
    Shutdown,
}

pub type ClientFactory = Arc<dyn Fn(&config::Controller) -> RegisterClient + Send + Sync>;

/// Drives the controller model: one poll per tick, never two at once.
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    make_client: ClientFactory,
    controller: Controller<RegisterClient>,
    published_identity: Option<DeviceIdentity>,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self::with_client_factory(config, channels, Arc::new(RegisterClient::from_config))
    }

    pub fn with_client_factory(
        config: ConfigWrapper,
        channels: Channels,
        make_client: ClientFactory,
    ) -> Self {
        let controller = Controller::new(make_client(&config.controller()));

        Self {
            config,
            channels,
            make_client,
            controller,
            published_identity: None,
        }
    }

    pub fn controller(&self) -> &Controller<RegisterClient> {
        &self.controller
    }

    pub async fn start(&mut self) -> Result<()> {
        let mut receiver = self.channels.to_scheduler.subscribe();

        self.publish(bus::Message::for_static(&self.config.controller()));

        let mut ticker = Self::ticker(self.config.controller().poll_interval(), Instant::now());

        loop {
            let control = tokio::select! {
                _ = ticker.tick() => self.poll_watching(&mut receiver).await,
                msg = receiver.recv() => Some(msg),
            };

            match control {
                None => {}
                Some(Ok(ChannelData::Reconfigure(new))) => {
                    if self.reconfigure(new) {
                        let period = self.config.controller().poll_interval();
                        ticker = Self::ticker(period, Instant::now() + period);
                    }
                }
                Some(Ok(ChannelData::Shutdown)) => {
                    info!("scheduler received shutdown signal");
                    break;
                }
                Some(Err(RecvError::Lagged(n))) => {
                    warn!("scheduler missed {} control messages", n);
                }
                Some(Err(RecvError::Closed)) => break,
            }
        }

        info!("scheduler exiting");
        Ok(())
    }

    fn ticker(period: Duration, first: Instant) -> Interval {
        info!("Starting poll timer with interval: {}ms", period.as_millis());
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    /// Poll while listening for control messages. Shutdown abandons the poll; a
    /// reconfiguration is held back and returned once the poll has finished.
    async fn poll_watching(
        &mut self,
        receiver: &mut broadcast::Receiver<ChannelData>,
    ) -> Option<Result<ChannelData, RecvError>> {
        let mut deferred = None;

        let poll = self.poll();
        tokio::pin!(poll);

        loop {
            tokio::select! {
                _ = &mut poll => return deferred,
                msg = receiver.recv() => match msg {
                    Ok(ChannelData::Shutdown) | Err(RecvError::Closed) => {
                        info!("shutdown during poll, abandoning it");
                        return Some(msg);
                    }
                    Ok(ChannelData::Reconfigure(new)) => {
                        deferred = Some(Ok(ChannelData::Reconfigure(new)));
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("scheduler missed {} control messages", n);
                    }
                },
            }
        }
    }

    /// Run one update and publish the outcome. Returns whether the controller answered.
    pub async fn poll(&mut self) -> bool {
        debug!("update() called");

        let mut messages = Vec::new();
        let result = self.controller.update().await;

        if let Some(identity) = self.controller.identity() {
            if self.published_identity.as_ref() != Some(identity) {
                messages.extend(bus::Message::for_identity(identity));
                self.published_identity = Some(identity.clone());
            }
        }

        let connected = match result {
            Ok(measurements) => {
                messages.push(bus::Message::for_connected(true));
                messages.extend(bus::Message::for_measurements(&measurements));
                true
            }
            Err(err) => {
                warn!("update failed: {}", err);
                messages.push(bus::Message::for_connected(false));

                if err.is_link_down() && self.config.controller().reidentify_on_link_loss() {
                    self.controller.invalidate();
                }
                false
            }
        };

        self.publish(messages);
        connected
    }

    /// Apply new controller settings. Returns true if the poll interval changed.
    pub fn reconfigure(&mut self, new: config::Controller) -> bool {
        let old = self.config.controller();
        self.config.set_controller(new.clone());

        if old.connection_changed(&new) || old.read_timeout() != new.read_timeout() {
            info!("Connection settings changed - will re-initialize on next update");
            self.controller.reconfigure((self.make_client)(&new));
        }

        if old.device_instance() != new.device_instance() {
            self.publish(bus::Message::for_static(&new));
        }

        old.poll_interval() != new.poll_interval()
    }

    fn publish(&self, messages: Vec<bus::Message>) {
        if self
            .channels
            .to_bus
            .send(bus::ChannelData::Messages(messages))
            .is_err()
        {
            debug!("no bus subscribers, dropping update");
        }
    }
}
