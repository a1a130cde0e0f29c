use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_bus: broadcast::Sender<bus::ChannelData>,
    pub to_scheduler: broadcast::Sender<scheduler::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_bus: Self::channel(),
            to_scheduler: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
