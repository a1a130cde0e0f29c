use crate::config;
use crate::error::{AttemptError, Error};

use {
    async_trait::async_trait,
    log::{debug, error, warn},
    std::{sync::Arc, time::Duration},
    tokio::time::{timeout_at, Instant},
    tokio_modbus::{
        client::{tcp, Context},
        prelude::{Client, Reader, Slave},
    },
};

/// Read attempts per block before the link is declared down.
pub const ATTEMPTS: u32 = 5;

/// Source of raw register words, as seen by the controller model.
///
/// A successful `read_block` returns exactly `count` words; the controller rejects
/// anything else with [`Error::ShortBlock`].
#[async_trait]
pub trait RegisterReader: Send + Sync {
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>, Error>;
}

/// Opens one connection per read attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Link>, AttemptError>;

    fn describe(&self) -> String;
}

/// A single open connection to the controller.
#[async_trait]
pub trait Link: Send {
    async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, AttemptError>;

    async fn close(&mut self);
}

// ModbusTcp {{{
#[derive(Clone, Debug)]
pub struct ModbusTcp {
    host: String,
    port: u16,
    unit_id: u8,
}

impl ModbusTcp {
    pub fn new(controller: &config::Controller) -> Self {
        Self {
            host: controller.host().to_owned(),
            port: controller.port(),
            unit_id: controller.unit_id(),
        }
    }
}

#[async_trait]
impl Connector for ModbusTcp {
    async fn connect(&self) -> Result<Box<dyn Link>, AttemptError> {
        let addr = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(AttemptError::Connect)?
            .next()
            .ok_or_else(|| {
                AttemptError::Connect(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} did not resolve to any address", self.host),
                ))
            })?;

        let ctx = tcp::connect_slave(addr, Slave(self.unit_id))
            .await
            .map_err(AttemptError::Connect)?;

        Ok(Box::new(ModbusLink(ctx)))
    }

    fn describe(&self) -> String {
        format!("{}:{} unit {}", self.host, self.port, self.unit_id)
    }
}

struct ModbusLink(Context);

#[async_trait]
impl Link for ModbusLink {
    async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>, AttemptError> {
        match self.0.read_input_registers(start, count).await {
            Ok(Ok(words)) => Ok(words),
            Ok(Err(exception)) => Err(AttemptError::Exception(exception.to_string())),
            Err(err) => Err(AttemptError::Transport(err.to_string())),
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.0.disconnect().await {
            debug!("error closing modbus connection: {}", err);
        }
    }
} // }}}

// RegisterClient {{{
/// Connect, read, close; retried from scratch up to [`ATTEMPTS`] times with no delay.
#[derive(Clone)]
pub struct RegisterClient {
    connector: Arc<dyn Connector>,
    timeout: Duration,
}

impl RegisterClient {
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        Self { connector, timeout }
    }

    pub fn from_config(controller: &config::Controller) -> Self {
        Self::new(Arc::new(ModbusTcp::new(controller)), controller.read_timeout())
    }

    /// One connect, read and close, all inside a single `timeout` budget.
    async fn attempt(&self, start: u16, count: u16) -> Result<Vec<u16>, AttemptError> {
        let deadline = Instant::now() + self.timeout;

        let mut link = match timeout_at(deadline, self.connector.connect()).await {
            Ok(link) => link?,
            Err(_) => return Err(AttemptError::Timeout(self.timeout)),
        };

        let result = match timeout_at(deadline, link.read_input_registers(start, count)).await {
            Ok(result) => result,
            Err(_) => Err(AttemptError::Timeout(self.timeout)),
        };

        // past the deadline this still gets one poll, enough for a close that does
        // not block; otherwise dropping the link closes the socket
        if timeout_at(deadline, link.close()).await.is_err() {
            debug!("timed out closing connection to {}", self.connector.describe());
        }
        drop(link);

        let words = result?;
        if words.len() != count as usize {
            return Err(AttemptError::ShortRead {
                expected: count,
                got: words.len(),
            });
        }

        Ok(words)
    }
}

#[async_trait]
impl RegisterReader for RegisterClient {
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>, Error> {
        let mut attempt = 1;

        loop {
            match self.attempt(start, count).await {
                Ok(words) => return Ok(words),
                Err(err) if attempt < ATTEMPTS => {
                    warn!(
                        "{}: reading {}+{} failed, retry {}/{}: {}",
                        self.connector.describe(),
                        start,
                        count,
                        attempt,
                        ATTEMPTS,
                        err
                    );
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "{}: reading {}+{} failed after {} attempts: {}",
                        self.connector.describe(),
                        start,
                        count,
                        ATTEMPTS,
                        err
                    );
                    return Err(Error::LinkDown {
                        start,
                        count,
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }
} // }}}
