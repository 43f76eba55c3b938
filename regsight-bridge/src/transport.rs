//! Register reads over Modbus, and the registry of named hubs.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, HubConfig, RegisterType};

/// Why a register read produced no data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// The link could not be opened, timed out, or broke mid-request.
    #[error("Connection failed: {0}")]
    Connectivity(String),
    /// The device answered with a Modbus exception or a malformed reply.
    #[error("Modbus exception: {0}")]
    Protocol(String),
}

/// One block read: `count` registers starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Unit id; `None` uses the hub's default.
    pub slave: Option<u8>,
    pub register_type: RegisterType,
    pub address: u16,
    pub count: u16,
}

/// Source of register blocks.
///
/// Implementations perform a single attempt per call; retrying is left to
/// the next scheduled poll.
pub trait RegisterReader: Send + Sync + 'static {
    fn read_registers(
        &self,
        request: &ReadRequest,
    ) -> impl Future<Output = Result<Vec<u16>, ReadError>> + Send;
}

/// A Modbus client shared by every sensor configured on it.
///
/// Reads are serialised, so sensors polling concurrently never interleave
/// requests on one link. The link is opened on first use and dropped after
/// a connectivity failure; the next read reconnects.
pub struct ModbusHub {
    config: HubConfig,
    ctx: Mutex<Option<Context>>,
}

impl ModbusHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ReadError> {
        tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ReadError::Connectivity(format!("Cannot resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| ReadError::Connectivity(format!("No address for {}", host)))
    }

    async fn connect(&self) -> Result<Context, ReadError> {
        let timeout = self.config.timeout();
        let slave = Slave(self.config.unit_id);

        let ctx = match &self.config.connection {
            ConnectionConfig::Tcp { host, port } => {
                let addr = Self::resolve(host, *port).await?;

                tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| ReadError::Connectivity("Connection timeout".to_string()))?
                    .map_err(|e| ReadError::Connectivity(e.to_string()))?
            }
            ConnectionConfig::RtuOverTcp { host, port } => {
                let addr = Self::resolve(host, *port).await?;

                let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
                    .await
                    .map_err(|_| ReadError::Connectivity("Connection timeout".to_string()))?
                    .map_err(|e| ReadError::Connectivity(e.to_string()))?;

                rtu::attach_slave(stream, slave)
            }
            ConnectionConfig::Rtu {
                port,
                baud_rate,
                data_bits,
                parity,
                stop_bits,
            } => {
                let parity = match parity.to_lowercase().as_str() {
                    "even" => tokio_serial::Parity::Even,
                    "odd" => tokio_serial::Parity::Odd,
                    _ => tokio_serial::Parity::None,
                };

                let stop_bits = match stop_bits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match data_bits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(port, *baud_rate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits)
                    .timeout(timeout);

                let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
                    ReadError::Connectivity(format!("Serial open failed: {}", e))
                })?;

                rtu::attach_slave(serial, slave)
            }
        };

        info!(hub = %self.config.name, "Modbus link established");
        Ok(ctx)
    }
}

impl RegisterReader for ModbusHub {
    async fn read_registers(&self, request: &ReadRequest) -> Result<Vec<u16>, ReadError> {
        let mut guard = self.ctx.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let ctx = guard
            .as_mut()
            .ok_or_else(|| ReadError::Connectivity("Not connected".to_string()))?;

        ctx.set_slave(Slave(request.slave.unwrap_or(self.config.unit_id)));

        let timeout = self.config.timeout();
        let response = match request.register_type {
            RegisterType::Holding => {
                tokio::time::timeout(
                    timeout,
                    ctx.read_holding_registers(request.address, request.count),
                )
                .await
            }
            RegisterType::Input => {
                tokio::time::timeout(
                    timeout,
                    ctx.read_input_registers(request.address, request.count),
                )
                .await
            }
        };

        let words = match response {
            Err(_) => {
                *guard = None;
                return Err(ReadError::Connectivity(format!(
                    "No response within {} ms",
                    self.config.timeout_ms
                )));
            }
            Ok(Err(e)) => {
                *guard = None;
                return Err(ReadError::Connectivity(e.to_string()));
            }
            Ok(Ok(Err(exception))) => {
                return Err(ReadError::Protocol(format!("{:?}", exception)));
            }
            Ok(Ok(Ok(words))) => words,
        };

        if words.len() < usize::from(request.count) {
            return Err(ReadError::Protocol(format!(
                "Short response: {} of {} registers",
                words.len(),
                request.count
            )));
        }

        debug!(
            hub = %self.config.name,
            register_type = %request.register_type,
            address = request.address,
            count = request.count,
            "Read registers"
        );
        Ok(words)
    }
}

/// Hubs by name, handed to sensors when they are configured.
pub struct HubRegistry<R> {
    hubs: HashMap<String, Arc<R>>,
}

impl<R> Default for HubRegistry<R> {
    fn default() -> Self {
        Self {
            hubs: HashMap::new(),
        }
    }
}

impl<R> HubRegistry<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hub, returning any hub previously stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, hub: R) -> Option<Arc<R>> {
        self.hubs.insert(name.into(), Arc::new(hub))
    }

    pub fn get(&self, name: &str) -> Option<Arc<R>> {
        self.hubs.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hubs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs.is_empty()
    }
}

impl HubRegistry<ModbusHub> {
    /// Build one [`ModbusHub`] per configured hub. No connection is opened yet.
    pub fn from_config(hubs: &[HubConfig]) -> Self {
        let mut registry = Self::new();
        for hub in hubs {
            registry.insert(hub.name.clone(), ModbusHub::new(hub.clone()));
        }
        registry
    }
}
