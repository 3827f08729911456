//! Master-side device discovery and polling.
//!
//! The master owns the bus. Every exchange is a query written to a module
//! followed by a poll: read the module until it answers something other than
//! RETRY, sleeping between attempts, up to the poll timeout.
//!
//! ```text
//! send(query) ─► receive ─► RETRY? ─yes─► sleep(retry_interval) ─► receive ...
//!                              │no
//!                              ▼
//!                            reply
//! ```
//!
//! Deadlines use `tokio::time`, so tests can run on paused time.

mod devices;

use tokio::time::Instant;

use crate::clock::{Clock, SoftClock};
use crate::config::MasterConfig;
use crate::error::{FieldkitError, Result};
use crate::pool::budget::{MAX_FRAME_SIZE, MAX_SENSORS_PER_DEVICE};
use crate::pool::Pool;
use crate::protocol::{
    deserialize, encode_frame, Query, ReadingState, Reply, WireMessage, PROTOCOL_VERSION,
};
use crate::readings::{Reading, Readings};
use crate::transport::Bus;

pub use devices::{AttachedSensor, Device, DeviceList};

/// End-of-list sentinel; scans cover `1..ADDRESS_LIST_END`.
pub const ADDRESS_LIST_END: u8 = 128;

/// Outcome of one reading-status drain.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingStatus {
    /// The first non-`Done` state reported.
    pub state: ReadingState,
    /// Readings collected from `Done` replies, in arrival order.
    pub readings: Vec<Reading>,
}

/// Bus controller that discovers and polls modules.
pub struct Master<B: Bus> {
    bus: B,
    config: MasterConfig,
    clock: Box<dyn Clock>,
}

impl<B: Bus> Master<B> {
    /// Create a master over `bus`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the configuration fails validation.
    pub fn new(bus: B, config: MasterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            bus,
            config,
            clock: Box::new(SoftClock::new()),
        })
    }

    /// Use `clock` for the time sent to modules.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }

    /// Probe every address except the blacklist and collect the devices that answer.
    pub async fn scan(&mut self, pool: &mut Pool) -> Result<DeviceList> {
        let addresses: Vec<u8> = (1..ADDRESS_LIST_END)
            .filter(|address| !self.config.is_blacklisted(*address))
            .collect();
        self.scan_addresses(&addresses, pool).await
    }

    /// Probe only `addresses`.
    ///
    /// A device that fails any step is left out. Running out of pool space
    /// (or using a released pool) aborts the scan.
    pub async fn scan_addresses(&mut self, addresses: &[u8], pool: &mut Pool) -> Result<DeviceList> {
        let mut devices = DeviceList::new();

        for &address in addresses {
            if address == 0 || address >= ADDRESS_LIST_END || self.config.is_blacklisted(address) {
                tracing::debug!("Scan: skipping address {}", address);
                continue;
            }

            match self.query_device(address, pool).await {
                Ok(device) => {
                    tracing::info!(
                        "Scan: found '{}' at {} ({} sensors)",
                        device.name,
                        address,
                        device.sensors.len()
                    );
                    devices.push(pool, device)?;
                }
                Err(e @ (FieldkitError::PoolExhausted { .. } | FieldkitError::PoolReleased(_))) => {
                    return Err(e)
                }
                Err(e) => tracing::debug!("Scan: no device at {}: {}", address, e),
            }
        }

        tracing::info!("Scan: {} devices", devices.len());
        Ok(devices)
    }

    /// Ask the module at `address` for its capabilities and every sensor's.
    pub async fn query_device(&mut self, address: u8, pool: &mut Pool) -> Result<Device> {
        let query = Query::Capabilities {
            version: PROTOCOL_VERSION,
            caller_time: self.clock.now(),
        };
        self.send(address, &query)?;
        let caps = match self.poll(address, pool).await? {
            Reply::Capabilities(caps) => caps,
            other => return Err(unexpected(address, &other)),
        };

        if caps.version == 0 {
            return Err(FieldkitError::decode(format!(
                "device at {} reports protocol version 0",
                address
            )));
        }
        if caps.number_of_sensors as usize > MAX_SENSORS_PER_DEVICE {
            return Err(FieldkitError::decode(format!(
                "device at {} reports {} sensors",
                address, caps.number_of_sensors
            )));
        }

        let mut sensors = Vec::with_capacity(caps.number_of_sensors as usize);
        for sensor in 0..caps.number_of_sensors {
            self.send(address, &Query::SensorCapabilities { sensor })?;
            match self.poll(address, pool).await? {
                Reply::SensorCapabilities(s) => sensors.push(AttachedSensor {
                    id: s.id,
                    name: s.name,
                    unit_of_measure: s.unit_of_measure,
                }),
                other => return Err(unexpected(address, &other)),
            }
        }

        Ok(Device {
            address,
            version: caps.version,
            module_type: caps.module_type,
            name: caps.name,
            number_of_sensors: caps.number_of_sensors,
            sensors,
        })
    }

    /// Tell `device` to start a measurement.
    ///
    /// Any answer other than RETRY within the poll timeout counts as accepted.
    pub async fn begin_take_reading(&mut self, device: &Device, pool: &mut Pool) -> Result<()> {
        self.send(device.address, &Query::BeginTakeReadings { index: 0 })?;
        let reply = self.poll(device.address, pool).await?;
        tracing::debug!("Begin reading at {}: {:?}", device.address, reply);
        Ok(())
    }

    /// Drain `device`'s readings, one reading-status query at a time.
    ///
    /// `Done` replies add their readings and the drain continues; any other
    /// state ends it.
    ///
    /// # Errors
    ///
    /// Returns `DrainLimit` past `drain_timeout` or `max_drain_readings`.
    pub async fn reading_status(&mut self, device: &Device, pool: &mut Pool) -> Result<ReadingStatus> {
        let address = device.address;
        let limit = self.config.max_drain_readings;
        let deadline = self.config.drain_timeout_duration();
        let start = Instant::now();
        let mut readings = Readings::new();

        loop {
            if start.elapsed() > deadline {
                tracing::warn!("Drain at {} timed out after {} readings", address, readings.len());
                return Err(FieldkitError::DrainLimit {
                    address,
                    readings: readings.len(),
                });
            }

            self.send(address, &Query::ReadingStatus)?;
            let status = match self.poll(address, pool).await? {
                Reply::ReadingStatus(status) => status,
                other => return Err(unexpected(address, &other)),
            };

            if status.state != ReadingState::Done {
                tracing::debug!(
                    "Drain at {} ended in {:?} with {} readings",
                    address,
                    status.state,
                    readings.len()
                );
                return Ok(ReadingStatus {
                    state: status.state,
                    readings: readings.into_vec(),
                });
            }

            for reading in status.all_readings() {
                if readings.len() >= limit {
                    tracing::warn!("Drain at {} exceeded {} readings", address, limit);
                    return Err(FieldkitError::DrainLimit {
                        address,
                        readings: readings.len(),
                    });
                }
                tracing::debug!(
                    "Reading from {}: sensor {} = {} @ {}",
                    address,
                    reading.sensor,
                    reading.value,
                    reading.time
                );
                readings.push(pool, reading)?;
            }
        }
    }

    /// Run a whole measurement: begin, then drain until the module is idle.
    ///
    /// While the module reports `Begin` or `Busy` the master waits one retry
    /// interval between drains, bounded by `drain_timeout`.
    pub async fn take_readings(&mut self, device: &Device, pool: &mut Pool) -> Result<Vec<Reading>> {
        self.begin_take_reading(device, pool).await?;

        let deadline = self.config.drain_timeout_duration();
        let start = Instant::now();
        let mut all = Vec::new();

        loop {
            let status = self.reading_status(device, pool).await?;
            all.extend(status.readings);

            match status.state {
                ReadingState::Idle | ReadingState::Done => return Ok(all),
                ReadingState::Begin | ReadingState::Busy => {
                    if start.elapsed() > deadline {
                        return Err(FieldkitError::DrainLimit {
                            address: device.address,
                            readings: all.len(),
                        });
                    }
                    tokio::time::sleep(self.config.retry_interval_duration()).await;
                }
            }
        }
    }

    /// Read from `address` until it answers something other than RETRY.
    ///
    /// # Errors
    ///
    /// Bus and decode failures are returned at once; only RETRY is retried.
    /// Returns `Timeout` when `poll_timeout` passes without an answer.
    pub async fn poll(&mut self, address: u8, pool: &mut Pool) -> Result<Reply> {
        let timeout = self.config.poll_timeout_duration();
        let start = Instant::now();

        loop {
            let bytes = self.bus.receive_block(address, MAX_FRAME_SIZE)?;
            let reply: Reply = deserialize(&bytes, pool)?;
            if !reply.is_retry() {
                return Ok(reply);
            }

            let waited = start.elapsed();
            if waited > timeout {
                tracing::warn!("No reply from {} after {:?}", address, waited);
                return Err(FieldkitError::Timeout { address, waited });
            }

            tokio::time::sleep(self.config.retry_interval_duration()).await;
        }
    }

    fn send<M: WireMessage>(&mut self, address: u8, message: &M) -> Result<()> {
        let frame = encode_frame(message)?;
        self.bus.send_block(address, frame.as_bytes())
    }
}

fn unexpected(address: u8, reply: &Reply) -> FieldkitError {
    match reply {
        Reply::Error { message } => {
            FieldkitError::decode(format!("device at {} replied error: {}", address, message))
        }
        other => FieldkitError::decode(format!(
            "unexpected reply type {} from {}",
            other.type_number(),
            address
        )),
    }
}
