//! Module-side protocol state machine.
//!
//! A module sits on the bus at a fixed address and answers the master's
//! queries. Its firmware loop calls [`Module::tick`]; the bus driver calls
//! [`Module::on_receive`] when the master writes a block and
//! [`Module::on_request`] when the master reads one.
//!
//! ```text
//!          tick            BeginTakeReadings           tick
//! Start ────────► Idle ◄──────────────────► BeginReading ────► Busy
//!                   ▲                                            │
//!                   │ last reading drained         done_reading  │
//!                   └──────────────────── DoneReading ◄──────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use fieldkit_bus::module::{Module, ReadingOutcome};
//! use fieldkit_bus::readings::{Reading, Readings};
//!
//! let mut module = Module::builder()
//!     .address(8)
//!     .name("NOAA-CTD")
//!     .sensor("Depth", "m")
//!     .on_begin_reading(|pool, now| {
//!         let mut readings = Readings::new();
//!         readings.push(pool, Reading::new(0, now, 12.5))?;
//!         Ok(ReadingOutcome::Complete(readings))
//!     })
//!     .build(None)
//!     .unwrap();
//!
//! module.tick();
//! assert_eq!(module.state(), fieldkit_bus::module::ModuleState::Idle);
//! ```

mod handler;

use handler::Action;

use crate::clock::{Clock, SoftClock};
use crate::config::{ModuleConfig, MAX_MODULE_ADDRESS};
use crate::error::{FieldkitError, Result};
use crate::pool::budget::{MAX_FRAME_SIZE, MAX_NAME_LEN, MAX_SENSORS_PER_DEVICE};
use crate::pool::Pool;
use crate::protocol::{
    deserialize, encode_frame, serialize, MessageQueue, Query, Reply, SerializedMessage,
};
use crate::readings::Readings;
use crate::transport::{Bus, RESPOND_ADDRESS};

/// Where the module is in its reading cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Start,
    Idle,
    BeginReading,
    Busy,
    DoneReading,
}

/// One sensor a module exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorInfo {
    pub id: u32,
    pub name: String,
    pub unit_of_measure: String,
}

/// Static identity of a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub address: u8,
    pub name: String,
    pub sensors: Vec<SensorInfo>,
}

/// Result of starting a measurement.
#[derive(Debug)]
pub enum ReadingOutcome {
    /// The readings are ready now.
    Complete(Readings),
    /// The measurement continues; finish it with [`Module::done_reading`].
    Pending,
}

/// Measurement backend of a module.
pub trait Sensors {
    /// Start a measurement. Readings must be charged to `pool`.
    fn begin_reading(&mut self, pool: &mut Pool, now: u32) -> Result<ReadingOutcome>;
}

impl<F> Sensors for F
where
    F: FnMut(&mut Pool, u32) -> Result<ReadingOutcome>,
{
    fn begin_reading(&mut self, pool: &mut Pool, now: u32) -> Result<ReadingOutcome> {
        self(pool, now)
    }
}

/// Builder for a [`Module`].
pub struct ModuleBuilder {
    address: u8,
    name: String,
    sensors: Vec<SensorInfo>,
    backend: Option<Box<dyn Sensors>>,
    clock: Option<Box<dyn Clock>>,
    config: ModuleConfig,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self {
            address: 0,
            name: String::new(),
            sensors: Vec::new(),
            backend: None,
            clock: None,
            config: ModuleConfig::default(),
        }
    }

    /// Bus address (1..=127).
    pub fn address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Name advertised in capabilities replies.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Add a sensor. Ids are assigned in call order starting at 0.
    pub fn sensor(mut self, name: &str, unit_of_measure: &str) -> Self {
        let id = self.sensors.len() as u32;
        self.sensors.push(SensorInfo {
            id,
            name: name.to_string(),
            unit_of_measure: unit_of_measure.to_string(),
        });
        self
    }

    /// Measurement backend.
    pub fn backend<S: Sensors + 'static>(mut self, backend: S) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    /// Measurement backend as a closure.
    pub fn on_begin_reading<F>(self, f: F) -> Self
    where
        F: FnMut(&mut Pool, u32) -> Result<ReadingOutcome> + 'static,
    {
        self.backend(f)
    }

    /// Clock used for timestamps. Defaults to [`SoftClock`].
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    /// Pool sizing.
    pub fn config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate and build. Pools are carved from `parent` when given.
    pub fn build(self, parent: Option<&mut Pool>) -> Result<Module> {
        if self.address == 0 || self.address > MAX_MODULE_ADDRESS {
            return Err(FieldkitError::Config(format!(
                "module address {} is outside 1..={}",
                self.address, MAX_MODULE_ADDRESS
            )));
        }
        check_name("module name", &self.name)?;
        if self.sensors.len() > MAX_SENSORS_PER_DEVICE {
            return Err(FieldkitError::Config(format!(
                "{} sensors exceed the maximum of {}",
                self.sensors.len(),
                MAX_SENSORS_PER_DEVICE
            )));
        }
        for sensor in &self.sensors {
            check_name("sensor name", &sensor.name)?;
            check_name("unit of measure", &sensor.unit_of_measure)?;
        }
        self.config.validate()?;

        let backend = self
            .backend
            .ok_or_else(|| FieldkitError::Config("no measurement backend".to_string()))?;
        let clock = self.clock.unwrap_or_else(|| Box::new(SoftClock::new()));

        let (reply_pool, readings_pool) = match parent {
            Some(parent) => (
                parent.child("reply", self.config.reply_pool_size)?,
                parent.child("readings", self.config.readings_pool_size)?,
            ),
            None => (
                Pool::root("reply", self.config.reply_pool_size),
                Pool::root("readings", self.config.readings_pool_size),
            ),
        };

        tracing::info!(
            "Module '{}' at address {} with {} sensors",
            self.name,
            self.address,
            self.sensors.len()
        );

        Ok(Module {
            info: ModuleInfo {
                address: self.address,
                name: self.name,
                sensors: self.sensors,
            },
            state: ModuleState::Start,
            sensors: backend,
            clock,
            reply_pool,
            readings_pool,
            readings: Readings::new(),
            pending: None,
            outgoing: MessageQueue::new(),
        })
    }
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(FieldkitError::Config(format!(
            "{} '{}' must be 1..={} bytes",
            what, name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// A sensor module answering bus queries.
pub struct Module {
    info: ModuleInfo,
    state: ModuleState,
    sensors: Box<dyn Sensors>,
    clock: Box<dyn Clock>,
    reply_pool: Pool,
    readings_pool: Pool,
    readings: Readings,
    pending: Option<SerializedMessage>,
    outgoing: MessageQueue,
}

impl Module {
    pub fn builder() -> ModuleBuilder {
        ModuleBuilder::new()
    }

    /// One pass of the firmware loop: advance the state machine, then handle
    /// the pending incoming message, if any.
    pub fn tick(&mut self) {
        match self.state {
            ModuleState::Start => {
                tracing::debug!("Module '{}': started", self.info.name);
                self.state = ModuleState::Idle;
            }
            ModuleState::BeginReading => self.begin_reading(),
            ModuleState::Idle | ModuleState::Busy | ModuleState::DoneReading => {}
        }

        if let Some(message) = self.pending.take() {
            self.process(message);
        }
    }

    fn begin_reading(&mut self) {
        self.readings_pool.empty();
        self.readings = Readings::new();
        self.state = ModuleState::Busy;

        let now = self.clock.now();
        match self.sensors.begin_reading(&mut self.readings_pool, now) {
            Ok(ReadingOutcome::Complete(readings)) => {
                if let Err(e) = self.done_reading(readings) {
                    tracing::error!("Module '{}': {}", self.info.name, e);
                }
            }
            Ok(ReadingOutcome::Pending) => {
                tracing::debug!("Module '{}': reading in progress", self.info.name);
            }
            Err(e) => {
                tracing::warn!("Module '{}': reading failed: {}", self.info.name, e);
                self.abandon_reading();
            }
        }
    }

    fn abandon_reading(&mut self) {
        self.readings = Readings::new();
        self.readings_pool.empty();
        self.state = ModuleState::Idle;
    }

    /// Hand over the readings of a measurement started with
    /// [`ReadingOutcome::Pending`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the module is `Busy`.
    pub fn done_reading(&mut self, readings: Readings) -> Result<()> {
        if self.state != ModuleState::Busy {
            return Err(FieldkitError::InvalidState(format!(
                "done_reading in state {:?}",
                self.state
            )));
        }

        if readings.is_empty() {
            tracing::debug!("Module '{}': reading produced nothing", self.info.name);
            self.abandon_reading();
        } else {
            tracing::debug!(
                "Module '{}': {} readings ready",
                self.info.name,
                readings.len()
            );
            self.readings = readings;
            self.state = ModuleState::DoneReading;
        }
        Ok(())
    }

    /// Finish a pending measurement by building its readings in the readings pool.
    ///
    /// A failing closure abandons the measurement and returns the module to `Idle`.
    pub fn finish_reading<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Pool, u32) -> Result<Readings>,
    {
        if self.state != ModuleState::Busy {
            return Err(FieldkitError::InvalidState(format!(
                "finish_reading in state {:?}",
                self.state
            )));
        }

        let now = self.clock.now();
        match f(&mut self.readings_pool, now) {
            Ok(readings) => self.done_reading(readings),
            Err(e) => {
                self.abandon_reading();
                Err(e)
            }
        }
    }

    fn process(&mut self, message: SerializedMessage) {
        let query = message
            .bytes(&self.reply_pool)
            .and_then(|bytes| deserialize::<Query>(&bytes, &mut self.reply_pool));
        let query = match query {
            Ok(query) => query,
            Err(e) => {
                tracing::warn!("Module '{}': dropping query: {}", self.info.name, e);
                self.reclaim_reply_pool();
                return;
            }
        };

        match handler::handle(self, query) {
            Action::Reply(reply) => self.enqueue(&reply),
            Action::ReplyThenIdle(reply) => {
                self.enqueue(&reply);
                self.abandon_reading();
            }
            Action::Ignore => self.reclaim_reply_pool(),
        }
    }

    /// Empty the reply pool when nothing in it is still needed.
    fn reclaim_reply_pool(&mut self) {
        if self.pending.is_none() && self.outgoing.is_empty() {
            self.reply_pool.empty();
        }
    }

    fn enqueue(&mut self, reply: &Reply) {
        match serialize(reply, &mut self.reply_pool) {
            Ok(message) => self.outgoing.push_back(message),
            Err(e) => tracing::error!("Module '{}': cannot queue reply: {}", self.info.name, e),
        }
    }

    /// The master wrote a block to this module.
    ///
    /// The bytes are copied into the reply pool and handled on the next tick.
    /// An unprocessed earlier message is replaced.
    pub fn on_receive(&mut self, bytes: &[u8]) {
        if bytes.len() >= MAX_FRAME_SIZE {
            tracing::warn!(
                "Module '{}': dropping {} byte block",
                self.info.name,
                bytes.len()
            );
            return;
        }
        if self.pending.take().is_some() {
            tracing::warn!("Module '{}': replacing unprocessed query", self.info.name);
        }
        self.reclaim_reply_pool();
        match SerializedMessage::from_bytes(bytes, &mut self.reply_pool) {
            Ok(message) => self.pending = Some(message),
            Err(e) => tracing::warn!("Module '{}': dropping query: {}", self.info.name, e),
        }
    }

    /// The master is reading from this module.
    ///
    /// Sends every queued reply in order, or a single RETRY when nothing is
    /// queued. The reply pool is emptied afterwards unless it still holds an
    /// unprocessed incoming message.
    pub fn on_request(&mut self, bus: &mut dyn Bus) -> Result<()> {
        if self.outgoing.is_empty() {
            self.reclaim_reply_pool();
            let frame = encode_frame(&Reply::Retry)?;
            return bus.send_block(RESPOND_ADDRESS, frame.as_bytes());
        }

        while let Some(message) = self.outgoing.pop_front() {
            let bytes = message.bytes(&self.reply_pool)?;
            bus.send_block(RESPOND_ADDRESS, &bytes)?;
        }

        self.reclaim_reply_pool();
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[inline]
    pub fn address(&self) -> u8 {
        self.info.address
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Readings not yet drained by the master.
    pub fn readings(&self) -> &Readings {
        &self.readings
    }

    /// Replies waiting for the master to read them.
    #[inline]
    pub fn queued_replies(&self) -> usize {
        self.outgoing.len()
    }

    #[inline]
    pub fn has_pending_query(&self) -> bool {
        self.pending.is_some()
    }

    pub fn reply_pool(&self) -> &Pool {
        &self.reply_pool
    }

    pub fn readings_pool(&self) -> &Pool {
        &self.readings_pool
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("readings", &self.readings.len())
            .field("pending", &self.pending.is_some())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}
