//! # fieldkit-bus
//!
//! Module/master protocol for FieldKit sensor firmware.
//!
//! A master scans a shared bus for modules, learns their sensors, and drives
//! a reading cycle on each one. Modules answer with small delimited messages
//! that must fit a single bus transaction.
//!
//! ## Architecture
//!
//! - **Pools** (`pool`): hierarchical bump arenas that account every
//!   allocation and are released all at once
//! - **Protocol** (`protocol`): varint wire format, message schemas, framing
//! - **Module** (`module`): the reading state machine and query handlers
//! - **Master** (`master`): scan, begin and drain over any [`Bus`]
//! - **Transport** (`transport`): the bus trait plus in-memory buses
//!
//! ## Example
//!
//! ```ignore
//! use fieldkit_bus::{LoopbackBus, Master, MasterConfig, Module, Pool, ReadingOutcome};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> fieldkit_bus::Result<()> {
//!     let module = Module::builder()
//!         .address(8)
//!         .name("NOAA-CTD")
//!         .sensor("Depth", "m")
//!         .on_begin_reading(|pool, now| {
//!             let mut readings = fieldkit_bus::Readings::new();
//!             readings.push(pool, fieldkit_bus::Reading::new(0, now, 12.5))?;
//!             Ok(ReadingOutcome::Complete(readings))
//!         })
//!         .build(None)?;
//!
//!     let bus = LoopbackBus::new().with_module(module)?;
//!     let mut master = Master::new(bus, MasterConfig::default())?;
//!
//!     let mut scan_pool = Pool::root("scan", fieldkit_bus::pool::budget::SCAN_POOL_SIZE);
//!     let devices = master.scan(&mut scan_pool).await?;
//!     for device in &devices {
//!         let mut pool = Pool::root("status", fieldkit_bus::pool::budget::STATUS_POOL_SIZE);
//!         let readings = master.take_readings(device, &mut pool).await?;
//!         println!("{}: {:?}", device.name, readings);
//!     }
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod master;
pub mod module;
pub mod pool;
pub mod protocol;
pub mod readings;
pub mod transport;

pub use clock::{Clock, ManualClock, SoftClock};
pub use config::{MasterConfig, ModuleConfig};
pub use error::{BusErrorKind, FieldkitError, Result};
pub use master::{Device, DeviceList, Master, ReadingStatus};
pub use module::{Module, ModuleBuilder, ModuleState, ReadingOutcome, Sensors};
pub use pool::Pool;
pub use readings::{Reading, Readings};
pub use transport::{Bus, LoopbackBus, ScriptedBus};
