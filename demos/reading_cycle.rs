//! Reading Cycle - a master scanning and polling a CTD module.
//!
//! This example demonstrates:
//! - Building a module with three sensors and a measurement backend
//! - Carving the module's pools from a single root pool
//! - Scanning the bus, starting a measurement and draining its readings
//!
//! # Running
//!
//! ```text
//! RUST_LOG=fieldkit_bus=debug cargo run --example reading_cycle
//! RUST_LOG=info cargo run --example reading_cycle -- master.json
//! ```
//!
//! The optional argument is a JSON master configuration, e.g.
//! `{ "poll_timeout_ms": 2000, "blacklist": [104] }`.

use fieldkit_bus::pool::budget::{SCAN_POOL_SIZE, STATUS_POOL_SIZE};
use fieldkit_bus::{
    LoopbackBus, Master, MasterConfig, Module, Pool, Reading, ReadingOutcome, Readings,
};
use tracing_subscriber::EnvFilter;

const CTD_ADDRESS: u8 = 8;

fn ctd(root: &mut Pool) -> fieldkit_bus::Result<Module> {
    let mut depth = 10.0_f32;

    Module::builder()
        .address(CTD_ADDRESS)
        .name("NOAA-CTD")
        .sensor("Depth", "m")
        .sensor("Temperature", "°C")
        .sensor("Conductivity", "µS/cm")
        .on_begin_reading(move |pool, now| {
            depth += 0.5;
            let mut readings = Readings::new();
            readings.push(pool, Reading::new(0, now, depth))?;
            readings.push(pool, Reading::new(1, now, 18.0 - depth / 10.0))?;
            readings.push(pool, Reading::new(2, now, 42_000.0 + depth * 3.0))?;
            Ok(ReadingOutcome::Complete(readings))
        })
        .build(Some(root))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => MasterConfig::from_file(path)?,
        None => MasterConfig::default(),
    };

    let mut root = Pool::root("modules", 4096);
    let bus = LoopbackBus::new().with_module(ctd(&mut root)?)?;
    let mut master = Master::new(bus, config)?;

    let mut scan_pool = Pool::root("scan", SCAN_POOL_SIZE);
    let devices = master.scan(&mut scan_pool).await?;

    for device in &devices {
        println!("{} @ {} (protocol v{})", device.name, device.address, device.version);
        for sensor in &device.sensors {
            println!("  [{}] {} ({})", sensor.id, sensor.name, sensor.unit_of_measure);
        }

        for _ in 0..2 {
            let mut pool = Pool::root("status", STATUS_POOL_SIZE);
            for reading in master.take_readings(device, &mut pool).await? {
                let sensor = device.sensor(reading.sensor).map_or("?", |s| s.name.as_str());
                println!("  {} = {} @ {}", sensor, reading.value, reading.time);
            }
        }
    }

    Ok(())
}
