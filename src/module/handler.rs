//! Query dispatch for a module.
//!
//! Maps each decoded [`Query`] to the reply the module queues and to any state
//! change that must happen once the reply is serialized.

use super::{Module, ModuleState};
use crate::error::FieldkitError;
use crate::protocol::{
    Capabilities, ModuleType, Query, ReadingState, ReadingStatusReply, Reply, SensorCapabilities,
    PROTOCOL_VERSION,
};

/// What the module does after handling a query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    /// Queue the reply.
    Reply(Reply),
    /// Queue the reply, then return to idle and release the readings pool.
    ReplyThenIdle(Reply),
    /// Send nothing.
    Ignore,
}

pub(crate) fn handle(module: &mut Module, query: Query) -> Action {
    match query {
        Query::Capabilities {
            version,
            caller_time,
        } => capabilities(module, version, caller_time),
        Query::SensorCapabilities { sensor } => sensor_capabilities(module, sensor),
        Query::BeginTakeReadings { index } => begin_take_readings(module, index),
        Query::ReadingStatus => reading_status(module),
        Query::Unknown(kind) => {
            tracing::warn!("Module '{}': unknown query type {}", module.info.name, kind);
            Action::Ignore
        }
    }
}

fn capabilities(module: &mut Module, version: u32, caller_time: u32) -> Action {
    tracing::debug!(
        "Module '{}': capabilities query (master version {})",
        module.info.name,
        version
    );
    if caller_time > 0 {
        module.clock.set(caller_time);
        tracing::info!("Module '{}': clock set to {}", module.info.name, caller_time);
    }

    Action::Reply(Reply::Capabilities(Capabilities {
        version: PROTOCOL_VERSION,
        module_type: ModuleType::Sensor,
        name: module.info.name.clone(),
        number_of_sensors: module.info.sensors.len() as u32,
    }))
}

fn sensor_capabilities(module: &mut Module, index: u32) -> Action {
    match module.info.sensors.get(index as usize) {
        Some(sensor) => Action::Reply(Reply::SensorCapabilities(SensorCapabilities {
            id: sensor.id,
            name: sensor.name.clone(),
            unit_of_measure: sensor.unit_of_measure.clone(),
        })),
        None => {
            let error = FieldkitError::InvalidSensorIndex {
                index,
                count: module.info.sensors.len(),
            };
            tracing::warn!("Module '{}': {}", module.info.name, error);
            Action::Reply(Reply::Error {
                message: error.to_string(),
            })
        }
    }
}

fn begin_take_readings(module: &mut Module, index: u32) -> Action {
    match module.state {
        ModuleState::BeginReading | ModuleState::Busy => {
            tracing::debug!(
                "Module '{}': begin #{} ignored, reading in progress",
                module.info.name,
                index
            );
            Action::Reply(status(ReadingState::Busy))
        }
        _ => {
            tracing::debug!("Module '{}': begin reading #{}", module.info.name, index);
            module.state = ModuleState::BeginReading;
            Action::Reply(status(ReadingState::Begin))
        }
    }
}

fn reading_status(module: &mut Module) -> Action {
    match module.state {
        ModuleState::DoneReading => match module.readings.pop_front() {
            Some(reading) => {
                let reply = Reply::ReadingStatus(ReadingStatusReply::done(reading));
                if module.readings.is_empty() {
                    Action::ReplyThenIdle(reply)
                } else {
                    Action::Reply(reply)
                }
            }
            None => Action::ReplyThenIdle(status(ReadingState::Idle)),
        },
        ModuleState::BeginReading | ModuleState::Busy => Action::Reply(status(ReadingState::Busy)),
        ModuleState::Start | ModuleState::Idle => Action::Reply(status(ReadingState::Idle)),
    }
}

fn status(state: ReadingState) -> Reply {
    Reply::ReadingStatus(ReadingStatusReply::new(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::module::{ModuleBuilder, ReadingOutcome};
    use crate::readings::{Reading, Readings};

    fn module() -> Module {
        ModuleBuilder::new()
            .address(8)
            .name("NOAA-CTD")
            .sensor("Depth", "m")
            .sensor("Temperature", "°C")
            .clock(ManualClock::new(100))
            .on_begin_reading(|_, _| Ok(ReadingOutcome::Pending))
            .build(None)
            .unwrap()
    }

    #[test]
    fn test_capabilities_sets_clock() {
        let mut module = module();
        let action = handle(
            &mut module,
            Query::Capabilities {
                version: 1,
                caller_time: 5_000,
            },
        );

        match action {
            Action::Reply(Reply::Capabilities(caps)) => {
                assert_eq!(caps.name, "NOAA-CTD");
                assert_eq!(caps.number_of_sensors, 2);
                assert_eq!(caps.version, PROTOCOL_VERSION);
            }
            other => panic!("unexpected action {:?}", other),
        }
        assert_eq!(module.clock().now(), 5_000);
    }

    #[test]
    fn test_zero_caller_time_leaves_clock() {
        let mut module = module();
        handle(
            &mut module,
            Query::Capabilities {
                version: 1,
                caller_time: 0,
            },
        );
        assert_eq!(module.clock().now(), 100);
    }

    #[test]
    fn test_sensor_capabilities_in_and_out_of_range() {
        let mut module = module();

        let action = handle(&mut module, Query::SensorCapabilities { sensor: 1 });
        assert_eq!(
            action,
            Action::Reply(Reply::SensorCapabilities(SensorCapabilities {
                id: 1,
                name: "Temperature".to_string(),
                unit_of_measure: "°C".to_string(),
            }))
        );

        let action = handle(&mut module, Query::SensorCapabilities { sensor: 7 });
        match action {
            Action::Reply(Reply::Error { message }) => assert!(message.contains("index 7")),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_begin_while_busy_does_not_restart() {
        let mut module = module();
        module.state = ModuleState::Busy;

        let action = handle(&mut module, Query::BeginTakeReadings { index: 0 });
        assert_eq!(action, Action::Reply(status(ReadingState::Busy)));
        assert_eq!(module.state, ModuleState::Busy);
    }

    #[test]
    fn test_begin_from_idle() {
        let mut module = module();
        module.state = ModuleState::Idle;

        let action = handle(&mut module, Query::BeginTakeReadings { index: 0 });
        assert_eq!(action, Action::Reply(status(ReadingState::Begin)));
        assert_eq!(module.state, ModuleState::BeginReading);
    }

    #[test]
    fn test_reading_status_drains_in_order() {
        let mut module = module();
        let mut readings = Readings::new();
        for sensor in 0..2 {
            readings
                .push(&mut module.readings_pool, Reading::new(sensor, 100, 1.0))
                .unwrap();
        }
        module.readings = readings;
        module.state = ModuleState::DoneReading;

        let first = handle(&mut module, Query::ReadingStatus);
        assert_eq!(
            first,
            Action::Reply(Reply::ReadingStatus(ReadingStatusReply::done(Reading::new(
                0, 100, 1.0
            ))))
        );
        let second = handle(&mut module, Query::ReadingStatus);
        assert_eq!(
            second,
            Action::ReplyThenIdle(Reply::ReadingStatus(ReadingStatusReply::done(
                Reading::new(1, 100, 1.0)
            )))
        );
    }

    #[test]
    fn test_unknown_query_is_ignored() {
        let mut module = module();
        assert_eq!(handle(&mut module, Query::Unknown(99)), Action::Ignore);
    }
}
