//! Query and reply messages exchanged between the master and modules.
//!
//! Both are single wire records with a `type` discriminator in field 1 and at
//! most one populated sub-message:
//!
//! ```text
//! Query                               Reply
//! ├─ 1 type                           ├─ 1 type
//! ├─ 2 queryCapabilities              ├─ 2 error           { message }
//! │    { version, callerTime }        ├─ 3 capabilities    { version, type, name,
//! ├─ 3 querySensorCapabilities        │                      numberOfSensors }
//! │    { sensor }                     ├─ 4 sensorCapabilities { id, name,
//! └─ 4 beginTakeReadings { index }    │                         unitOfMeasure }
//!                                     ├─ 5 readingStatus   { state }
//!                                     ├─ 6 sensorReading   { sensor, time, value }
//!                                     └─ 7 sensorReadings  repeated SensorReading
//! ```

use super::schema::{FieldDescriptor, FieldKind, Record, Schema, Value};
use crate::error::{FieldkitError, Result};
use crate::readings::Reading;

pub const QUERY_CAPABILITIES: u32 = 1;
pub const QUERY_SENSOR_CAPABILITIES: u32 = 2;
pub const QUERY_BEGIN_TAKE_READINGS: u32 = 3;
pub const QUERY_READING_STATUS: u32 = 4;

pub const REPLY_RETRY: u32 = 1;
/// Shared by module and sensor capabilities; the populated field tells them apart.
pub const REPLY_CAPABILITIES: u32 = 2;
pub const REPLY_READING_STATUS: u32 = 3;
pub const REPLY_ERROR: u32 = 4;

/// A message type that maps onto a static schema.
pub trait WireMessage: Sized {
    /// Top-level schema of the message.
    fn schema() -> &'static Schema;

    /// Build the dynamic record to encode.
    fn to_record(&self) -> Result<Record>;

    /// Interpret a decoded record.
    fn from_record(record: &Record) -> Result<Self>;
}

const fn field(number: u32, name: &'static str, kind: FieldKind) -> FieldDescriptor {
    FieldDescriptor { number, name, kind }
}

pub static QUERY_CAPABILITIES_SCHEMA: Schema = Schema {
    name: "QueryCapabilities",
    fields: &[
        field(1, "version", FieldKind::Uint32),
        field(2, "callerTime", FieldKind::Uint32),
    ],
};

pub static QUERY_SENSOR_CAPABILITIES_SCHEMA: Schema = Schema {
    name: "QuerySensorCapabilities",
    fields: &[field(1, "sensor", FieldKind::Uint32)],
};

pub static BEGIN_TAKE_READINGS_SCHEMA: Schema = Schema {
    name: "BeginTakeReadings",
    fields: &[field(1, "index", FieldKind::Uint32)],
};

pub static QUERY_SCHEMA: Schema = Schema {
    name: "Query",
    fields: &[
        field(1, "type", FieldKind::Uint32),
        field(2, "queryCapabilities", FieldKind::Message(&QUERY_CAPABILITIES_SCHEMA)),
        field(
            3,
            "querySensorCapabilities",
            FieldKind::Message(&QUERY_SENSOR_CAPABILITIES_SCHEMA),
        ),
        field(4, "beginTakeReadings", FieldKind::Message(&BEGIN_TAKE_READINGS_SCHEMA)),
    ],
};

pub static ERROR_SCHEMA: Schema = Schema {
    name: "Error",
    fields: &[field(1, "message", FieldKind::String)],
};

pub static CAPABILITIES_SCHEMA: Schema = Schema {
    name: "Capabilities",
    fields: &[
        field(1, "version", FieldKind::Uint32),
        field(2, "type", FieldKind::Uint32),
        field(3, "name", FieldKind::String),
        field(4, "numberOfSensors", FieldKind::Uint32),
    ],
};

pub static SENSOR_CAPABILITIES_SCHEMA: Schema = Schema {
    name: "SensorCapabilities",
    fields: &[
        field(1, "id", FieldKind::Uint32),
        field(2, "name", FieldKind::String),
        field(3, "unitOfMeasure", FieldKind::String),
    ],
};

pub static READING_STATUS_SCHEMA: Schema = Schema {
    name: "ReadingStatus",
    fields: &[field(1, "state", FieldKind::Uint32)],
};

pub static SENSOR_READING_SCHEMA: Schema = Schema {
    name: "SensorReading",
    fields: &[
        field(1, "sensor", FieldKind::Uint32),
        field(2, "time", FieldKind::Uint32),
        field(3, "value", FieldKind::Float),
    ],
};

pub static REPLY_SCHEMA: Schema = Schema {
    name: "Reply",
    fields: &[
        field(1, "type", FieldKind::Uint32),
        field(2, "error", FieldKind::Message(&ERROR_SCHEMA)),
        field(3, "capabilities", FieldKind::Message(&CAPABILITIES_SCHEMA)),
        field(4, "sensorCapabilities", FieldKind::Message(&SENSOR_CAPABILITIES_SCHEMA)),
        field(5, "readingStatus", FieldKind::Message(&READING_STATUS_SCHEMA)),
        field(6, "sensorReading", FieldKind::Message(&SENSOR_READING_SCHEMA)),
        field(7, "sensorReadings", FieldKind::RepeatedMessage(&SENSOR_READING_SCHEMA)),
    ],
};

/// Progress of a module's measurement as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReadingState {
    Idle = 0,
    Begin = 1,
    Busy = 2,
    Done = 3,
}

impl ReadingState {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ReadingState::Idle),
            1 => Ok(ReadingState::Begin),
            2 => Ok(ReadingState::Busy),
            3 => Ok(ReadingState::Done),
            other => Err(FieldkitError::decode(format!("unknown reading state {}", other))),
        }
    }
}

/// Kind of module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ModuleType {
    Sensor = 0,
}

impl ModuleType {
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ModuleType::Sensor),
            other => Err(FieldkitError::decode(format!("unknown module type {}", other))),
        }
    }
}

/// Master to module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Identify the module. A non-zero `caller_time` sets the module clock.
    Capabilities { version: u32, caller_time: u32 },
    SensorCapabilities { sensor: u32 },
    BeginTakeReadings { index: u32 },
    ReadingStatus,
    /// A type number this side does not understand.
    Unknown(u32),
}

impl Query {
    pub fn type_number(&self) -> u32 {
        match self {
            Query::Capabilities { .. } => QUERY_CAPABILITIES,
            Query::SensorCapabilities { .. } => QUERY_SENSOR_CAPABILITIES,
            Query::BeginTakeReadings { .. } => QUERY_BEGIN_TAKE_READINGS,
            Query::ReadingStatus => QUERY_READING_STATUS,
            Query::Unknown(t) => *t,
        }
    }
}

impl WireMessage for Query {
    fn schema() -> &'static Schema {
        &QUERY_SCHEMA
    }

    fn to_record(&self) -> Result<Record> {
        let record = Record::new(&QUERY_SCHEMA).with(1, Value::Uint32(self.type_number()))?;
        match *self {
            Query::Capabilities {
                version,
                caller_time,
            } => {
                let inner = Record::new(&QUERY_CAPABILITIES_SCHEMA)
                    .with(1, Value::Uint32(version))?
                    .with(2, Value::Uint32(caller_time))?;
                record.with(2, Value::Message(inner))
            }
            Query::SensorCapabilities { sensor } => {
                let inner = Record::new(&QUERY_SENSOR_CAPABILITIES_SCHEMA)
                    .with(1, Value::Uint32(sensor))?;
                record.with(3, Value::Message(inner))
            }
            Query::BeginTakeReadings { index } => {
                let inner =
                    Record::new(&BEGIN_TAKE_READINGS_SCHEMA).with(1, Value::Uint32(index))?;
                record.with(4, Value::Message(inner))
            }
            Query::ReadingStatus | Query::Unknown(_) => Ok(record),
        }
    }

    fn from_record(record: &Record) -> Result<Self> {
        let kind = record.get_u32(1).unwrap_or(0);
        let query = match kind {
            QUERY_CAPABILITIES => {
                let inner = record.get_message(2);
                Query::Capabilities {
                    version: inner.and_then(|r| r.get_u32(1)).unwrap_or(0),
                    caller_time: inner.and_then(|r| r.get_u32(2)).unwrap_or(0),
                }
            }
            QUERY_SENSOR_CAPABILITIES => Query::SensorCapabilities {
                sensor: record.get_message(3).and_then(|r| r.get_u32(1)).unwrap_or(0),
            },
            QUERY_BEGIN_TAKE_READINGS => Query::BeginTakeReadings {
                index: record.get_message(4).and_then(|r| r.get_u32(1)).unwrap_or(0),
            },
            QUERY_READING_STATUS => Query::ReadingStatus,
            other => Query::Unknown(other),
        };
        Ok(query)
    }
}

/// Module identity returned for a capabilities query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub version: u32,
    pub module_type: ModuleType,
    pub name: String,
    pub number_of_sensors: u32,
}

/// One sensor's identity returned for a sensor capabilities query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorCapabilities {
    pub id: u32,
    pub name: String,
    pub unit_of_measure: String,
}

/// Reading-status reply body.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingStatusReply {
    pub state: ReadingState,
    /// The reading carried by a `Done` reply.
    pub reading: Option<Reading>,
    /// Extra readings batched into the same reply.
    pub readings: Vec<Reading>,
}

impl ReadingStatusReply {
    /// A status with no readings attached.
    pub fn new(state: ReadingState) -> Self {
        Self {
            state,
            reading: None,
            readings: Vec::new(),
        }
    }

    /// A `Done` status carrying one reading.
    pub fn done(reading: Reading) -> Self {
        Self {
            state: ReadingState::Done,
            reading: Some(reading),
            readings: Vec::new(),
        }
    }

    /// Every reading in the reply, single one first.
    pub fn all_readings(&self) -> impl Iterator<Item = Reading> + '_ {
        self.reading.into_iter().chain(self.readings.iter().copied())
    }
}

/// Module to master.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// No data yet; ask again.
    Retry,
    Capabilities(Capabilities),
    SensorCapabilities(SensorCapabilities),
    ReadingStatus(ReadingStatusReply),
    /// The query was understood but could not be answered.
    Error { message: String },
    /// A type number this side does not understand.
    Unknown(u32),
}

impl Reply {
    pub fn type_number(&self) -> u32 {
        match self {
            Reply::Retry => REPLY_RETRY,
            Reply::Capabilities(_) | Reply::SensorCapabilities(_) => REPLY_CAPABILITIES,
            Reply::ReadingStatus(_) => REPLY_READING_STATUS,
            Reply::Error { .. } => REPLY_ERROR,
            Reply::Unknown(t) => *t,
        }
    }

    #[inline]
    pub fn is_retry(&self) -> bool {
        matches!(self, Reply::Retry)
    }
}

fn reading_record(reading: &Reading) -> Result<Record> {
    Record::new(&SENSOR_READING_SCHEMA)
        .with(1, Value::Uint32(reading.sensor))?
        .with(2, Value::Uint32(reading.time))?
        .with(3, Value::Float(reading.value))
}

fn reading_from_record(record: &Record) -> Reading {
    Reading {
        sensor: record.get_u32(1).unwrap_or(0),
        time: record.get_u32(2).unwrap_or(0),
        value: record.get_float(3).unwrap_or(0.0),
    }
}

impl WireMessage for Reply {
    fn schema() -> &'static Schema {
        &REPLY_SCHEMA
    }

    fn to_record(&self) -> Result<Record> {
        let record = Record::new(&REPLY_SCHEMA).with(1, Value::Uint32(self.type_number()))?;
        match self {
            Reply::Retry | Reply::Unknown(_) => Ok(record),
            Reply::Capabilities(caps) => {
                let inner = Record::new(&CAPABILITIES_SCHEMA)
                    .with(1, Value::Uint32(caps.version))?
                    .with(2, Value::Uint32(caps.module_type as u32))?
                    .with(3, Value::String(caps.name.clone()))?
                    .with(4, Value::Uint32(caps.number_of_sensors))?;
                record.with(3, Value::Message(inner))
            }
            Reply::SensorCapabilities(caps) => {
                let inner = Record::new(&SENSOR_CAPABILITIES_SCHEMA)
                    .with(1, Value::Uint32(caps.id))?
                    .with(2, Value::String(caps.name.clone()))?
                    .with(3, Value::String(caps.unit_of_measure.clone()))?;
                record.with(4, Value::Message(inner))
            }
            Reply::ReadingStatus(status) => {
                let inner =
                    Record::new(&READING_STATUS_SCHEMA).with(1, Value::Uint32(status.state as u32))?;
                let mut record = record.with(5, Value::Message(inner))?;
                if let Some(reading) = &status.reading {
                    record.set(6, Value::Message(reading_record(reading)?))?;
                }
                if !status.readings.is_empty() {
                    let items = status
                        .readings
                        .iter()
                        .map(reading_record)
                        .collect::<Result<Vec<_>>>()?;
                    record.set(7, Value::RepeatedMessage(items))?;
                }
                Ok(record)
            }
            Reply::Error { message } => {
                let inner = Record::new(&ERROR_SCHEMA).with(1, Value::String(message.clone()))?;
                record.with(2, Value::Message(inner))
            }
        }
    }

    fn from_record(record: &Record) -> Result<Self> {
        let kind = record.get_u32(1).unwrap_or(0);
        let reply = match kind {
            REPLY_RETRY => Reply::Retry,
            REPLY_CAPABILITIES => {
                if let Some(inner) = record.get_message(4) {
                    Reply::SensorCapabilities(SensorCapabilities {
                        id: inner.get_u32(1).unwrap_or(0),
                        name: inner.get_str(2).unwrap_or_default().to_string(),
                        unit_of_measure: inner.get_str(3).unwrap_or_default().to_string(),
                    })
                } else {
                    let inner = record.get_message(3).ok_or_else(|| {
                        FieldkitError::decode("capabilities reply without a body")
                    })?;
                    Reply::Capabilities(Capabilities {
                        version: inner.get_u32(1).unwrap_or(0),
                        module_type: ModuleType::from_u32(inner.get_u32(2).unwrap_or(0))?,
                        name: inner.get_str(3).unwrap_or_default().to_string(),
                        number_of_sensors: inner.get_u32(4).unwrap_or(0),
                    })
                }
            }
            REPLY_READING_STATUS => {
                let state = record
                    .get_message(5)
                    .and_then(|r| r.get_u32(1))
                    .unwrap_or(0);
                Reply::ReadingStatus(ReadingStatusReply {
                    state: ReadingState::from_u32(state)?,
                    reading: record.get_message(6).map(reading_from_record),
                    readings: record.get_messages(7).iter().map(reading_from_record).collect(),
                })
            }
            REPLY_ERROR => Reply::Error {
                message: record
                    .get_message(2)
                    .and_then(|r| r.get_str(1))
                    .unwrap_or_default()
                    .to_string(),
            },
            other => Reply::Unknown(other),
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::protocol::schema;
    use crate::protocol::wire_format::FrameWriter;

    fn roundtrip<M: WireMessage>(message: &M) -> M {
        let record = message.to_record().unwrap();
        let mut buf = [0u8; 256];
        let mut writer = FrameWriter::new(&mut buf);
        schema::encode(&record, &mut writer).unwrap();

        let mut pool = Pool::root("decode", 256);
        let decoded = schema::decode(M::schema(), writer.written(), &mut pool).unwrap();
        M::from_record(&decoded).unwrap()
    }

    #[test]
    fn test_query_roundtrip() {
        let queries = [
            Query::Capabilities {
                version: 1,
                caller_time: 1_500_000_000,
            },
            Query::SensorCapabilities { sensor: 2 },
            Query::BeginTakeReadings { index: 0 },
            Query::ReadingStatus,
            Query::Unknown(42),
        ];
        for query in queries {
            assert_eq!(roundtrip(&query), query);
        }
    }

    #[test]
    fn test_reply_roundtrip() {
        let replies = [
            Reply::Retry,
            Reply::Capabilities(Capabilities {
                version: 1,
                module_type: ModuleType::Sensor,
                name: "NOAA-CTD".to_string(),
                number_of_sensors: 3,
            }),
            Reply::SensorCapabilities(SensorCapabilities {
                id: 1,
                name: "Temperature".to_string(),
                unit_of_measure: "°C".to_string(),
            }),
            Reply::ReadingStatus(ReadingStatusReply::new(ReadingState::Busy)),
            Reply::ReadingStatus(ReadingStatusReply::done(Reading::new(2, 1_000, 32.5))),
            Reply::ReadingStatus(ReadingStatusReply {
                state: ReadingState::Done,
                reading: None,
                readings: vec![Reading::new(0, 5, 1.0), Reading::new(1, 5, 2.0)],
            }),
            Reply::Error {
                message: "no such sensor".to_string(),
            },
        ];
        for reply in replies {
            assert_eq!(roundtrip(&reply), reply);
        }
    }

    #[test]
    fn test_idle_status_encodes_state_zero() {
        let reply = Reply::ReadingStatus(ReadingStatusReply::new(ReadingState::Idle));
        let record = reply.to_record().unwrap();
        assert_eq!(
            record.get_message(5).and_then(|r| r.get_u32(1)),
            Some(ReadingState::Idle as u32)
        );
        assert_eq!(roundtrip(&reply), reply);
    }

    #[test]
    fn test_missing_type_is_unknown_zero() {
        let record = Record::new(&QUERY_SCHEMA);
        assert_eq!(Query::from_record(&record).unwrap(), Query::Unknown(0));
    }

    #[test]
    fn test_unknown_reading_state_is_decode_error() {
        let inner = Record::new(&READING_STATUS_SCHEMA)
            .with(1, Value::Uint32(9))
            .unwrap();
        let record = Record::new(&REPLY_SCHEMA)
            .with(1, Value::Uint32(REPLY_READING_STATUS))
            .unwrap()
            .with(5, Value::Message(inner))
            .unwrap();
        assert!(matches!(
            Reply::from_record(&record),
            Err(FieldkitError::Decode(_))
        ));
    }

    #[test]
    fn test_all_readings_order() {
        let status = ReadingStatusReply {
            state: ReadingState::Done,
            reading: Some(Reading::new(0, 1, 0.0)),
            readings: vec![Reading::new(1, 1, 0.0), Reading::new(2, 1, 0.0)],
        };
        let sensors: Vec<u32> = status.all_readings().map(|r| r.sensor).collect();
        assert_eq!(sensors, vec![0, 1, 2]);
    }
}
