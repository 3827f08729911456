//! Protocol module - wire encoding, message schemas, and framing.
//!
//! - Varint/tag wire encoding (`wire_format`)
//! - Static schemas and the record walker (`schema`)
//! - Typed `Query`/`Reply` messages
//! - Delimited frames, pool-backed serialized messages and their queue

mod frame;
mod messages;
pub mod schema;
pub mod wire_format;

pub use frame::{
    deserialize, encode_frame, framed_len, serialize, Frame, MessageQueue, SerializedMessage,
};
pub use messages::{
    Capabilities, ModuleType, Query, ReadingState, ReadingStatusReply, Reply, SensorCapabilities,
    WireMessage, QUERY_BEGIN_TAKE_READINGS, QUERY_CAPABILITIES, QUERY_READING_STATUS,
    QUERY_SCHEMA, QUERY_SENSOR_CAPABILITIES, REPLY_CAPABILITIES, REPLY_ERROR,
    REPLY_READING_STATUS, REPLY_RETRY, REPLY_SCHEMA,
};
pub use wire_format::PROTOCOL_VERSION;
