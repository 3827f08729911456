//! Static message schemas and the generic record walker.
//!
//! A [`Schema`] lists the fields of one message type. Each field has a number,
//! a name used in diagnostics, and a [`FieldKind`] taken from a closed set.
//! The walker functions [`encoded_len`], [`encode`] and [`decode`] dispatch on
//! the kind, so no message type carries its own codec.
//!
//! ```
//! use fieldkit_bus::pool::Pool;
//! use fieldkit_bus::protocol::schema::{self, FieldDescriptor, FieldKind, Record, Schema, Value};
//! use fieldkit_bus::protocol::wire_format::FrameWriter;
//!
//! static POINT: Schema = Schema {
//!     name: "Point",
//!     fields: &[
//!         FieldDescriptor { number: 1, name: "x", kind: FieldKind::Uint32 },
//!         FieldDescriptor { number: 2, name: "label", kind: FieldKind::String },
//!     ],
//! };
//!
//! let mut record = Record::new(&POINT);
//! record.set(1, Value::Uint32(7)).unwrap();
//! record.set(2, Value::String("a".into())).unwrap();
//!
//! let mut buf = [0u8; 16];
//! let mut writer = FrameWriter::new(&mut buf);
//! schema::encode(&record, &mut writer).unwrap();
//! assert_eq!(writer.position(), schema::encoded_len(&record));
//!
//! let mut pool = Pool::root("decode", 32);
//! let decoded = schema::decode(&POINT, writer.written(), &mut pool).unwrap();
//! assert_eq!(decoded, record);
//! ```

use bytes::Bytes;

use super::wire_format::{tag_len, varint_len, FrameReader, FrameWriter, WireType};
use crate::error::{FieldkitError, Result};
use crate::pool::budget::{align_up, LIST_HEAD_FOOTPRINT};
use crate::pool::Pool;

/// Value layout of one field.
#[derive(Debug, PartialEq)]
pub enum FieldKind {
    Uint32,
    Float,
    /// UTF-8 text; decoding charges `len + 1` bytes to the pool.
    String,
    Bytes,
    Message(&'static Schema),
    /// Repeated sub-message; decoding charges a list head plus one node per element.
    RepeatedMessage(&'static Schema),
    RepeatedFloat,
}

impl FieldKind {
    fn wire_type(&self) -> WireType {
        match self {
            FieldKind::Uint32 => WireType::Varint,
            FieldKind::Float | FieldKind::RepeatedFloat => WireType::Fixed32,
            FieldKind::String
            | FieldKind::Bytes
            | FieldKind::Message(_)
            | FieldKind::RepeatedMessage(_) => WireType::LengthDelimited,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldKind::Uint32, Value::Uint32(_))
            | (FieldKind::Float, Value::Float(_))
            | (FieldKind::String, Value::String(_))
            | (FieldKind::Bytes, Value::Bytes(_))
            | (FieldKind::RepeatedFloat, Value::RepeatedFloat(_)) => true,
            (FieldKind::Message(schema), Value::Message(record)) => {
                record.schema.name == schema.name
            }
            (FieldKind::RepeatedMessage(schema), Value::RepeatedMessage(records)) => {
                records.iter().all(|r| r.schema.name == schema.name)
            }
            _ => false,
        }
    }
}

/// One field of a schema.
#[derive(Debug, PartialEq)]
pub struct FieldDescriptor {
    pub number: u32,
    pub name: &'static str,
    pub kind: FieldKind,
}

/// A message type: its name and its fields in ascending number order.
#[derive(Debug, PartialEq)]
pub struct Schema {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl Schema {
    /// Position and descriptor of field `number`.
    pub fn field(&self, number: u32) -> Option<(usize, &FieldDescriptor)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.number == number)
    }

    /// Bytes charged per element when this schema is decoded as a list node.
    #[inline]
    pub fn node_footprint(&self) -> usize {
        align_up(self.fields.len() * 4)
    }
}

/// A decoded or to-be-encoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint32(u32),
    Float(f32),
    String(String),
    Bytes(Bytes),
    Message(Record),
    RepeatedMessage(Vec<Record>),
    RepeatedFloat(Vec<f32>),
}

/// Field values of one message, indexed by schema position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static Schema,
    values: Vec<Option<Value>>,
}

impl Record {
    /// Create a record with every field absent.
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: vec![None; schema.fields.len()],
        }
    }

    #[inline]
    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Set field `number`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the schema has no such field or the value
    /// does not match its kind.
    pub fn set(&mut self, number: u32, value: Value) -> Result<()> {
        let (index, field) = self.schema.field(number).ok_or_else(|| {
            FieldkitError::InvalidState(format!("{} has no field {}", self.schema.name, number))
        })?;
        if !field.kind.accepts(&value) {
            return Err(FieldkitError::InvalidState(format!(
                "value for {}.{} does not match {:?}",
                self.schema.name, field.name, field.kind
            )));
        }
        self.values[index] = Some(value);
        Ok(())
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, number: u32, value: Value) -> Result<Self> {
        self.set(number, value)?;
        Ok(self)
    }

    /// Value of field `number`, if present.
    pub fn get(&self, number: u32) -> Option<&Value> {
        let (index, _) = self.schema.field(number)?;
        self.values[index].as_ref()
    }

    #[inline]
    pub fn has(&self, number: u32) -> bool {
        self.get(number).is_some()
    }

    pub fn get_u32(&self, number: u32) -> Option<u32> {
        match self.get(number)? {
            Value::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_float(&self, number: u32) -> Option<f32> {
        match self.get(number)? {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, number: u32) -> Option<&str> {
        match self.get(number)? {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn get_bytes(&self, number: u32) -> Option<&Bytes> {
        match self.get(number)? {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_message(&self, number: u32) -> Option<&Record> {
        match self.get(number)? {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a repeated message field; empty when absent.
    pub fn get_messages(&self, number: u32) -> &[Record] {
        match self.get(number) {
            Some(Value::RepeatedMessage(v)) => v,
            _ => &[],
        }
    }

    /// Elements of a repeated float field; empty when absent.
    pub fn get_floats(&self, number: u32) -> &[f32] {
        match self.get(number) {
            Some(Value::RepeatedFloat(v)) => v,
            _ => &[],
        }
    }

    fn present(&self) -> impl Iterator<Item = (&'static FieldDescriptor, &Value)> + '_ {
        self.schema
            .fields
            .iter()
            .zip(self.values.iter())
            .filter_map(|(field, value)| value.as_ref().map(|v| (field, v)))
    }
}

#[inline]
fn delimited_len(len: usize) -> usize {
    varint_len(len as u64) + len
}

/// Encoded size of `record` without its own length prefix.
pub fn encoded_len(record: &Record) -> usize {
    record
        .present()
        .map(|(field, value)| {
            let tag = tag_len(field.number);
            match value {
                Value::Uint32(v) => tag + varint_len(u64::from(*v)),
                Value::Float(_) => tag + 4,
                Value::String(s) => tag + delimited_len(s.len()),
                Value::Bytes(b) => tag + delimited_len(b.len()),
                Value::Message(m) => tag + delimited_len(encoded_len(m)),
                Value::RepeatedMessage(items) => items
                    .iter()
                    .map(|m| tag + delimited_len(encoded_len(m)))
                    .sum(),
                Value::RepeatedFloat(items) => items.len() * (tag + 4),
            }
        })
        .sum()
}

/// Encode `record` field by field in schema order.
pub fn encode(record: &Record, writer: &mut FrameWriter<'_>) -> Result<()> {
    for (field, value) in record.present() {
        let number = field.number;
        match value {
            Value::Uint32(v) => {
                writer.write_tag(number, WireType::Varint)?;
                writer.write_varint(u64::from(*v))?;
            }
            Value::Float(v) => {
                writer.write_tag(number, WireType::Fixed32)?;
                writer.write_float(*v)?;
            }
            Value::String(s) => {
                writer.write_tag(number, WireType::LengthDelimited)?;
                writer.write_length_delimited(s.as_bytes())?;
            }
            Value::Bytes(b) => {
                writer.write_tag(number, WireType::LengthDelimited)?;
                writer.write_length_delimited(b)?;
            }
            Value::Message(m) => encode_submessage(number, m, writer)?,
            Value::RepeatedMessage(items) => {
                for m in items {
                    encode_submessage(number, m, writer)?;
                }
            }
            Value::RepeatedFloat(items) => {
                for v in items {
                    writer.write_tag(number, WireType::Fixed32)?;
                    writer.write_float(*v)?;
                }
            }
        }
    }
    Ok(())
}

fn encode_submessage(number: u32, record: &Record, writer: &mut FrameWriter<'_>) -> Result<()> {
    writer.write_tag(number, WireType::LengthDelimited)?;
    writer.write_varint(encoded_len(record) as u64)?;
    encode(record, writer)
}

/// Decode one record of `schema` from `bytes` (no length prefix).
///
/// Strings and repeated-message nodes are charged to `pool`. Unknown field
/// numbers are skipped; a known field arriving with the wrong wire type is a
/// decode error.
pub fn decode(schema: &'static Schema, bytes: &[u8], pool: &mut Pool) -> Result<Record> {
    let mut record = Record::new(schema);
    let mut reader = FrameReader::new(bytes);

    while !reader.is_empty() {
        let (number, wire_type) = reader.read_tag()?;
        let Some((index, field)) = schema.field(number) else {
            tracing::trace!("{}: skipping unknown field {}", schema.name, number);
            reader.skip(wire_type)?;
            continue;
        };

        let packed_floats =
            matches!(field.kind, FieldKind::RepeatedFloat) && wire_type == WireType::LengthDelimited;
        if wire_type != field.kind.wire_type() && !packed_floats {
            return Err(FieldkitError::decode(format!(
                "{}.{}: expected wire type {:?}, got {:?}",
                schema.name,
                field.name,
                field.kind.wire_type(),
                wire_type
            )));
        }

        let slot = &mut record.values[index];
        match field.kind {
            FieldKind::Uint32 => *slot = Some(Value::Uint32(reader.read_u32()?)),
            FieldKind::Float => *slot = Some(Value::Float(reader.read_float()?)),
            FieldKind::String => {
                let raw = reader.read_length_delimited()?;
                let text = std::str::from_utf8(raw).map_err(|e| {
                    FieldkitError::decode(format!("{}.{}: {}", schema.name, field.name, e))
                })?;
                pool.alloc_str(text)?;
                *slot = Some(Value::String(text.to_string()));
            }
            FieldKind::Bytes => {
                let raw = reader.read_length_delimited()?;
                pool.alloc_copy(raw)?;
                *slot = Some(Value::Bytes(Bytes::copy_from_slice(raw)));
            }
            FieldKind::Message(sub) => {
                let raw = reader.read_length_delimited()?;
                *slot = Some(Value::Message(decode(sub, raw, pool)?));
            }
            FieldKind::RepeatedMessage(sub) => {
                let raw = reader.read_length_delimited()?;
                let element = decode(sub, raw, pool)?;
                if slot.is_none() {
                    pool.alloc(LIST_HEAD_FOOTPRINT)?;
                    *slot = Some(Value::RepeatedMessage(Vec::new()));
                }
                pool.alloc(sub.node_footprint())?;
                if let Some(Value::RepeatedMessage(items)) = slot {
                    items.push(element);
                }
            }
            FieldKind::RepeatedFloat => {
                let mut incoming = Vec::new();
                if packed_floats {
                    let mut packed = FrameReader::new(reader.read_length_delimited()?);
                    while !packed.is_empty() {
                        incoming.push(packed.read_float()?);
                    }
                } else {
                    incoming.push(reader.read_float()?);
                }
                match slot {
                    Some(Value::RepeatedFloat(items)) => items.extend(incoming),
                    _ => *slot = Some(Value::RepeatedFloat(incoming)),
                }
            }
        }
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    static SAMPLE: Schema = Schema {
        name: "Sample",
        fields: &[
            FieldDescriptor {
                number: 1,
                name: "sensor",
                kind: FieldKind::Uint32,
            },
            FieldDescriptor {
                number: 2,
                name: "value",
                kind: FieldKind::Float,
            },
        ],
    };

    static BATCH: Schema = Schema {
        name: "Batch",
        fields: &[
            FieldDescriptor {
                number: 1,
                name: "label",
                kind: FieldKind::String,
            },
            FieldDescriptor {
                number: 2,
                name: "blob",
                kind: FieldKind::Bytes,
            },
            FieldDescriptor {
                number: 3,
                name: "first",
                kind: FieldKind::Message(&SAMPLE),
            },
            FieldDescriptor {
                number: 4,
                name: "samples",
                kind: FieldKind::RepeatedMessage(&SAMPLE),
            },
            FieldDescriptor {
                number: 5,
                name: "floats",
                kind: FieldKind::RepeatedFloat,
            },
        ],
    };

    fn sample(sensor: u32, value: f32) -> Record {
        let mut record = Record::new(&SAMPLE);
        record.set(1, Value::Uint32(sensor)).unwrap();
        record.set(2, Value::Float(value)).unwrap();
        record
    }

    fn encode_to_vec(record: &Record) -> Vec<u8> {
        let mut buf = [0u8; 128];
        let mut writer = FrameWriter::new(&mut buf);
        encode(record, &mut writer).unwrap();
        assert_eq!(writer.position(), encoded_len(record));
        writer.written().to_vec()
    }

    #[test]
    fn test_known_bytes() {
        let bytes = encode_to_vec(&sample(1, 1.0));
        assert_eq!(bytes, vec![0x08, 0x01, 0x15, 0x00, 0x00, 0x80, 0x3F]);
    }

    #[test]
    fn test_absent_fields_are_not_encoded() {
        let record = Record::new(&BATCH);
        assert_eq!(encoded_len(&record), 0);
        assert!(encode_to_vec(&record).is_empty());
    }

    #[test]
    fn test_nested_and_repeated_roundtrip() {
        let record = Record::new(&BATCH)
            .with(1, Value::String("ctd".into()))
            .unwrap()
            .with(2, Value::Bytes(Bytes::from_static(&[1, 2, 3])))
            .unwrap()
            .with(3, Value::Message(sample(0, 0.5)))
            .unwrap()
            .with(4, Value::RepeatedMessage(vec![sample(1, 1.5), sample(2, 2.5)]))
            .unwrap()
            .with(5, Value::RepeatedFloat(vec![0.25, 4.0]))
            .unwrap();

        let bytes = encode_to_vec(&record);
        let mut pool = Pool::root("decode", 128);
        let decoded = decode(&BATCH, &bytes, &mut pool).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.get_str(1), Some("ctd"));
        assert_eq!(decoded.get_messages(4).len(), 2);
        assert_eq!(decoded.get_floats(5), &[0.25, 4.0]);
    }

    #[test]
    fn test_decode_charges_pool() {
        let record = Record::new(&BATCH)
            .with(1, Value::String("abc".into()))
            .unwrap()
            .with(4, Value::RepeatedMessage(vec![sample(1, 1.0), sample(2, 2.0)]))
            .unwrap();
        let bytes = encode_to_vec(&record);

        let mut pool = Pool::root("decode", 128);
        decode(&BATCH, &bytes, &mut pool).unwrap();

        // "abc\0", list head, two nodes
        let expected = align_up(4) + LIST_HEAD_FOOTPRINT + 2 * SAMPLE.node_footprint();
        assert_eq!(pool.used(), expected);
    }

    #[test]
    fn test_decode_exhausts_pool() {
        let record = Record::new(&BATCH)
            .with(1, Value::String("a longer label".into()))
            .unwrap();
        let bytes = encode_to_vec(&record);

        let mut pool = Pool::root("tiny", 4);
        let err = decode(&BATCH, &bytes, &mut pool).unwrap_err();
        assert!(matches!(err, FieldkitError::PoolExhausted { .. }));
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut bytes = encode_to_vec(&sample(3, 3.0));
        // field 9, varint 150
        bytes.extend_from_slice(&[0x48, 0x96, 0x01]);
        // field 10, 2 delimited bytes
        bytes.extend_from_slice(&[0x52, 0x02, 0xAA, 0xBB]);

        let mut pool = Pool::root("decode", 16);
        let decoded = decode(&SAMPLE, &bytes, &mut pool).unwrap();
        assert_eq!(decoded, sample(3, 3.0));
    }

    #[test]
    fn test_wire_type_mismatch_is_error() {
        // field 1 (Uint32) sent as fixed32
        let bytes = [0x0D, 0x01, 0x00, 0x00, 0x00];
        let mut pool = Pool::root("decode", 16);
        let err = decode(&SAMPLE, &bytes, &mut pool).unwrap_err();
        assert!(err.to_string().contains("Sample.sensor"));
    }

    #[test]
    fn test_truncated_input_is_error() {
        let bytes = encode_to_vec(&sample(1, 1.0));
        let mut pool = Pool::root("decode", 16);
        assert!(matches!(
            decode(&SAMPLE, &bytes[..bytes.len() - 1], &mut pool),
            Err(FieldkitError::Decode(_))
        ));
    }

    #[test]
    fn test_packed_floats_are_accepted() {
        // field 5, packed: two floats
        let bytes = [0x2A, 0x08, 0, 0, 0x80, 0x3F, 0, 0, 0, 0x40];
        let mut pool = Pool::root("decode", 16);
        let decoded = decode(&BATCH, &bytes, &mut pool).unwrap();
        assert_eq!(decoded.get_floats(5), &[1.0, 2.0]);
    }

    #[test]
    fn test_set_rejects_wrong_kind_and_unknown_field() {
        let mut record = Record::new(&SAMPLE);
        assert!(record.set(1, Value::Float(1.0)).is_err());
        assert!(record.set(7, Value::Uint32(1)).is_err());
        assert!(record.set(1, Value::Uint32(1)).is_ok());
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let bytes = [0x0A, 0x02, 0xC3, 0x28];
        let mut pool = Pool::root("decode", 16);
        assert!(matches!(
            decode(&BATCH, &bytes, &mut pool),
            Err(FieldkitError::Decode(_))
        ));
    }
}
