//! Delimited frames and pool-backed serialized messages.
//!
//! A frame is one top-level record prefixed by its varint length. It must be
//! smaller than [`MAX_FRAME_SIZE`] and is always built in a stack buffer first,
//! so an oversized message never touches a pool.
//!
//! # Example
//!
//! ```
//! use fieldkit_bus::pool::Pool;
//! use fieldkit_bus::protocol::{deserialize, serialize, Query};
//!
//! let mut pool = Pool::root("reply", 128);
//! let message = serialize(&Query::ReadingStatus, &mut pool).unwrap();
//! let bytes = message.bytes(&pool).unwrap();
//!
//! let query: Query = deserialize(&bytes, &mut pool).unwrap();
//! assert_eq!(query, Query::ReadingStatus);
//! ```

use std::collections::VecDeque;

use bytes::Bytes;

use super::messages::WireMessage;
use super::schema;
use super::wire_format::{varint_len, FrameReader, FrameWriter};
use crate::error::{FieldkitError, Result};
use crate::pool::budget::MAX_FRAME_SIZE;
use crate::pool::{Block, Pool};

/// An encoded, length-prefixed message on the stack.
#[derive(Clone)]
pub struct Frame {
    buf: [u8; MAX_FRAME_SIZE],
    len: usize,
}

impl Frame {
    /// The encoded bytes, length prefix included.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.len)
            .field("bytes", &self.as_bytes())
            .finish()
    }
}

/// Size of `message` once framed, length prefix included.
pub fn framed_len<M: WireMessage>(message: &M) -> Result<usize> {
    let body = schema::encoded_len(&message.to_record()?);
    Ok(varint_len(body as u64) + body)
}

/// Encode `message` as a delimited frame.
///
/// # Errors
///
/// Returns `FrameTooLarge` unless the framed size is below `MAX_FRAME_SIZE`.
pub fn encode_frame<M: WireMessage>(message: &M) -> Result<Frame> {
    let record = message.to_record()?;
    let body = schema::encoded_len(&record);
    let size = varint_len(body as u64) + body;
    if size >= MAX_FRAME_SIZE {
        return Err(FieldkitError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut buf = [0u8; MAX_FRAME_SIZE];
    let mut writer = FrameWriter::new(&mut buf);
    writer.write_varint(body as u64)?;
    schema::encode(&record, &mut writer)?;
    let len = writer.position();

    Ok(Frame { buf, len })
}

/// Decode one delimited frame. Bytes past the frame are ignored.
///
/// Strings and repeated elements are charged to `pool`.
pub fn deserialize<M: WireMessage>(bytes: &[u8], pool: &mut Pool) -> Result<M> {
    let mut reader = FrameReader::new(bytes);
    let body = reader.read_length_delimited()?;
    let record = schema::decode(M::schema(), body, pool)?;
    M::from_record(&record)
}

/// An encoded frame stored in a pool, waiting to be sent or processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializedMessage {
    block: Block,
}

impl SerializedMessage {
    /// Copy raw received bytes into `pool`.
    pub fn from_bytes(bytes: &[u8], pool: &mut Pool) -> Result<Self> {
        let block = pool.alloc_copy(bytes)?;
        Ok(Self { block })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.block.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    #[inline]
    pub fn block(&self) -> &Block {
        &self.block
    }

    /// The frame bytes. Fails with `StaleBlock` once the pool was emptied.
    pub fn bytes(&self, pool: &Pool) -> Result<Bytes> {
        pool.read(&self.block)
    }
}

/// Encode `message` and copy the frame into `pool`.
///
/// The size check runs before any allocation, so a failure leaves the pool
/// untouched.
pub fn serialize<M: WireMessage>(message: &M, pool: &mut Pool) -> Result<SerializedMessage> {
    let frame = encode_frame(message)?;
    SerializedMessage::from_bytes(frame.as_bytes(), pool)
}

/// FIFO of serialized messages pending transmission.
#[derive(Debug, Default)]
pub struct MessageQueue {
    messages: VecDeque<SerializedMessage>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, message: SerializedMessage) {
        self.messages.push_back(message);
    }

    pub fn pop_front(&mut self) -> Option<SerializedMessage> {
        self.messages.pop_front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{Capabilities, ModuleType, Query, Reply};
    use crate::readings::Reading;

    #[test]
    fn test_encode_frame_has_length_prefix() {
        let frame = encode_frame(&Query::ReadingStatus).unwrap();
        // len=2, field 1 varint 4
        assert_eq!(frame.as_bytes(), &[0x02, 0x08, 0x04]);
        assert_eq!(frame.len(), framed_len(&Query::ReadingStatus).unwrap());
    }

    #[test]
    fn test_serialize_deserialize() {
        let mut pool = Pool::root("reply", 256);
        let reply = Reply::Capabilities(Capabilities {
            version: 1,
            module_type: ModuleType::Sensor,
            name: "NOAA-CTD".to_string(),
            number_of_sensors: 3,
        });

        let message = serialize(&reply, &mut pool).unwrap();
        let bytes = message.bytes(&pool).unwrap();
        assert_eq!(bytes.len(), message.len());

        let decoded: Reply = deserialize(&bytes, &mut pool).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_frame_too_large_leaves_pool_untouched() {
        let mut pool = Pool::root("reply", 256);
        let reply = Reply::Error {
            message: "x".repeat(MAX_FRAME_SIZE),
        };

        let err = serialize(&reply, &mut pool).unwrap_err();
        assert!(matches!(err, FieldkitError::FrameTooLarge { max: MAX_FRAME_SIZE, .. }));
        assert_eq!(pool.used(), 0);
    }

    #[test]
    fn test_frame_size_boundary() {
        // Reply{type=4, error{message}}: 2 + 2 + 2 + n bytes of body, 1 byte prefix
        let fits = Reply::Error {
            message: "x".repeat(MAX_FRAME_SIZE - 8),
        };
        assert_eq!(framed_len(&fits).unwrap(), MAX_FRAME_SIZE - 1);
        assert!(encode_frame(&fits).is_ok());

        let too_big = Reply::Error {
            message: "x".repeat(MAX_FRAME_SIZE - 7),
        };
        assert!(matches!(
            encode_frame(&too_big),
            Err(FieldkitError::FrameTooLarge { size, .. }) if size == MAX_FRAME_SIZE
        ));
    }

    #[test]
    fn test_deserialize_truncated() {
        let frame = encode_frame(&Reply::Retry).unwrap();
        let bytes = frame.as_bytes();
        let mut pool = Pool::root("reply", 64);

        let result: Result<Reply> = deserialize(&bytes[..bytes.len() - 1], &mut pool);
        assert!(matches!(result, Err(FieldkitError::Decode(_))));

        let empty: Result<Reply> = deserialize(&[], &mut pool);
        assert!(empty.is_err());
    }

    #[test]
    fn test_deserialize_ignores_padding() {
        let frame = encode_frame(&Reply::Retry).unwrap();
        let mut padded = frame.as_bytes().to_vec();
        padded.extend_from_slice(&[0xFF; 8]);

        let mut pool = Pool::root("reply", 64);
        let reply: Reply = deserialize(&padded, &mut pool).unwrap();
        assert_eq!(reply, Reply::Retry);
    }

    #[test]
    fn test_serialized_message_goes_stale() {
        let mut pool = Pool::root("reply", 128);
        let message = serialize(&Reply::Retry, &mut pool).unwrap();
        pool.empty();
        assert!(matches!(
            message.bytes(&pool),
            Err(FieldkitError::StaleBlock { .. })
        ));
    }

    #[test]
    fn test_message_queue_fifo() {
        let mut pool = Pool::root("reply", 256);
        let mut queue = MessageQueue::new();
        for sensor in 0..3 {
            let reply = Reply::ReadingStatus(crate::protocol::ReadingStatusReply::done(
                Reading::new(sensor, 0, 0.0),
            ));
            queue.push_back(serialize(&reply, &mut pool).unwrap());
        }
        assert_eq!(queue.len(), 3);

        let mut sensors = Vec::new();
        while let Some(message) = queue.pop_front() {
            let bytes = message.bytes(&pool).unwrap();
            if let Reply::ReadingStatus(status) = deserialize::<Reply>(&bytes, &mut pool).unwrap() {
                sensors.extend(status.reading.map(|r| r.sensor));
            }
        }
        assert_eq!(sensors, vec![0, 1, 2]);
        assert!(queue.is_empty());
    }
}
