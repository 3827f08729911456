//! Bus with canned replies, for driving the master without real modules.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use super::Bus;
use crate::error::{BusErrorKind, FieldkitError, Result};
use crate::protocol::{encode_frame, Reply, WireMessage};

/// Answers reads from per-address reply queues.
///
/// Only addresses that were scripted acknowledge transfers. Once an
/// address's queue is empty it answers RETRY forever.
#[derive(Debug, Default)]
pub struct ScriptedBus {
    replies: BTreeMap<u8, VecDeque<Bytes>>,
    sent: Vec<(u8, Bytes)>,
    reads: usize,
}

impl ScriptedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `address` acknowledge transfers without queueing anything.
    pub fn present(&mut self, address: u8) {
        self.replies.entry(address).or_default();
    }

    /// Queue an encoded message for the next read from `address`.
    pub fn push<M: WireMessage>(&mut self, address: u8, message: &M) -> Result<()> {
        let frame = encode_frame(message)?;
        self.push_raw(address, Bytes::copy_from_slice(frame.as_bytes()));
        Ok(())
    }

    /// Queue raw bytes for the next read from `address`.
    pub fn push_raw(&mut self, address: u8, bytes: Bytes) {
        self.replies.entry(address).or_default().push_back(bytes);
    }

    /// Blocks written so far, with their destination address.
    pub fn sent(&self) -> &[(u8, Bytes)] {
        &self.sent
    }

    /// Number of reads served.
    #[inline]
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl Bus for ScriptedBus {
    fn send_block(&mut self, address: u8, block: &[u8]) -> Result<()> {
        if !self.replies.contains_key(&address) {
            return Err(FieldkitError::Bus {
                address,
                kind: BusErrorKind::AddressNack,
            });
        }
        self.sent.push((address, Bytes::copy_from_slice(block)));
        Ok(())
    }

    fn receive_block(&mut self, address: u8, max_len: usize) -> Result<Bytes> {
        let queue = self.replies.get_mut(&address).ok_or(FieldkitError::Bus {
            address,
            kind: BusErrorKind::AddressNack,
        })?;
        self.reads += 1;

        let bytes = match queue.pop_front() {
            Some(bytes) => bytes,
            None => Bytes::copy_from_slice(encode_frame(&Reply::Retry)?.as_bytes()),
        };
        Ok(bytes.slice(..bytes.len().min(max_len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use crate::protocol::deserialize;

    #[test]
    fn test_scripted_replies_then_retry() {
        let mut bus = ScriptedBus::new();
        bus.push(5, &Reply::Error {
            message: "boom".to_string(),
        })
        .unwrap();

        let mut pool = Pool::root("decode", 64);
        let first: Reply = deserialize(&bus.receive_block(5, 64).unwrap(), &mut pool).unwrap();
        let second: Reply = deserialize(&bus.receive_block(5, 64).unwrap(), &mut pool).unwrap();

        assert!(matches!(first, Reply::Error { .. }));
        assert_eq!(second, Reply::Retry);
        assert_eq!(bus.reads(), 2);
    }

    #[test]
    fn test_unscripted_address_nacks() {
        let mut bus = ScriptedBus::new();
        assert!(bus.send_block(3, b"q").is_err());
        assert!(bus.receive_block(3, 64).is_err());

        bus.present(3);
        assert!(bus.send_block(3, b"q").is_ok());
        assert_eq!(bus.sent().len(), 1);
    }
}
