//! Transport module - the shared serial bus.
//!
//! The firmware talks over a two-wire bus where the master addresses a module,
//! writes a block, and later reads a block back from the same address. A
//! module answers a read by writing to [`RESPOND_ADDRESS`].
//!
//! Provides:
//! - [`Bus`], the blocking block-transfer trait
//! - [`LoopbackBus`], an in-memory bus hosting [`Module`](crate::module::Module)s
//! - [`ScriptedBus`], canned replies for exercising the master alone

mod loopback;
mod scripted;

use bytes::Bytes;

use crate::error::Result;

pub use loopback::{LoopbackBus, Transaction, TransactionKind};
pub use scripted::ScriptedBus;

/// Address meaning "whoever is currently reading from me".
pub const RESPOND_ADDRESS: u8 = 0;

/// Blocking block transfer over the bus.
///
/// Bus access is serialized by `&mut self`; implementations never see two
/// transfers at once.
pub trait Bus {
    /// Write one block to `address`.
    fn send_block(&mut self, address: u8, block: &[u8]) -> Result<()>;

    /// Read up to `max_len` bytes from `address`.
    fn receive_block(&mut self, address: u8, max_len: usize) -> Result<Bytes>;
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn send_block(&mut self, address: u8, block: &[u8]) -> Result<()> {
        (**self).send_block(address, block)
    }

    fn receive_block(&mut self, address: u8, max_len: usize) -> Result<Bytes> {
        (**self).receive_block(address, max_len)
    }
}

/// Bus that collects everything sent to it and has nothing to read.
///
/// A module writes its replies through one of these when the caller only
/// wants the bytes.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    blocks: Vec<(u8, Bytes)>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks written so far, with their destination address.
    pub fn blocks(&self) -> &[(u8, Bytes)] {
        &self.blocks
    }

    /// Every block concatenated in send order.
    pub fn concat(&self) -> Vec<u8> {
        self.blocks
            .iter()
            .flat_map(|(_, block)| block.iter().copied())
            .collect()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
    }
}

impl Bus for ResponseBuffer {
    fn send_block(&mut self, address: u8, block: &[u8]) -> Result<()> {
        self.blocks.push((address, Bytes::copy_from_slice(block)));
        Ok(())
    }

    fn receive_block(&mut self, _address: u8, _max_len: usize) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_buffer_collects_in_order() {
        let mut buffer = ResponseBuffer::new();
        buffer.send_block(RESPOND_ADDRESS, b"ab").unwrap();
        buffer.send_block(RESPOND_ADDRESS, b"cd").unwrap();

        assert_eq!(buffer.blocks().len(), 2);
        assert_eq!(buffer.concat(), b"abcd".to_vec());
        assert!(buffer.receive_block(8, 64).unwrap().is_empty());

        buffer.clear();
        assert!(buffer.blocks().is_empty());
    }

    #[test]
    fn test_bus_through_mut_ref() {
        fn send(bus: &mut dyn Bus) {
            bus.send_block(3, b"x").unwrap();
        }
        fn send_owned<B: Bus>(mut bus: B) {
            bus.send_block(4, b"y").unwrap();
        }
        let mut buffer = ResponseBuffer::new();
        send(&mut buffer);
        send_owned(&mut buffer);

        assert_eq!(buffer.blocks()[0].0, 3);
        assert_eq!(buffer.blocks()[1].0, 4);
    }
}
