//! In-memory bus hosting modules by address.
//!
//! Each transfer is delivered straight to the addressed [`Module`]:
//!
//! ```text
//! send_block(addr, q)    ─► module.on_receive(q) ─► module.tick()
//! receive_block(addr, n) ─► module.on_request()  ─► module.tick()
//!                        ◄─ first reply, truncated to n bytes
//! ```
//!
//! A module writes every queued reply in one `on_request`. The bus hands them
//! out one frame per read, so later replies wait for the next reads.
//!
//! The tick after each transfer stands in for the module's firmware loop
//! running between bus transactions. A stalled module skips those ticks, so
//! it keeps answering RETRY.

use std::collections::{BTreeMap, VecDeque};

use bytes::Bytes;

use super::{Bus, ResponseBuffer};
use crate::error::{BusErrorKind, FieldkitError, Result};
use crate::module::Module;
use crate::pool::budget::MAX_FRAME_SIZE;

/// Direction of a logged transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Send,
    Receive,
}

/// One logged transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub address: u8,
    pub kind: TransactionKind,
    /// Bytes written, or bytes returned to the reader.
    pub len: usize,
}

/// Bus that delivers transfers to in-process modules.
#[derive(Debug, Default)]
pub struct LoopbackBus {
    modules: BTreeMap<u8, Module>,
    stalls: BTreeMap<u8, usize>,
    backlog: BTreeMap<u8, VecDeque<Bytes>>,
    log: Vec<Transaction>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a module on the bus at its own address.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the address is already taken.
    pub fn attach(&mut self, module: Module) -> Result<()> {
        let address = module.address();
        if self.modules.contains_key(&address) {
            return Err(FieldkitError::Config(format!(
                "address {} is already in use",
                address
            )));
        }
        tracing::debug!("Loopback: '{}' attached at {}", module.name(), address);
        self.modules.insert(address, module);
        Ok(())
    }

    /// Builder form of [`attach`](Self::attach).
    pub fn with_module(mut self, module: Module) -> Result<Self> {
        self.attach(module)?;
        Ok(self)
    }

    /// Take a module off the bus.
    pub fn detach(&mut self, address: u8) -> Option<Module> {
        self.stalls.remove(&address);
        self.backlog.remove(&address);
        self.modules.remove(&address)
    }

    pub fn module(&self, address: u8) -> Option<&Module> {
        self.modules.get(&address)
    }

    pub fn module_mut(&mut self, address: u8) -> Option<&mut Module> {
        self.modules.get_mut(&address)
    }

    /// Addresses with a module attached, ascending.
    pub fn addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.modules.keys().copied()
    }

    /// Freeze the module at `address` for the next `requests` reads.
    pub fn stall(&mut self, address: u8, requests: usize) {
        self.stalls.insert(address, requests);
    }

    /// Run one firmware loop pass on every module.
    pub fn tick_all(&mut self) {
        for module in self.modules.values_mut() {
            module.tick();
        }
    }

    /// Every transfer so far, in order.
    pub fn transactions(&self) -> &[Transaction] {
        &self.log
    }

    /// True if any transfer targeted `address`.
    pub fn touched(&self, address: u8) -> bool {
        self.log.iter().any(|t| t.address == address)
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Replies already written by the module at `address` but not yet read.
    pub fn backlog(&self, address: u8) -> usize {
        self.backlog.get(&address).map_or(0, VecDeque::len)
    }

    fn is_stalled(&self, address: u8) -> bool {
        self.stalls.get(&address).is_some_and(|n| *n > 0)
    }

    fn nack(address: u8) -> FieldkitError {
        FieldkitError::Bus {
            address,
            kind: BusErrorKind::AddressNack,
        }
    }
}

impl Bus for LoopbackBus {
    fn send_block(&mut self, address: u8, block: &[u8]) -> Result<()> {
        self.log.push(Transaction {
            address,
            kind: TransactionKind::Send,
            len: block.len(),
        });

        if block.len() > MAX_FRAME_SIZE {
            return Err(FieldkitError::Bus {
                address,
                kind: BusErrorKind::DataTooLong,
            });
        }

        let stalled = self.is_stalled(address);
        let module = self
            .modules
            .get_mut(&address)
            .ok_or_else(|| Self::nack(address))?;
        module.on_receive(block);
        if !stalled {
            module.tick();
        }
        Ok(())
    }

    fn receive_block(&mut self, address: u8, max_len: usize) -> Result<Bytes> {
        let stalled = self.is_stalled(address);
        let module = match self.modules.get_mut(&address) {
            Some(module) => module,
            None => {
                self.log.push(Transaction {
                    address,
                    kind: TransactionKind::Receive,
                    len: 0,
                });
                return Err(Self::nack(address));
            }
        };

        let backlog = self.backlog.entry(address).or_default();
        if backlog.is_empty() {
            let mut response = ResponseBuffer::new();
            module.on_request(&mut response)?;
            backlog.extend(response.blocks().iter().map(|(_, block)| block.clone()));
        }
        let mut bytes = backlog.pop_front().unwrap_or_default();
        if !backlog.is_empty() {
            tracing::debug!(
                "Loopback: {} replies from {} held for later reads",
                backlog.len(),
                address
            );
        }

        if stalled {
            if let Some(remaining) = self.stalls.get_mut(&address) {
                *remaining -= 1;
            }
        } else {
            module.tick();
        }

        bytes.truncate(max_len);
        self.log.push(Transaction {
            address,
            kind: TransactionKind::Receive,
            len: bytes.len(),
        });
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::module::{ModuleState, ReadingOutcome};
    use crate::pool::Pool;
    use crate::protocol::{deserialize, encode_frame, Query, Reply};

    fn module(address: u8) -> Module {
        Module::builder()
            .address(address)
            .name("loop")
            .sensor("Depth", "m")
            .clock(ManualClock::new(0))
            .on_begin_reading(|_, _| Ok(ReadingOutcome::Pending))
            .build(None)
            .unwrap()
    }

    fn decode(bytes: &[u8]) -> Reply {
        let mut pool = Pool::root("decode", 128);
        deserialize(bytes, &mut pool).unwrap()
    }

    #[test]
    fn test_empty_address_nacks() {
        let mut bus = LoopbackBus::new();
        let err = bus.send_block(9, &[0x00]).unwrap_err();
        assert!(matches!(
            err,
            FieldkitError::Bus {
                address: 9,
                kind: BusErrorKind::AddressNack
            }
        ));
        assert!(bus.receive_block(9, MAX_FRAME_SIZE).is_err());
        assert_eq!(bus.transactions().len(), 2);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        assert!(matches!(bus.attach(module(8)), Err(FieldkitError::Config(_))));
        assert_eq!(bus.addresses().collect::<Vec<_>>(), vec![8]);
    }

    #[test]
    fn test_query_roundtrip_through_module() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        bus.tick_all();

        let frame = encode_frame(&Query::SensorCapabilities { sensor: 0 }).unwrap();
        bus.send_block(8, frame.as_bytes()).unwrap();
        let reply = decode(&bus.receive_block(8, MAX_FRAME_SIZE).unwrap());

        assert!(matches!(reply, Reply::SensorCapabilities(c) if c.name == "Depth"));
        assert!(bus.touched(8));
        assert_eq!(bus.transactions()[0].kind, TransactionKind::Send);
        assert_eq!(bus.transactions()[1].kind, TransactionKind::Receive);
    }

    #[test]
    fn test_stalled_module_retries() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        bus.tick_all();
        bus.stall(8, 2);

        let frame = encode_frame(&Query::ReadingStatus).unwrap();
        bus.send_block(8, frame.as_bytes()).unwrap();
        assert_eq!(decode(&bus.receive_block(8, 64).unwrap()), Reply::Retry);
        assert_eq!(decode(&bus.receive_block(8, 64).unwrap()), Reply::Retry);
        // The stall is over: this read ticks and the next one gets the reply
        assert_eq!(decode(&bus.receive_block(8, 64).unwrap()), Reply::Retry);
        assert!(matches!(
            decode(&bus.receive_block(8, 64).unwrap()),
            Reply::ReadingStatus(_)
        ));
    }

    #[test]
    fn test_queued_replies_one_per_read() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        bus.tick_all();

        // Each write is processed by the tick that follows it
        for sensor in [0, 5] {
            let frame = encode_frame(&Query::SensorCapabilities { sensor }).unwrap();
            bus.send_block(8, frame.as_bytes()).unwrap();
        }
        assert_eq!(bus.module(8).unwrap().queued_replies(), 2);

        let first = decode(&bus.receive_block(8, MAX_FRAME_SIZE).unwrap());
        assert!(matches!(first, Reply::SensorCapabilities(c) if c.name == "Depth"));
        assert_eq!(bus.backlog(8), 1);

        let second = decode(&bus.receive_block(8, MAX_FRAME_SIZE).unwrap());
        assert!(matches!(second, Reply::Error { .. }));
        assert_eq!(bus.backlog(8), 0);

        assert_eq!(decode(&bus.receive_block(8, MAX_FRAME_SIZE).unwrap()), Reply::Retry);
    }

    #[test]
    fn test_receive_truncates() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        let bytes = bus.receive_block(8, 1).unwrap();
        assert_eq!(bytes.len(), 1);
    }

    #[test]
    fn test_detach() {
        let mut bus = LoopbackBus::new().with_module(module(8)).unwrap();
        let module = bus.detach(8).unwrap();
        assert_eq!(module.state(), ModuleState::Start);
        assert!(bus.module(8).is_none());
    }
}
