//! Sensor readings and the pool-charged FIFO that holds them.

use std::collections::vec_deque::{self, VecDeque};

use crate::error::Result;
use crate::pool::budget::{LIST_HEAD_FOOTPRINT, READING_FOOTPRINT};
use crate::pool::Pool;

/// One timestamped sensor value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Sensor id within its module.
    pub sensor: u32,
    /// Unix seconds when the value was taken.
    pub time: u32,
    /// Measured value.
    pub value: f32,
}

impl Reading {
    /// Create a new reading.
    pub fn new(sensor: u32, time: u32, value: f32) -> Self {
        Self {
            sensor,
            time,
            value,
        }
    }
}

/// Ordered readings whose storage is charged against a pool.
///
/// The list head is charged lazily on the first push, then every reading
/// costs [`READING_FOOTPRINT`]. The charge is released only when the pool is
/// emptied, so a `Readings` must not outlive its pool's cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    items: VecDeque<Reading>,
    head_charged: bool,
}

impl Readings {
    /// Create an empty list. Nothing is charged until the first push.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading, charging `pool` for it.
    ///
    /// # Errors
    ///
    /// Returns `PoolExhausted` if the pool cannot hold the reading; the list
    /// is unchanged in that case.
    pub fn push(&mut self, pool: &mut Pool, reading: Reading) -> Result<()> {
        if !self.head_charged {
            pool.alloc(LIST_HEAD_FOOTPRINT)?;
            self.head_charged = true;
        }
        pool.alloc(READING_FOOTPRINT)?;
        self.items.push_back(reading);
        Ok(())
    }

    /// Remove and return the oldest reading.
    pub fn pop_front(&mut self) -> Option<Reading> {
        self.items.pop_front()
    }

    /// Oldest reading without removing it.
    pub fn front(&self) -> Option<&Reading> {
        self.items.front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Reading> {
        self.items.iter()
    }

    /// Drop every reading. Pool charges stay until the pool is emptied.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Consume the list into a plain vector, oldest first.
    pub fn into_vec(self) -> Vec<Reading> {
        self.items.into()
    }
}

impl IntoIterator for Readings {
    type Item = Reading;
    type IntoIter = vec_deque::IntoIter<Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Readings {
    type Item = &'a Reading;
    type IntoIter = vec_deque::Iter<'a, Reading>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldkitError;

    #[test]
    fn test_push_charges_head_once() {
        let mut pool = Pool::root("readings", 128);
        let mut readings = Readings::new();
        assert_eq!(pool.used(), 0);

        readings.push(&mut pool, Reading::new(0, 10, 1.5)).unwrap();
        assert_eq!(pool.used(), LIST_HEAD_FOOTPRINT + READING_FOOTPRINT);

        readings.push(&mut pool, Reading::new(1, 10, 2.5)).unwrap();
        assert_eq!(pool.used(), LIST_HEAD_FOOTPRINT + 2 * READING_FOOTPRINT);
    }

    #[test]
    fn test_fifo_order() {
        let mut pool = Pool::root("readings", 128);
        let mut readings = Readings::new();
        for sensor in 0..3 {
            readings
                .push(&mut pool, Reading::new(sensor, 100, sensor as f32))
                .unwrap();
        }

        assert_eq!(readings.len(), 3);
        assert_eq!(readings.front().map(|r| r.sensor), Some(0));
        let order: Vec<u32> = std::iter::from_fn(|| readings.pop_front())
            .map(|r| r.sensor)
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert!(readings.is_empty());
    }

    #[test]
    fn test_push_exhausted() {
        let mut pool = Pool::root("readings", LIST_HEAD_FOOTPRINT + READING_FOOTPRINT);
        let mut readings = Readings::new();
        readings.push(&mut pool, Reading::new(0, 0, 0.0)).unwrap();

        let err = readings.push(&mut pool, Reading::new(1, 0, 0.0)).unwrap_err();
        assert!(matches!(err, FieldkitError::PoolExhausted { .. }));
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_into_vec() {
        let mut pool = Pool::root("readings", 128);
        let mut readings = Readings::new();
        readings.push(&mut pool, Reading::new(4, 1, 0.25)).unwrap();

        assert_eq!(readings.into_vec(), vec![Reading::new(4, 1, 0.25)]);
    }
}
