//! Devices found by a scan.

use std::slice;

use crate::error::Result;
use crate::pool::budget::{DEVICE_RECORD_FOOTPRINT, LIST_HEAD_FOOTPRINT, SENSOR_RECORD_FOOTPRINT};
use crate::pool::Pool;
use crate::protocol::ModuleType;

/// One sensor of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedSensor {
    pub id: u32,
    pub name: String,
    pub unit_of_measure: String,
}

/// A module that answered the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub address: u8,
    pub version: u32,
    pub module_type: ModuleType,
    pub name: String,
    pub number_of_sensors: u32,
    pub sensors: Vec<AttachedSensor>,
}

impl Device {
    /// Sensor with the given id.
    pub fn sensor(&self, id: u32) -> Option<&AttachedSensor> {
        self.sensors.iter().find(|s| s.id == id)
    }
}

/// Devices in scan (address) order, charged to the scan pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<Device>,
    head_charged: bool,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a device, charging its record and sensor records to `pool`.
    pub fn push(&mut self, pool: &mut Pool, device: Device) -> Result<()> {
        if !self.head_charged {
            pool.alloc(LIST_HEAD_FOOTPRINT)?;
            self.head_charged = true;
        }
        pool.alloc(DEVICE_RECORD_FOOTPRINT + device.sensors.len() * SENSOR_RECORD_FOOTPRINT)?;
        self.devices.push(device);
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, address: u8) -> bool {
        self.get(address).is_some()
    }

    pub fn get(&self, address: u8) -> Option<&Device> {
        self.devices.iter().find(|d| d.address == address)
    }

    pub fn iter(&self) -> slice::Iter<'_, Device> {
        self.devices.iter()
    }

    pub fn addresses(&self) -> Vec<u8> {
        self.devices.iter().map(|d| d.address).collect()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a Device;
    type IntoIter = slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

impl IntoIterator for DeviceList {
    type Item = Device;
    type IntoIter = std::vec::IntoIter<Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldkitError;

    fn device(address: u8, sensors: u32) -> Device {
        Device {
            address,
            version: 1,
            module_type: ModuleType::Sensor,
            name: format!("dev{}", address),
            number_of_sensors: sensors,
            sensors: (0..sensors)
                .map(|id| AttachedSensor {
                    id,
                    name: format!("s{}", id),
                    unit_of_measure: "u".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_lookup() {
        let mut pool = Pool::root("scan", 512);
        let mut list = DeviceList::new();
        list.push(&mut pool, device(8, 3)).unwrap();
        list.push(&mut pool, device(20, 1)).unwrap();

        assert_eq!(list.len(), 2);
        assert!(list.contains(8));
        assert!(!list.contains(9));
        assert_eq!(list.get(20).map(|d| d.name.as_str()), Some("dev20"));
        assert_eq!(list.addresses(), vec![8, 20]);
        assert_eq!(list.get(8).and_then(|d| d.sensor(2)).map(|s| s.id), Some(2));
    }

    #[test]
    fn test_push_charges_pool() {
        let mut pool = Pool::root("scan", 512);
        let mut list = DeviceList::new();
        list.push(&mut pool, device(8, 2)).unwrap();

        assert_eq!(
            pool.used(),
            LIST_HEAD_FOOTPRINT + DEVICE_RECORD_FOOTPRINT + 2 * SENSOR_RECORD_FOOTPRINT
        );
    }

    #[test]
    fn test_push_exhausted() {
        let mut pool = Pool::root("scan", LIST_HEAD_FOOTPRINT);
        let mut list = DeviceList::new();
        let err = list.push(&mut pool, device(8, 0)).unwrap_err();
        assert!(matches!(err, FieldkitError::PoolExhausted { .. }));
        assert!(list.is_empty());
    }
}
