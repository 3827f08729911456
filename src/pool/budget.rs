//! Typed size budgets for every pool in the firmware.
//!
//! All pool sizes are derived here from the maximum frame size and the
//! maximum field counts of the protocol, so no call site passes a bare byte
//! count to [`Pool::root`](super::Pool::root) or [`Pool::child`](super::Pool::child).

use std::mem::size_of;

use crate::readings::Reading;

/// Allocation granularity of every pool.
pub const ALIGNMENT: usize = 4;

/// Round `size` up to the next multiple of [`ALIGNMENT`], or `None` if that
/// overflows `usize`.
#[inline]
pub const fn checked_align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// Round `size` up to the next multiple of [`ALIGNMENT`].
///
/// Saturates at the largest aligned `usize`.
#[inline]
pub const fn align_up(size: usize) -> usize {
    match checked_align_up(size) {
        Some(aligned) => aligned,
        None => usize::MAX & !(ALIGNMENT - 1),
    }
}

/// Bus transaction size. Encoded messages, length prefix included, must be smaller.
pub const MAX_FRAME_SIZE: usize = 64;

/// Longest module, sensor or unit name a module may advertise.
pub const MAX_NAME_LEN: usize = 24;

/// Replies a module keeps queued before the master collects them.
pub const MAX_QUEUED_REPLIES: usize = 4;

/// Readings a single measurement may produce.
pub const MAX_READINGS_PER_CYCLE: usize = 16;

/// Sensors a single module may expose.
pub const MAX_SENSORS_PER_DEVICE: usize = 8;

/// Devices a scan is sized for.
pub const MAX_DEVICES: usize = 8;

/// Bytes charged for the head of a lazily created list.
pub const LIST_HEAD_FOOTPRINT: usize = 8;

/// Bytes charged per reading held in a readings list.
pub const READING_FOOTPRINT: usize = align_up(size_of::<Reading>());

/// Bytes charged for one decoded name (NUL terminator included).
pub const STRING_FOOTPRINT: usize = align_up(MAX_NAME_LEN + 1);

/// Bytes charged for one frame copied into a pool.
pub const FRAME_FOOTPRINT: usize = align_up(MAX_FRAME_SIZE);

/// Fixed part of a device record: address, version, type, sensor count.
pub const DEVICE_RECORD_FOOTPRINT: usize = 16;

/// Fixed part of an attached sensor record: id and link.
pub const SENSOR_RECORD_FOOTPRINT: usize = 8;

/// One device with its name and a full set of sensors (name and unit each).
pub const DEVICE_FOOTPRINT: usize = DEVICE_RECORD_FOOTPRINT
    + STRING_FOOTPRINT
    + MAX_SENSORS_PER_DEVICE * (SENSOR_RECORD_FOOTPRINT + 2 * STRING_FOOTPRINT);

/// Module reply pool: the queued replies plus the pending incoming frame.
pub const REPLY_POOL_SIZE: usize = (MAX_QUEUED_REPLIES + 1) * FRAME_FOOTPRINT;

/// Module readings pool: one full measurement.
pub const READINGS_POOL_SIZE: usize =
    LIST_HEAD_FOOTPRINT + MAX_READINGS_PER_CYCLE * READING_FOOTPRINT;

/// Master scan pool: the device list plus every device record.
pub const SCAN_POOL_SIZE: usize = LIST_HEAD_FOOTPRINT + MAX_DEVICES * DEVICE_FOOTPRINT;

/// Master reading-status pool: one drained measurement plus an error message.
pub const STATUS_POOL_SIZE: usize = READINGS_POOL_SIZE + STRING_FOOTPRINT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 4);
        assert_eq!(align_up(4), 4);
        assert_eq!(align_up(5), 8);
        assert_eq!(align_up(63), 64);
    }

    #[test]
    fn test_align_up_near_usize_max() {
        assert_eq!(checked_align_up(usize::MAX - 1), None);
        assert_eq!(checked_align_up(usize::MAX - 3), Some(usize::MAX - 3));
        assert_eq!(align_up(usize::MAX), usize::MAX - 3);
    }

    #[test]
    fn test_budgets_are_aligned() {
        for size in [
            READING_FOOTPRINT,
            STRING_FOOTPRINT,
            FRAME_FOOTPRINT,
            REPLY_POOL_SIZE,
            READINGS_POOL_SIZE,
            SCAN_POOL_SIZE,
            STATUS_POOL_SIZE,
        ] {
            assert_eq!(size % ALIGNMENT, 0, "{} is not aligned", size);
        }
    }

    #[test]
    fn test_reading_footprint() {
        // sensor + time + value, 4 bytes each
        assert_eq!(READING_FOOTPRINT, 12);
    }
}
