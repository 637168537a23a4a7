//! The ready-queue ordering key: priority and submission instant packed
//! into one 64-bit integer, so that a single index scan returns entries
//! highest-priority first and, within a priority band, oldest first.

use crate::error::Error;
use chrono::{DateTime, Utc};

/// Priorities occupy eight bits of the key.
pub const MAX_PRIORITY: u16 = 255;

// Whole milliseconds since the Unix epoch must fit 47 bits, which
// saturates in the year 6429.
const MAX_TIMESTAMP_MS: i64 = (1 << 47) - 1;

/// Packs a request's priority and submission instant into its ordering
/// key:
///
/// - bit  63     : zero, an overflow guard
/// - bits 62..55 : priority
/// - bits 54..8  : whole milliseconds since the Unix epoch
/// - bits 7..0   : reserved, zero
///
/// Lower keys dispatch first: priority dominates, and within one priority
/// an earlier submission wins.
pub fn pack(priority: u16, created_ts: DateTime<Utc>) -> Result<u64, Error> {
    if priority > MAX_PRIORITY {
        return Err(Error::InvalidPriority(priority));
    }
    let millis = created_ts.timestamp_millis();
    if !(0..=MAX_TIMESTAMP_MS).contains(&millis) {
        return Err(Error::InvalidTimestamp(created_ts));
    }
    Ok((priority as u64) << 55 | (millis as u64) << 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn ts(rfc3339: &str) -> DateTime<Utc> {
        rfc3339.parse().unwrap()
    }

    #[test]
    fn test_pack_vectors() {
        let data = [
            (("1970-01-01T00:00:00.000Z", 0), 0x0000000000000000u64),
            (("1970-01-01T00:00:00.000Z", 255), 0x7f80000000000000),
            (("1970-01-01T00:00:00.040Z", 0), 0x0000000000002800),
            (("1970-01-01T00:00:00.050Z", 0), 0x0000000000003200),
            (("1970-01-01T00:00:00.100Z", 0), 0x0000000000006400),
            (("1970-01-01T00:00:00.900Z", 0), 0x0000000000038400),
            (("1970-01-01T00:00:01.000Z", 0), 0x000000000003e800),
            (("1970-01-01T00:00:00.000Z", 1), 0x0080000000000000),
            (("1970-01-01T00:00:00.000Z", 2), 0x0100000000000000),
            (("2010-01-02T03:04:05.060Z", 0), 0x000125ecfd5cc400),
            (("2010-01-02T03:04:05.060Z", 1), 0x008125ecfd5cc400),
            // It's the end of the world as we know it...
            (("6429-10-17T02:45:55.327Z", 0), 0x007fffffffffff00),
            (("6429-10-17T02:45:55.327Z", 255), 0x7fffffffffffff00),
        ];
        for ((timestamp, priority), expect) in data {
            assert_eq!(
                pack(priority, ts(timestamp)).unwrap(),
                expect,
                "pack({priority}, {timestamp})",
            );
        }
    }

    #[test]
    fn test_pack_rejects_out_of_range_priority() {
        assert!(matches!(
            pack(256, ts("2010-01-02T03:04:05.060Z")),
            Err(Error::InvalidPriority(256)),
        ));
    }

    #[test]
    fn test_pack_rejects_out_of_range_timestamps() {
        // One millisecond past the 47-bit window, and one before the epoch.
        assert!(matches!(
            pack(0, ts("6429-10-17T02:45:55.328Z")),
            Err(Error::InvalidTimestamp(_)),
        ));
        assert!(matches!(
            pack(0, ts("1969-12-31T23:59:59.999Z")),
            Err(Error::InvalidTimestamp(_)),
        ));
    }

    #[quickcheck]
    fn prop_priority_dominates_timestamp(p1: u8, p2: u8, t1: u32, t2: u32) -> bool {
        let key = |p: u8, t: u32| {
            pack(p as u16, DateTime::from_timestamp_millis(t as i64).unwrap()).unwrap()
        };
        let (k1, k2) = (key(p1, t1), key(p2, t2));

        if p1 != p2 {
            (p1 < p2) == (k1 < k2)
        } else {
            // Within a priority band the keys order exactly as the
            // submission instants do.
            k1.cmp(&k2) == t1.cmp(&t2)
        }
    }
}
