//! EK-TAKT - Discovery beacon wire format
//!
//! Fixed-size broadcast frame announcing a node's identity during the
//! discovery phase. Anything shorter than [`BEACON_LEN`] or without the
//! magic marker is foreign traffic and is dropped without a trace.
//!
//! Layout (little-endian):
//!
//! | bytes | field      |
//! |-------|------------|
//! | 0..2  | magic      |
//! | 2..10 | device id  |
//! | 10    | seen count |
//! | 11    | rssi hint  |

use crate::types::*;

/// Magic marker bytes opening every beacon
pub const BEACON_MAGIC: [u8; 2] = [0xEC, 0xB1];

/// Beacon frame size on the wire
pub const BEACON_LEN: usize = 12;

/// Discovery beacon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Beacon {
    /// Sender's unique device id
    pub device_id: DeviceId,
    /// Peers the sender has seen so far (informational only)
    pub seen_count: u8,
    /// Reserved signal-quality hint
    pub rssi_hint: i8,
}

impl Beacon {
    /// Encode into a wire frame
    pub fn encode(&self) -> [u8; BEACON_LEN] {
        let mut frame = [0u8; BEACON_LEN];
        frame[0..2].copy_from_slice(&BEACON_MAGIC);
        frame[2..10].copy_from_slice(&self.device_id.to_le_bytes());
        frame[10] = self.seen_count;
        frame[11] = self.rssi_hint as u8;
        frame
    }

    /// Parse a received frame
    ///
    /// Returns `None` for frames that are too short or carry the wrong
    /// magic. Trailing bytes beyond [`BEACON_LEN`] are ignored.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < BEACON_LEN {
            return None;
        }
        if frame[0..2] != BEACON_MAGIC {
            return None;
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&frame[2..10]);

        Some(Self {
            device_id: DeviceId::from_le_bytes(id),
            seen_count: frame[10],
            rssi_hint: frame[11] as i8,
        })
    }
}

// Wire size must match the struct's field bytes
const _: () = assert!(BEACON_LEN == 2 + 8 + 1 + 1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_wire_layout() {
        let beacon = Beacon {
            device_id: 0x1122_3344_5566_7788,
            seen_count: 3,
            rssi_hint: -40,
        };
        let frame = beacon.encode();

        assert_eq!(frame[0..2], BEACON_MAGIC);
        assert_eq!(frame[2], 0x88); // little-endian id
        assert_eq!(frame[9], 0x11);
        assert_eq!(frame[10], 3);
        assert_eq!(Beacon::parse(&frame), Some(beacon));
    }

    #[test]
    fn test_short_frame_rejected() {
        let frame = Beacon {
            device_id: 1,
            seen_count: 0,
            rssi_hint: 0,
        }
        .encode();
        assert_eq!(Beacon::parse(&frame[..BEACON_LEN - 1]), None);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut frame = Beacon {
            device_id: 1,
            seen_count: 0,
            rssi_hint: 0,
        }
        .encode();
        frame[1] ^= 0xFF;
        assert_eq!(Beacon::parse(&frame), None);
    }
}
