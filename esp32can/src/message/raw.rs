//! Frames in the controller's representation.
//!
//! In operating mode the thirteen bytes at 0x40..0x74 form a window onto the
//! transmit buffer (on write) or the oldest frame of the receive FIFO (on
//! read). The first byte is the frame information, followed by two
//! (standard) or four (extended) identifier bytes and the data bytes.

use super::{extended_id, standard_id, Frame, MAX_DATA_LEN};
use bitfield::bitfield;
use embedded_can::Id;

/// Number of bytes in the frame window
pub const WINDOW_LEN: usize = 13;

const STANDARD_DATA: usize = 3;
const EXTENDED_DATA: usize = 5;

bitfield! {
    /// Frame information byte
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct FrameInfo(u8);
    impl Debug;
    u8;

    /// Data length code
    pub dlc, set_dlc: 3, 0;
    /// Remote transmission request
    pub remote, set_remote: 6;
    /// Extended (29-bit) identifier
    pub extended, set_extended: 7;
}

/// Snapshot of the frame window
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RawFrame([u8; WINDOW_LEN]);

impl RawFrame {
    /// Wraps bytes read from the frame window.
    pub fn from_bytes(bytes: [u8; WINDOW_LEN]) -> Self {
        Self(bytes)
    }

    /// Frame information byte
    pub fn info(&self) -> FrameInfo {
        FrameInfo(self.0[0])
    }

    /// The bytes that are meaningful for this frame: information,
    /// identifier and `dlc` data bytes.
    pub fn as_bytes(&self) -> &[u8] {
        let info = self.info();
        let data_start = if info.extended() {
            EXTENDED_DATA
        } else {
            STANDARD_DATA
        };
        let len = usize::from(info.dlc()).min(MAX_DATA_LEN);
        &self.0[..data_start + len]
    }

    /// Lays a frame out the way the transmit buffer expects it.
    pub fn encode(frame: &Frame) -> Self {
        let len = frame.len.min(MAX_DATA_LEN as u8);
        let mut info = FrameInfo(0);
        info.set_dlc(len);
        info.set_remote(frame.remote);

        let mut bytes = [0; WINDOW_LEN];
        let data_start = match frame.id {
            Id::Standard(id) => {
                let id = id.as_raw();
                bytes[1] = (id >> 3) as u8;
                bytes[2] = (id << 5) as u8;
                STANDARD_DATA
            }
            Id::Extended(id) => {
                info.set_extended(true);
                let id = id.as_raw();
                bytes[1] = (id >> 21) as u8;
                bytes[2] = (id >> 13) as u8;
                bytes[3] = (id >> 5) as u8;
                bytes[4] = (id << 3) as u8;
                EXTENDED_DATA
            }
        };
        bytes[0] = info.0;
        let len = usize::from(len);
        bytes[data_start..data_start + len].copy_from_slice(&frame.data[..len]);
        Self(bytes)
    }

    /// Rebuilds the frame. A data length code above 8 is read as 8 and the
    /// bytes past the data length are zero.
    pub fn decode(&self) -> Frame {
        let info = self.info();
        let b = &self.0;
        let (id, data_start): (Id, usize) = if info.extended() {
            let raw = u32::from(b[1]) << 21
                | u32::from(b[2]) << 13
                | u32::from(b[3]) << 5
                | u32::from(b[4]) >> 3;
            (extended_id(raw).into(), EXTENDED_DATA)
        } else {
            let raw = u16::from(b[1]) << 3 | u16::from(b[2]) >> 5;
            (standard_id(raw).into(), STANDARD_DATA)
        };
        let len = usize::from(info.dlc()).min(MAX_DATA_LEN);
        let mut data = [0; MAX_DATA_LEN];
        data[..len].copy_from_slice(&b[data_start..data_start + len]);
        Frame {
            id,
            remote: info.remote(),
            len: len as u8,
            data,
        }
    }
}
