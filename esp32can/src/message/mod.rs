//! Handling of messages/frames

pub mod raw;

use embedded_can::{ExtendedId, Id, StandardId};

/// Largest data field of a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Classic CAN frame as sent and received by the driver.
///
/// The data length never exceeds [`MAX_DATA_LEN`]. Bytes past the data
/// length are zero in frames produced by the driver and ignored when
/// transmitting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    id: Id,
    remote: bool,
    len: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            id: Id::Standard(StandardId::ZERO),
            remote: false,
            len: 0,
            data: [0; MAX_DATA_LEN],
        }
    }
}

impl Frame {
    /// Assembles a frame from its parts. `len` is clamped to
    /// [`MAX_DATA_LEN`] and the bytes past it are cleared.
    pub fn from_parts(id: impl Into<Id>, remote: bool, len: u8, data: [u8; MAX_DATA_LEN]) -> Self {
        let len = len.min(MAX_DATA_LEN as u8);
        let mut frame = Self {
            id: id.into(),
            remote,
            len,
            data,
        };
        frame.data[usize::from(len)..].fill(0);
        frame
    }

    /// Identifier as a plain integer, 11 or 29 significant bits
    pub fn raw_id(&self) -> u32 {
        match self.id {
            Id::Standard(id) => u32::from(id.as_raw()),
            Id::Extended(id) => id.as_raw(),
        }
    }

    /// Data length, also the requested length of a remote frame
    pub fn len(&self) -> u8 {
        self.len
    }

    /// `true` if the frame carries no data bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The whole payload storage including the zeroed tail
    pub fn payload(&self) -> &[u8; MAX_DATA_LEN] {
        &self.data
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        let mut payload = [0; MAX_DATA_LEN];
        payload[..data.len()].copy_from_slice(data);
        Some(Self::from_parts(id, false, data.len() as u8, payload))
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Self::from_parts(id, true, dlc as u8, [0; MAX_DATA_LEN]))
    }

    fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }

    fn is_remote_frame(&self) -> bool {
        self.remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.len.into()
    }

    fn data(&self) -> &[u8] {
        if !self.remote {
            &self.data[..usize::from(self.len)]
        } else {
            &[]
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "Frame {{ id: {=u32:#x}, extended: {}, remote: {}, data: {=[u8]} }}",
            self.raw_id(),
            matches!(self.id, Id::Extended(_)),
            self.remote,
            &self.data[..usize::from(self.len)],
        )
    }
}

/// Standard identifier from the low 11 bits of `raw`
pub(crate) fn standard_id(raw: u16) -> StandardId {
    // The mask ensures the ID is in range for a 11-bit integer
    unsafe { StandardId::new_unchecked(raw & StandardId::MAX.as_raw()) }
}

/// Extended identifier from the low 29 bits of `raw`
pub(crate) fn extended_id(raw: u32) -> ExtendedId {
    // The mask ensures the ID is in range for a 29-bit integer
    unsafe { ExtendedId::new_unchecked(raw & ExtendedId::MAX.as_raw()) }
}
