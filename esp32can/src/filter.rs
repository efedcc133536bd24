//! Acceptance filters
//!
//! The controller compares incoming frames against a 32-bit acceptance code
//! and mask before they reach the receive FIFO. A mask bit set to 1 means
//! "don't care". In single filter mode the four bytes form one wide filter;
//! in dual filter mode they form two narrower ones.

use embedded_can::{ExtendedId, StandardId};

/// Acceptance filter setting
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Filter {
    /// Every frame is accepted
    #[default]
    AcceptAll,
    /// One filter over a standard identifier and the first two data bytes
    SingleStandard {
        /// Identifier to match
        code: StandardId,
        /// Data bytes 0 and 1 to match
        code_data: [u8; 2],
        /// Identifier bits to ignore
        mask: StandardId,
        /// Data bits to ignore
        mask_data: [u8; 2],
    },
    /// One filter over an extended identifier. Only data frames pass.
    SingleExtended {
        /// Identifier to match
        code: ExtendedId,
        /// Identifier bits to ignore
        mask: ExtendedId,
    },
    /// Two filters over standard identifiers. The first one also covers
    /// data byte 0.
    DualStandard {
        /// Identifiers to match
        code: [StandardId; 2],
        /// Data byte 0 to match
        code_data: u8,
        /// Identifier bits to ignore
        mask: [StandardId; 2],
        /// Data bits to ignore
        mask_data: u8,
    },
    /// Two filters over the upper 16 bits of extended identifiers
    DualExtended {
        /// Identifiers to match
        code: [ExtendedId; 2],
        /// Identifier bits to ignore
        mask: [ExtendedId; 2],
    },
}

#[cfg(feature = "defmt")]
impl defmt::Format for Filter {
    fn format(&self, f: defmt::Formatter) {
        let AcceptanceFilter { code, mask, single } = (*self).into();
        defmt::write!(
            f,
            "Filter {{ code: {=[u8]:#x}, mask: {=[u8]:#x}, single: {} }}",
            &code[..],
            &mask[..],
            single
        )
    }
}

/// A filter in the controller's representation: the ACR0..3 and AMR0..3
/// register values and the MOD.AFM bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AcceptanceFilter {
    /// ACR0..ACR3
    pub code: [u8; 4],
    /// AMR0..AMR3
    pub mask: [u8; 4],
    /// Single filter mode
    pub single: bool,
}

impl From<Filter> for AcceptanceFilter {
    fn from(val: Filter) -> Self {
        match val {
            Filter::AcceptAll => AcceptanceFilter {
                code: [0; 4],
                mask: [0xFF; 4],
                single: false,
            },
            Filter::SingleStandard {
                code,
                code_data,
                mask,
                mask_data,
            } => {
                let code = code.as_raw();
                let mask = mask.as_raw();
                AcceptanceFilter {
                    code: [(code >> 3) as u8, (code << 5) as u8, code_data[0], code_data[1]],
                    // RTR and the three unused bits are don't care
                    mask: [
                        (mask >> 3) as u8,
                        (mask << 5) as u8 | 0x1F,
                        mask_data[0],
                        mask_data[1],
                    ],
                    single: true,
                }
            }
            Filter::SingleExtended { code, mask } => AcceptanceFilter {
                code: extended_bytes(code.as_raw()),
                mask: extended_bytes(mask.as_raw()),
                single: true,
            },
            Filter::DualStandard {
                code,
                code_data,
                mask,
                mask_data,
            } => {
                let [code1, code2] = code.map(|id| id.as_raw());
                let [mask1, mask2] = mask.map(|id| id.as_raw());
                AcceptanceFilter {
                    code: [
                        (code1 >> 3) as u8,
                        (code1 << 5) as u8 | code_data >> 4,
                        (code2 >> 3) as u8,
                        (code2 << 5) as u8 | code_data & 0x0F,
                    ],
                    mask: [
                        (mask1 >> 3) as u8,
                        (mask1 << 5) as u8 | mask_data >> 4 | 0x1F,
                        (mask2 >> 3) as u8,
                        (mask2 << 5) as u8 | mask_data & 0x0F | 0x1F,
                    ],
                    single: false,
                }
            }
            Filter::DualExtended { code, mask } => {
                let [code1, code2] = code.map(|id| id.as_raw());
                let [mask1, mask2] = mask.map(|id| id.as_raw());
                AcceptanceFilter {
                    code: [
                        (code1 >> 21) as u8,
                        (code1 >> 13) as u8,
                        (code2 >> 21) as u8,
                        (code2 >> 13) as u8,
                    ],
                    mask: [
                        (mask1 >> 21) as u8,
                        (mask1 >> 13) as u8,
                        (mask2 >> 21) as u8,
                        (mask2 >> 13) as u8,
                    ],
                    single: false,
                }
            }
        }
    }
}

/// Extended identifier as it appears in the frame window
fn extended_bytes(id: u32) -> [u8; 4] {
    [
        (id >> 21) as u8,
        (id >> 13) as u8,
        (id >> 5) as u8,
        (id << 3) as u8,
    ]
}
