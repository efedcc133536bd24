//! Interrupt flags of the controller
//!
//! The IR register reports pending interrupts and is cleared by reading it;
//! IER has the same layout and selects which of them raise the CPU
//! interrupt line.

use bitfield::bitfield;

bitfield! {
    /// A set of CAN interrupts.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct InterruptSet(u8);

    /// Bus Error
    pub bei, set_bei: 7;
    /// Arbitration Lost
    pub ali, set_ali: 6;
    /// Error Passive
    pub epi, set_epi: 5;
    /// Wake-up
    pub wui, set_wui: 4;
    /// Data Overrun
    pub doi, set_doi: 3;
    /// Error Warning
    pub ei, set_ei: 2;
    /// Transmit buffer free again
    pub ti, set_ti: 1;
    /// Receive FIFO not empty
    pub ri, set_ri: 0;
}

impl InterruptSet {
    /// Wraps a raw IR or IER value.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw register value
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// `true` if no interrupt is flagged
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<Interrupt> for InterruptSet {
    fn from_iter<T: IntoIterator<Item = Interrupt>>(iter: T) -> Self {
        let mut set = 0_u8;
        for int in iter.into_iter() {
            set |= u8::from(int);
        }
        InterruptSet(set)
    }
}

impl core::fmt::Debug for InterruptSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "InterruptSet {{ ")?;
        if self.bei() {
            write!(f, "BEI ")?;
        }
        if self.ali() {
            write!(f, "ALI ")?;
        }
        if self.epi() {
            write!(f, "EPI ")?;
        }
        if self.wui() {
            write!(f, "WUI ")?;
        }
        if self.doi() {
            write!(f, "DOI ")?;
        }
        if self.ei() {
            write!(f, "EI ")?;
        }
        if self.ti() {
            write!(f, "TI ")?;
        }
        if self.ri() {
            write!(f, "RI ")?;
        }
        write!(f, "}}")
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for InterruptSet {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "InterruptSet({=u8:#010b})", self.0)
    }
}

/// A single interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interrupt {
    /// RI
    Receive = 0,
    /// TI
    Transmit = 1,
    /// EI
    ErrorWarning = 2,
    /// DOI
    DataOverrun = 3,
    /// WUI
    WakeUp = 4,
    /// EPI
    ErrorPassive = 5,
    /// ALI
    ArbitrationLost = 6,
    /// BEI
    BusError = 7,
}

impl From<Interrupt> for u8 {
    fn from(x: Interrupt) -> Self {
        1 << x as u8
    }
}

/// Bit position does not name an interrupt
#[derive(Debug)]
pub struct InvalidInterruptNumber;

impl TryFrom<u8> for Interrupt {
    type Error = InvalidInterruptNumber;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Interrupt::*;
        let ret = match value {
            0 => Receive,
            1 => Transmit,
            2 => ErrorWarning,
            3 => DataOverrun,
            4 => WakeUp,
            5 => ErrorPassive,
            6 => ArbitrationLost,
            7 => BusError,
            8.. => Err(InvalidInterruptNumber)?,
        };
        Ok(ret)
    }
}

impl InterruptSet {
    /// An iterator visiting all elements in ascending bit order.
    pub fn iter(&self) -> Iter {
        Iter {
            flags: *self,
            index: 0,
        }
    }
}

/// An iterator over the items of an [`InterruptSet`].
///
/// This `struct` is created by [`InterruptSet::iter`].
pub struct Iter {
    flags: InterruptSet,
    index: u8,
}

impl Iterator for Iter {
    type Item = Interrupt;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let i = self.index;
            self.index = self.index.saturating_add(1);
            let int = i.try_into().ok()?;
            if self.flags.0 & (1 << i) != 0 {
                return Some(int);
            }
        }
    }
}
