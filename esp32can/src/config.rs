//! CAN bus configuration

mod bit_timing;

pub use bit_timing::{
    BitTiming, BitTimingErrors, DEFAULT_TOLERANCE_PPM, MAX_PRESCALER, MAX_SEGMENT1, MAX_SEGMENT2,
    MAX_SJW, MAX_TIME_QUANTA, MIN_PRESCALER, MIN_TIME_QUANTA,
};

use crate::filter::Filter;
use fugit::HertzU32;

/// Configuration for the CAN bus
///
/// Obtained from [`CanConfigurable::config`] and applied by
/// [`CanConfigurable::finalize`].
///
/// [`CanConfigurable::config`]: crate::bus::CanConfigurable::config
/// [`CanConfigurable::finalize`]: crate::bus::CanConfigurable::finalize
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    /// Desired bit rate of the bus
    pub bitrate: HertzU32,
    /// Largest acceptable deviation from `bitrate`, in parts per million
    pub tolerance_ppm: u32,
    /// Operating mode entered when leaving reset
    pub mode: Mode,
    /// Acceptance filter
    pub filter: Filter,
    /// How received frames are moved from the controller to the receive
    /// buffer
    pub rx: TransferMode,
    /// How queued frames are handed to the controller
    pub tx: TransferMode,
    /// Number of frames the receive buffer holds. Must be in
    /// `1..=Capacities::RxFrames`.
    pub rx_capacity: usize,
    /// Number of frames the transmit buffer holds. Must be in
    /// `1..=Capacities::TxFrames`.
    pub tx_capacity: usize,
}

impl CanConfig {
    /// Create an instance
    ///
    /// Bit rate and buffer capacities must be provided, all other settings
    /// come pre-populated with default values.
    pub fn new(bitrate: HertzU32, rx_capacity: usize, tx_capacity: usize) -> Self {
        Self {
            bitrate,
            tolerance_ppm: DEFAULT_TOLERANCE_PPM,
            mode: Default::default(),
            filter: Default::default(),
            rx: Default::default(),
            tx: Default::default(),
            rx_capacity,
            tx_capacity,
        }
    }
}

/// Operating mode of the controller
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Regular bus participant
    #[default]
    Normal,
    /// Receive only; the controller never acknowledges nor transmits
    ListenOnly,
    /// Self test: transmitted frames are received back and succeed without
    /// acknowledgement from another node
    LoopBack,
}

/// Way frames are exchanged between the controller and the buffers
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferMode {
    /// Frames move only when the application calls into the driver
    Poll,
    /// Frames move from [`Can::on_interrupt`], which the platform calls from
    /// the CAN interrupt handler
    ///
    /// [`Can::on_interrupt`]: crate::bus::Can::on_interrupt
    #[default]
    Interrupt,
}
