//! Register map of the SJA1000 compatible CAN controller in PeliCAN mode.
//!
//! Every register holds a single byte in the low 8 bits of a 32-bit word.
//! The driver never touches the register file directly but goes through the
//! [`Registers`] trait, which is implemented for the memory mapped controller
//! by [`Mmio`].

use crate::config::BitTiming;
use crate::message::raw::WINDOW_LEN;
use bitfield::bitfield;
use core::marker::PhantomData;
use esp32can_core::CanId;
use vcell::VolatileCell;

/// Memory layout of the register file.
#[repr(C)]
pub struct RegisterBlock {
    /// 0x00: mode
    pub mode: VolatileCell<u32>,
    /// 0x04: command (write only)
    pub command: VolatileCell<u32>,
    /// 0x08: status (read only)
    pub status: VolatileCell<u32>,
    /// 0x0C: interrupt flags, cleared on read
    pub interrupt: VolatileCell<u32>,
    /// 0x10: interrupt enable
    pub interrupt_enable: VolatileCell<u32>,
    _reserved0: VolatileCell<u32>,
    /// 0x18: bus timing 0 (prescaler, SJW)
    pub bus_timing_0: VolatileCell<u32>,
    /// 0x1C: bus timing 1 (segments, sampling)
    pub bus_timing_1: VolatileCell<u32>,
    _reserved1: [VolatileCell<u32>; 3],
    /// 0x2C: arbitration lost capture
    pub arbitration_lost_capture: VolatileCell<u32>,
    /// 0x30: error code capture
    pub error_code_capture: VolatileCell<u32>,
    /// 0x34: error warning limit
    pub error_warning_limit: VolatileCell<u32>,
    /// 0x38: receive error counter
    pub rx_error_counter: VolatileCell<u32>,
    /// 0x3C: transmit error counter
    pub tx_error_counter: VolatileCell<u32>,
    /// 0x40..0x70: transmit/receive frame window in operating mode,
    /// acceptance code and mask in reset mode
    pub window: [VolatileCell<u32>; WINDOW_LEN],
    /// 0x74: number of frames held in the receive FIFO
    pub rx_message_counter: VolatileCell<u32>,
    _reserved2: VolatileCell<u32>,
    /// 0x7C: clock divider, selects PeliCAN mode
    pub clock_divider: VolatileCell<u32>,
}

/// A single byte wide register of the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// MOD
    Mode,
    /// CMR
    Command,
    /// SR
    Status,
    /// IR
    Interrupt,
    /// IER
    InterruptEnable,
    /// BTR0
    BusTiming0,
    /// BTR1
    BusTiming1,
    /// ALC
    ArbitrationLostCapture,
    /// ECC
    ErrorCodeCapture,
    /// EWLR
    ErrorWarningLimit,
    /// RXERR
    RxErrorCounter,
    /// TXERR
    TxErrorCounter,
    /// Byte `n` of the frame window. In reset mode bytes 0..4 are the
    /// acceptance code and bytes 4..8 the acceptance mask.
    Window(u8),
    /// RMC
    RxMessageCounter,
    /// CDR
    ClockDivider,
}

impl Register {
    /// Byte offset from the start of the register file.
    pub fn offset(self) -> usize {
        match self {
            Register::Mode => 0x00,
            Register::Command => 0x04,
            Register::Status => 0x08,
            Register::Interrupt => 0x0C,
            Register::InterruptEnable => 0x10,
            Register::BusTiming0 => 0x18,
            Register::BusTiming1 => 0x1C,
            Register::ArbitrationLostCapture => 0x2C,
            Register::ErrorCodeCapture => 0x30,
            Register::ErrorWarningLimit => 0x34,
            Register::RxErrorCounter => 0x38,
            Register::TxErrorCounter => 0x3C,
            Register::Window(n) => 0x40 + 4 * usize::from(n),
            Register::RxMessageCounter => 0x74,
            Register::ClockDivider => 0x7C,
        }
    }

    /// First acceptance code byte (ACR0), valid in reset mode only.
    pub const ACCEPTANCE_CODE: u8 = 0;
    /// First acceptance mask byte (AMR0), valid in reset mode only.
    pub const ACCEPTANCE_MASK: u8 = 4;
}

/// Byte wide access to the controller registers.
///
/// All methods take `&self`; implementations rely on interior mutability the
/// same way the hardware does. The driver serializes accesses that must not
/// interleave with the interrupt handler inside a critical section.
pub trait Registers {
    /// Reads a register. Reading [`Register::Interrupt`] clears it.
    fn read(&self, register: Register) -> u8;
    /// Writes a register.
    fn write(&self, register: Register, value: u8);

    /// Read-modify-write of a register.
    fn modify(&self, register: Register, f: impl FnOnce(u8) -> u8) {
        let value = self.read(register);
        self.write(register, f(value));
    }
}

impl<R: Registers + ?Sized> Registers for &R {
    fn read(&self, register: Register) -> u8 {
        (**self).read(register)
    }

    fn write(&self, register: Register, value: u8) {
        (**self).write(register, value)
    }
}

/// Access to the register block of a [`CanId`]
pub(crate) trait AccessRegisterBlock {
    fn register_block() -> *const RegisterBlock;
}

impl<Id: CanId> AccessRegisterBlock for Id {
    fn register_block() -> *const RegisterBlock {
        Id::ADDRESS as *const RegisterBlock
    }
}

/// Memory mapped register file of the controller identified by `Id`.
pub struct Mmio<Id> {
    _id: PhantomData<Id>,
}

impl<Id: CanId> Mmio<Id> {
    /// # Safety
    /// The caller must own the controller; no other `Mmio<Id>` may be used
    /// concurrently. Owning an `esp32can_core::Dependencies<Id>` implementor
    /// is the intended proof.
    pub unsafe fn new() -> Self {
        Self { _id: PhantomData }
    }

    fn cell(&self, register: Register) -> &VolatileCell<u32> {
        // Safety: `Id::ADDRESS` points to a valid register file by the
        // contract of `CanId`, and the register file lives forever.
        let block = unsafe { &*Id::register_block() };
        match register {
            Register::Mode => &block.mode,
            Register::Command => &block.command,
            Register::Status => &block.status,
            Register::Interrupt => &block.interrupt,
            Register::InterruptEnable => &block.interrupt_enable,
            Register::BusTiming0 => &block.bus_timing_0,
            Register::BusTiming1 => &block.bus_timing_1,
            Register::ArbitrationLostCapture => &block.arbitration_lost_capture,
            Register::ErrorCodeCapture => &block.error_code_capture,
            Register::ErrorWarningLimit => &block.error_warning_limit,
            Register::RxErrorCounter => &block.rx_error_counter,
            Register::TxErrorCounter => &block.tx_error_counter,
            Register::Window(n) => {
                &block.window[usize::from(n).min(WINDOW_LEN - 1)]
            }
            Register::RxMessageCounter => &block.rx_message_counter,
            Register::ClockDivider => &block.clock_divider,
        }
    }
}

impl<Id: CanId> Registers for Mmio<Id> {
    fn read(&self, register: Register) -> u8 {
        self.cell(register).get() as u8
    }

    fn write(&self, register: Register, value: u8) {
        self.cell(register).set(u32::from(value))
    }
}

bitfield! {
    /// MOD register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct ModeReg(u8);
    impl Debug;

    /// Reset mode; configuration registers are writable only while set
    pub reset, set_reset: 0;
    /// Listen only; the controller never drives the bus
    pub listen_only, set_listen_only: 1;
    /// Self test; transmissions succeed without acknowledgement
    pub self_test, set_self_test: 2;
    /// Single acceptance filter instead of two
    pub single_filter, set_single_filter: 3;
}

impl From<u8> for ModeReg {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<ModeReg> for u8 {
    fn from(value: ModeReg) -> Self {
        value.0
    }
}

bitfield! {
    /// SR register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct Status(u8);
    impl Debug;

    /// At least one frame is available in the receive FIFO
    pub rx_buffer_full, _: 0;
    /// A frame was lost because the receive FIFO was full
    pub data_overrun, _: 1;
    /// The transmit buffer may be written
    pub tx_buffer_free, _: 2;
    /// The last transmission request completed
    pub tx_complete, _: 3;
    /// A frame is being received
    pub receiving, _: 4;
    /// A frame is being transmitted
    pub transmitting, _: 5;
    /// An error counter reached the warning limit
    pub error, _: 6;
    /// The controller is bus off
    pub bus_off, _: 7;
}

impl From<u8> for Status {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Status> for u8 {
    fn from(value: Status) -> Self {
        value.0
    }
}

/// CMR register bits
pub mod command {
    /// Transmission request
    pub const TX_REQUEST: u8 = 0x01;
    /// Release the receive buffer after reading a frame
    pub const RELEASE_RX_BUFFER: u8 = 0x04;
    /// Clear the data overrun status
    pub const CLEAR_DATA_OVERRUN: u8 = 0x08;
    /// Self reception request (transmit and receive the frame)
    pub const SELF_RX_REQUEST: u8 = 0x10;
}

/// CDR bit selecting the PeliCAN register layout
pub const CLOCK_DIVIDER_PELICAN: u8 = 0x80;

bitfield! {
    /// BTR0 register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct BusTiming0(u8);
    impl Debug;
    u8;

    /// Baud rate prescaler, programmed as `prescaler / 2 - 1`
    pub prescaler, set_prescaler: 5, 0;
    /// Synchronization jump width minus one
    pub sjw, set_sjw: 7, 6;
}

bitfield! {
    /// BTR1 register
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct BusTiming1(u8);
    impl Debug;
    u8;

    /// Time segment 1 minus one
    pub segment1, set_segment1: 3, 0;
    /// Time segment 2 minus one
    pub segment2, set_segment2: 6, 4;
    /// Sample the bus three times
    pub triple_sampling, set_triple_sampling: 7;
}

impl From<&BitTiming> for BusTiming0 {
    fn from(timing: &BitTiming) -> Self {
        let mut reg = Self(0);
        reg.set_prescaler((timing.prescaler() / 2).saturating_sub(1));
        reg.set_sjw(timing.sjw().saturating_sub(1));
        reg
    }
}

impl From<&BitTiming> for BusTiming1 {
    fn from(timing: &BitTiming) -> Self {
        let mut reg = Self(0);
        reg.set_segment1(timing.segment1().saturating_sub(1));
        reg.set_segment2(timing.segment2().saturating_sub(1));
        reg.set_triple_sampling(timing.triple_sampling());
        reg
    }
}

impl From<BusTiming0> for u8 {
    fn from(value: BusTiming0) -> Self {
        value.0
    }
}

impl From<BusTiming1> for u8 {
    fn from(value: BusTiming1) -> Self {
        value.0
    }
}
