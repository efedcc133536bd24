//! Configuration and operation of the CAN bus

use crate::buffer::{Capacities, FrameMemory, FrameRingBuffer};
use crate::config::{BitTiming, CanConfig, Mode, TransferMode};
use crate::filter::AcceptanceFilter;
use crate::interrupt::InterruptSet;
use crate::message::raw::{RawFrame, WINDOW_LEN};
use crate::message::Frame;
use crate::reg::{
    command, BusTiming0, BusTiming1, ModeReg, Mmio, Register, Registers, Status,
    CLOCK_DIVIDER_PELICAN,
};
use bitfield::bitfield;
use core::cell::RefCell;
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use critical_section::Mutex;
use esp32can_core::{CanId, Dependencies};
use fugit::HertzU32;

/// Number of times the mode register is polled for a reset transition
/// before giving up
pub const MODE_SWITCH_ATTEMPTS: u32 = 1024;

/// Error counter value at which the error warning interrupt fires
pub const ERROR_WARNING_LIMIT: u8 = 96;

/// Printable error counter registers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorCounters {
    /// RXERR
    pub receive: u8,
    /// TXERR
    pub transmit: u8,
    /// EWLR
    pub warning_limit: u8,
}

bitfield! {
    /// Reasons [`CanConfigurable::finalize`] failed. Several may be set at
    /// once.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct ConfigurationErrors(u32);

    /// The controller did not enter reset mode
    pub not_in_reset, set_not_in_reset: 0;
    /// A test pattern written to BTR0 did not read back
    pub register_access, set_register_access: 1;
    /// The bit rate cannot be reached within the configured tolerance, or
    /// only with an odd prescaler
    pub bit_rate_too_far, set_bit_rate_too_far: 2;
    /// The computed bit timing does not fit the registers
    pub inconsistent_bit_timing, set_inconsistent_bit_timing: 3;
    /// The receive buffer capacity is zero or exceeds its storage
    pub rx_buffer_allocation, set_rx_buffer_allocation: 4;
    /// The transmit buffer capacity is zero or exceeds its storage
    pub tx_buffer_allocation, set_tx_buffer_allocation: 5;
    /// The controller did not leave reset mode
    pub leave_reset_timeout, set_leave_reset_timeout: 6;
}

impl ConfigurationErrors {
    /// `true` if no flag is set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Raw flags
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl Debug for ConfigurationErrors {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigurationErrors {{ ")?;
        if self.not_in_reset() {
            write!(f, "NOT_IN_RESET ")?;
        }
        if self.register_access() {
            write!(f, "REGISTER_ACCESS ")?;
        }
        if self.bit_rate_too_far() {
            write!(f, "BIT_RATE_TOO_FAR ")?;
        }
        if self.inconsistent_bit_timing() {
            write!(f, "INCONSISTENT_BIT_TIMING ")?;
        }
        if self.rx_buffer_allocation() {
            write!(f, "RX_BUFFER_ALLOCATION ")?;
        }
        if self.tx_buffer_allocation() {
            write!(f, "TX_BUFFER_ALLOCATION ")?;
        }
        if self.leave_reset_timeout() {
            write!(f, "LEAVE_RESET_TIMEOUT ")?;
        }
        write!(f, "}}")
    }
}

/// The controller did not confirm a reset mode transition
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeError {
    /// [`MODE_SWITCH_ATTEMPTS`] polls were exhausted
    Timeout,
}

/// Common CANbus functionality
pub trait CanBus {
    /// Read error counters
    fn error_counters(&self) -> ErrorCounters;
    /// Read the status register
    fn status(&self) -> Status;
    /// Read the error code capture of the last bus error
    fn error_code_capture(&self) -> u8;
    /// Read the bit position at which arbitration was last lost
    fn arbitration_lost_capture(&self) -> u8;
}

/// Puts the controller into reset mode, in which the configuration
/// registers can be written.
fn enter_reset<R: Registers>(registers: &R) -> Result<(), ModeError> {
    for _ in 0..MODE_SWITCH_ATTEMPTS {
        let mut mode = ModeReg::from(registers.read(Register::Mode));
        if mode.reset() {
            return Ok(());
        }
        mode.set_reset(true);
        registers.write(Register::Mode, mode.into());
    }
    #[cfg(feature = "defmt")]
    defmt::warn!("CAN controller did not enter reset mode");
    Err(ModeError::Timeout)
}

/// Writes the operating mode bits while in reset, then leaves reset.
fn leave_reset<R: Registers>(registers: &R, mut mode: ModeReg) -> Result<(), ModeError> {
    mode.set_reset(true);
    registers.write(Register::Mode, mode.into());
    mode.set_reset(false);
    for _ in 0..MODE_SWITCH_ATTEMPTS {
        registers.write(Register::Mode, mode.into());
        if !ModeReg::from(registers.read(Register::Mode)).reset() {
            return Ok(());
        }
    }
    #[cfg(feature = "defmt")]
    defmt::warn!("CAN controller did not leave reset mode");
    Err(ModeError::Timeout)
}

/// Writes two complementary patterns to BTR0 and reads them back.
fn registers_respond<R: Registers>(registers: &R) -> bool {
    [0x55, 0xAA].into_iter().all(|pattern| {
        registers.write(Register::BusTiming0, pattern);
        registers.read(Register::BusTiming0) == pattern
    })
}

/// Hands `frame` to the transmit buffer and requests its transmission.
fn transmit<R: Registers>(registers: &R, frame: &Frame) {
    let raw = RawFrame::encode(frame);
    for (n, byte) in raw.as_bytes().iter().enumerate() {
        registers.write(Register::Window(n as u8), *byte);
    }
    let request = if ModeReg::from(registers.read(Register::Mode)).self_test() {
        command::SELF_RX_REQUEST
    } else {
        command::TX_REQUEST
    };
    registers.write(Register::Command, request);
}

/// Reads the oldest frame of the receive FIFO and releases it.
fn read_frame<R: Registers>(registers: &R) -> Frame {
    let mut bytes = [0; WINDOW_LEN];
    for (n, byte) in bytes.iter_mut().enumerate() {
        *byte = registers.read(Register::Window(n as u8));
    }
    let frame = RawFrame::from_bytes(bytes).decode();
    registers.write(Register::Command, command::RELEASE_RX_BUFFER);
    frame
}

/// Shared between the application and the interrupt handler
struct State<'a> {
    rx: FrameRingBuffer<'a>,
    tx: FrameRingBuffer<'a>,
    /// A transmission is in flight; the next one starts from the interrupt
    sending: bool,
    /// Frames were lost since the last report
    overrun: bool,
    /// Frames lost because the receive buffer was full
    dropped: u32,
}

impl State<'_> {
    /// Moves every frame pending in the receive FIFO to the receive buffer.
    fn drain<R: Registers>(&mut self, registers: &R) {
        let pending = registers.read(Register::RxMessageCounter);
        for _ in 0..pending {
            let frame = read_frame(registers);
            if !self.rx.append(frame) {
                self.dropped = self.dropped.saturating_add(1);
                self.overrun = true;
                #[cfg(feature = "defmt")]
                defmt::warn!("CAN receive buffer full, dropped {}", frame);
            }
        }
    }
}

/// A CAN bus in reset mode. Before frames can be sent and received, it needs
/// to be [`Self::finalize`]d.
pub struct CanConfigurable<'a, Id, D, R = Mmio<Id>> {
    registers: R,
    dependencies: D,
    config: CanConfig,
    rx_storage: &'a mut [Frame],
    tx_storage: &'a mut [Frame],
    errors: ConfigurationErrors,
    _id: PhantomData<Id>,
}

impl<'a, Id: CanId, D: Dependencies<Id>> CanConfigurable<'a, Id, D> {
    /// Create new can peripheral.
    ///
    /// The controller is put into reset mode. The returned peripheral is
    /// not operational; use [`Self::finalize`] to finish configuration and
    /// start transmitting and receiving.
    pub fn new<C: Capacities>(
        bitrate: HertzU32,
        dependencies: D,
        memory: &'a mut FrameMemory<C>,
    ) -> Self {
        // Safety:
        // Since `dependencies` implies ownership of the controller identified by
        // `Id`, the register file is only accessed through this instance.
        let registers = unsafe { Mmio::<Id>::new() };
        Self::new_with_registers(bitrate, registers, dependencies, memory)
    }
}

impl<'a, Id: CanId, D: Dependencies<Id>, R: Registers> CanConfigurable<'a, Id, D, R> {
    /// Same as [`CanConfigurable::new`] with a custom register access, e.g.
    /// a simulated controller.
    pub fn new_with_registers<C: Capacities>(
        bitrate: HertzU32,
        registers: R,
        dependencies: D,
        memory: &'a mut FrameMemory<C>,
    ) -> Self {
        let memory = memory.init();
        let config = CanConfig::new(bitrate, memory.rx.len(), memory.tx.len());
        Self::from_parts(
            registers,
            dependencies,
            config,
            &mut memory.rx,
            &mut memory.tx,
        )
    }

    fn from_parts(
        registers: R,
        dependencies: D,
        config: CanConfig,
        rx_storage: &'a mut [Frame],
        tx_storage: &'a mut [Frame],
    ) -> Self {
        let mut errors = ConfigurationErrors::default();
        if enter_reset(&registers).is_err() {
            errors.set_not_in_reset(true);
        }
        Self {
            registers,
            dependencies,
            config,
            rx_storage,
            tx_storage,
            errors,
            _id: PhantomData,
        }
    }

    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.registers
    }

    /// Allows modifying the configuration before it is applied.
    pub fn config(&mut self) -> &mut CanConfig {
        &mut self.config
    }

    /// Bit timing the current configuration leads to.
    pub fn bit_timing(&self) -> BitTiming {
        BitTiming::compute(
            self.dependencies.apb_clock(),
            self.config.bitrate,
            self.config.tolerance_ppm,
        )
    }

    /// Applies the configuration and leaves reset mode.
    ///
    /// Every step is attempted so that all problems are reported at once.
    /// The bit timing registers are only written and reset mode is only left
    /// if no error occurred.
    pub fn finalize(self) -> Result<Can<'a, Id, D, R>, ConfigurationErrors> {
        let Self {
            registers,
            dependencies,
            config,
            rx_storage,
            tx_storage,
            mut errors,
            ..
        } = self;

        registers.write(Register::ClockDivider, CLOCK_DIVIDER_PELICAN);
        registers.modify(Register::Mode, |mode| {
            let mut mode = ModeReg::from(mode);
            mode.set_listen_only(true);
            mode.into()
        });

        if !registers_respond(&registers) {
            errors.set_register_access(true);
        }

        let timing = BitTiming::compute(
            dependencies.apb_clock(),
            config.bitrate,
            config.tolerance_ppm,
        );
        // BTR0 holds `prescaler / 2 - 1`, so an odd prescaler cannot be
        // programmed
        if !timing.within_tolerance() || timing.prescaler() % 2 != 0 {
            errors.set_bit_rate_too_far(true);
        }
        if !timing.validate().is_empty() {
            errors.set_inconsistent_bit_timing(true);
        }

        let rx = FrameRingBuffer::init_with_capacity(rx_storage, config.rx_capacity);
        if rx.is_none() {
            errors.set_rx_buffer_allocation(true);
        }
        let tx = FrameRingBuffer::init_with_capacity(tx_storage, config.tx_capacity);
        if tx.is_none() {
            errors.set_tx_buffer_allocation(true);
        }

        if errors.is_empty() {
            registers.write(Register::BusTiming0, BusTiming0::from(&timing).into());
            registers.write(Register::BusTiming1, BusTiming1::from(&timing).into());
        }

        let filter = AcceptanceFilter::from(config.filter);
        for (n, (code, mask)) in filter.code.iter().zip(filter.mask.iter()).enumerate() {
            let n = n as u8;
            registers.write(Register::Window(Register::ACCEPTANCE_CODE + n), *code);
            registers.write(Register::Window(Register::ACCEPTANCE_MASK + n), *mask);
        }

        registers.write(Register::ErrorWarningLimit, ERROR_WARNING_LIMIT);
        registers.write(Register::RxErrorCounter, 0);
        registers.write(Register::TxErrorCounter, 0);

        let mut enabled = InterruptSet::default();
        if config.rx == TransferMode::Interrupt {
            enabled.set_ri(true);
            enabled.set_doi(true);
        }
        if config.tx == TransferMode::Interrupt {
            enabled.set_ti(true);
        }
        registers.write(Register::InterruptEnable, enabled.bits());

        if errors.is_empty() {
            let mut mode = ModeReg::default();
            match config.mode {
                Mode::Normal => {}
                Mode::ListenOnly => mode.set_listen_only(true),
                Mode::LoopBack => mode.set_self_test(true),
            }
            mode.set_single_filter(filter.single);
            if leave_reset(&registers, mode).is_err() {
                errors.set_leave_reset_timeout(true);
            }
        }
        // Flags raised while configuring are stale
        registers.read(Register::Interrupt);

        match (rx, tx) {
            (Some(rx), Some(tx)) if errors.is_empty() => Ok(Can {
                registers,
                dependencies,
                config,
                timing,
                state: Mutex::new(RefCell::new(State {
                    rx,
                    tx,
                    sending: false,
                    overrun: false,
                    dropped: 0,
                })),
                _id: PhantomData,
            }),
            _ => {
                #[cfg(feature = "defmt")]
                defmt::warn!("CAN configuration failed: {}", errors);
                Err(errors)
            }
        }
    }
}

/// A CAN bus in operating mode.
///
/// Every method takes `&self` and synchronizes through a critical section,
/// so the bus can be placed in a `static` and shared between the
/// application and the interrupt handler calling [`Self::on_interrupt`].
pub struct Can<'a, Id, D, R = Mmio<Id>> {
    registers: R,
    dependencies: D,
    config: CanConfig,
    timing: BitTiming,
    state: Mutex<RefCell<State<'a>>>,
    _id: PhantomData<Id>,
}

impl<'a, Id: CanId, D: Dependencies<Id>, R: Registers> Can<'a, Id, D, R> {
    /// Raw access to the registers.
    ///
    /// # Safety
    /// The abstraction assumes that it has exclusive ownership of the
    /// registers. Direct access can break such assumptions.
    pub unsafe fn registers(&self) -> &R {
        &self.registers
    }

    /// Queues `frame` for transmission.
    ///
    /// With [`TransferMode::Poll`] the frame is handed to the controller if
    /// its transmit buffer is free, otherwise `false` is returned and the
    /// caller retries later. With [`TransferMode::Interrupt`] the frame is
    /// sent right away if nothing is in flight, or appended to the transmit
    /// buffer; `false` means that buffer is full.
    pub fn send(&self, frame: Frame) -> bool {
        self.queue_or_dispatch(frame)
    }

    /// Takes the oldest received frame.
    ///
    /// With [`TransferMode::Poll`] every frame waiting in the controller is
    /// then moved to the receive buffer, using the slot just freed.
    pub fn receive(&self) -> Option<Frame> {
        self.next_frame()
    }

    fn queue_or_dispatch(&self, frame: Frame) -> bool {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match self.config.tx {
                TransferMode::Poll => {
                    let status = Status::from(self.registers.read(Register::Status));
                    if status.tx_buffer_free() {
                        transmit(&self.registers, &frame);
                        true
                    } else {
                        false
                    }
                }
                TransferMode::Interrupt if state.sending => state.tx.append(frame),
                TransferMode::Interrupt => {
                    transmit(&self.registers, &frame);
                    state.sending = true;
                    true
                }
            }
        })
    }

    fn next_frame(&self) -> Option<Frame> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            // Buffered frames are older than the ones still in the controller
            let oldest = state.rx.remove();
            if self.config.rx == TransferMode::Poll
                && Status::from(self.registers.read(Register::Status)).rx_buffer_full()
            {
                state.drain(&self.registers);
            }
            oldest.or_else(|| state.rx.remove())
        })
    }

    /// Services the controller. Call from the CAN interrupt handler.
    ///
    /// Received frames are moved to the receive buffer and the next queued
    /// frame is transmitted. Returns the interrupts that were flagged.
    pub fn on_interrupt(&self) -> InterruptSet {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let flags = InterruptSet::from_bits(self.registers.read(Register::Interrupt));
            if flags.ri() && self.config.rx == TransferMode::Interrupt {
                state.drain(&self.registers);
            }
            if flags.doi() {
                self.registers
                    .write(Register::Command, command::CLEAR_DATA_OVERRUN);
                state.overrun = true;
            }
            if flags.ti() && self.config.tx == TransferMode::Interrupt {
                match state.tx.remove() {
                    Some(frame) => transmit(&self.registers, &frame),
                    None => state.sending = false,
                }
            }
            flags
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State<'a>) -> T) -> T {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Capacity of the receive buffer
    pub fn rx_buffer_size(&self) -> usize {
        self.with_state(|s| s.rx.size())
    }

    /// Frames waiting in the receive buffer
    pub fn rx_buffer_count(&self) -> usize {
        self.with_state(|s| s.rx.count())
    }

    /// Most frames ever waiting in the receive buffer
    pub fn rx_buffer_peak_count(&self) -> usize {
        self.with_state(|s| s.rx.peak_count())
    }

    /// Capacity of the transmit buffer
    pub fn tx_buffer_size(&self) -> usize {
        self.with_state(|s| s.tx.size())
    }

    /// Frames waiting in the transmit buffer
    pub fn tx_buffer_count(&self) -> usize {
        self.with_state(|s| s.tx.count())
    }

    /// Most frames ever waiting in the transmit buffer
    pub fn tx_buffer_peak_count(&self) -> usize {
        self.with_state(|s| s.tx.peak_count())
    }

    /// Received frames lost because the receive buffer was full
    pub fn dropped_frames(&self) -> u32 {
        self.with_state(|s| s.dropped)
    }

    /// `true` while a transmission started by the driver is in flight
    pub fn is_sending(&self) -> bool {
        self.with_state(|s| s.sending)
    }

    /// Applied configuration
    pub fn config(&self) -> &CanConfig {
        &self.config
    }

    /// Programmed bit timing
    pub fn bit_timing(&self) -> &BitTiming {
        &self.timing
    }

    /// Returns to reset mode for reconfiguration. Frames still buffered are
    /// discarded.
    pub fn configure(self) -> CanConfigurable<'a, Id, D, R> {
        let State { rx, tx, .. } = self.state.into_inner().into_inner();
        CanConfigurable::from_parts(
            self.registers,
            self.dependencies,
            self.config,
            rx.into_storage(),
            tx.into_storage(),
        )
    }

    /// Stops the controller and hands back its dependencies.
    pub fn release(self) -> D {
        // Nothing left to report to if the controller ignores the request
        let _ = enter_reset(&self.registers);
        self.dependencies
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> CanBus for Can<'_, Id, D, R> {
    fn error_counters(&self) -> ErrorCounters {
        ErrorCounters {
            receive: self.registers.read(Register::RxErrorCounter),
            transmit: self.registers.read(Register::TxErrorCounter),
            warning_limit: self.registers.read(Register::ErrorWarningLimit),
        }
    }

    fn status(&self) -> Status {
        self.registers.read(Register::Status).into()
    }

    fn error_code_capture(&self) -> u8 {
        self.registers.read(Register::ErrorCodeCapture)
    }

    fn arbitration_lost_capture(&self) -> u8 {
        self.registers.read(Register::ArbitrationLostCapture)
    }
}

impl<Id: CanId, D: Dependencies<Id>, R: Registers> embedded_can::nb::Can for Can<'_, Id, D, R> {
    type Frame = Frame;
    type Error = embedded_can::ErrorKind;

    fn transmit(&mut self, frame: &Self::Frame) -> nb::Result<Option<Self::Frame>, Self::Error> {
        if self.queue_or_dispatch(*frame) {
            Ok(None)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Reports [`embedded_can::ErrorKind::Overrun`] once after received
    /// frames were lost.
    fn receive(&mut self) -> nb::Result<Self::Frame, Self::Error> {
        let overrun = self.with_state(|s| core::mem::replace(&mut s.overrun, false));
        if overrun {
            return Err(nb::Error::Other(embedded_can::ErrorKind::Overrun));
        }
        self.next_frame().ok_or(nb::Error::WouldBlock)
    }
}
