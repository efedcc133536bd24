//! Test doubles simulating the CAN controller during integration tests.
#![allow(dead_code)]

use esp32can::buffer::{Capacities, FrameMemory};
use esp32can::bus::CanConfigurable;
use esp32can::core::{CanId, Dependencies};
use esp32can::generic_array::typenum::consts::*;
use esp32can::message::raw::{RawFrame, WINDOW_LEN};
use esp32can::message::Frame;
use esp32can::reg::{command, Register, Registers};
use fugit::HertzU32;
use std::cell::RefCell;
use std::collections::VecDeque;

pub const MODE_RESET: u8 = 0x01;
pub const MODE_LISTEN_ONLY: u8 = 0x02;
pub const MODE_SELF_TEST: u8 = 0x04;
pub const MODE_SINGLE_FILTER: u8 = 0x08;

const STATUS_RX_BUFFER_FULL: u8 = 0x01;
const STATUS_TX_BUFFER_FREE: u8 = 0x04;
const STATUS_TX_COMPLETE: u8 = 0x08;

const INTERRUPT_RX: u8 = 0x01;
const INTERRUPT_TX: u8 = 0x02;
const INTERRUPT_DATA_OVERRUN: u8 = 0x08;

/// Identity of the simulated controller. Its address is never dereferenced.
pub enum TestCan {}

unsafe impl CanId for TestCan {
    const ADDRESS: *const () = 0x3FF6_B000 as *const _;
}

/// Dependencies reporting the ESP32 APB clock
pub struct TestDependencies;

unsafe impl Dependencies<TestCan> for TestDependencies {
    fn apb_clock(&self) -> HertzU32 {
        HertzU32::MHz(80)
    }
}

/// Storage sizes used by most tests
pub struct TestCapacities;

impl Capacities for TestCapacities {
    type RxFrames = U8;
    type TxFrames = U4;
}

#[derive(Default)]
struct State {
    mode: u8,
    interrupt: u8,
    interrupt_enable: u8,
    bus_timing: [u8; 2],
    clock_divider: u8,
    error_warning_limit: u8,
    rx_error_counter: u8,
    tx_error_counter: u8,
    error_code_capture: u8,
    arbitration_lost_capture: u8,
    acceptance: [u8; 8],
    tx_window: [u8; WINDOW_LEN],
    rx_fifo: VecDeque<[u8; WINDOW_LEN]>,
    transmitted: Vec<Frame>,
    commands: Vec<u8>,
    transmitting: bool,
    data_overrun: bool,
    refuses_reset: bool,
    stuck_in_reset: bool,
    broken_bus_timing: bool,
}

impl State {
    fn in_reset(&self) -> bool {
        self.mode & MODE_RESET != 0
    }

    fn raise(&mut self, interrupt: u8) {
        self.interrupt |= interrupt & self.interrupt_enable;
    }
}

/// In-memory SJA1000 reproducing the register behavior the driver relies on.
///
/// Transmissions stay in flight until [`MockController::complete_transmission`]
/// is called. Self reception requests also place the frame into the receive
/// FIFO right away.
#[derive(Default)]
pub struct MockController {
    state: RefCell<State>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The controller ignores requests to enter reset mode.
    pub fn refusing_reset() -> Self {
        let mock = Self::default();
        mock.state.borrow_mut().refuses_reset = true;
        mock
    }

    /// The controller never leaves reset mode.
    pub fn stuck_in_reset() -> Self {
        let mock = Self::default();
        mock.state.borrow_mut().stuck_in_reset = true;
        mock
    }

    /// BTR0 reads back inverted.
    pub fn with_broken_bus_timing() -> Self {
        let mock = Self::default();
        mock.state.borrow_mut().broken_bus_timing = true;
        mock
    }

    /// A frame arrives from the bus.
    pub fn inject(&self, frame: &Frame) {
        let mut bytes = [0; WINDOW_LEN];
        let raw = RawFrame::encode(frame);
        bytes[..raw.as_bytes().len()].copy_from_slice(raw.as_bytes());
        let mut state = self.state.borrow_mut();
        state.rx_fifo.push_back(bytes);
        state.raise(INTERRUPT_RX);
    }

    /// The frame in flight was acknowledged.
    pub fn complete_transmission(&self) {
        let mut state = self.state.borrow_mut();
        assert!(state.transmitting, "no transmission in flight");
        state.transmitting = false;
        state.raise(INTERRUPT_TX);
    }

    /// The controller lost a frame because its FIFO overflowed.
    pub fn overrun(&self) {
        let mut state = self.state.borrow_mut();
        state.data_overrun = true;
        state.raise(INTERRUPT_DATA_OVERRUN);
    }

    pub fn set_error_counters(&self, rx: u8, tx: u8) {
        let mut state = self.state.borrow_mut();
        state.rx_error_counter = rx;
        state.tx_error_counter = tx;
    }

    /// Latches the capture registers of a bus error and a lost arbitration.
    pub fn set_captures(&self, error_code: u8, arbitration_lost: u8) {
        let mut state = self.state.borrow_mut();
        state.error_code_capture = error_code;
        state.arbitration_lost_capture = arbitration_lost;
    }

    pub fn mode(&self) -> u8 {
        self.state.borrow().mode
    }

    pub fn bus_timing(&self) -> [u8; 2] {
        self.state.borrow().bus_timing
    }

    pub fn clock_divider(&self) -> u8 {
        self.state.borrow().clock_divider
    }

    pub fn acceptance(&self) -> [u8; 8] {
        self.state.borrow().acceptance
    }

    pub fn interrupt_enable(&self) -> u8 {
        self.state.borrow().interrupt_enable
    }

    pub fn error_warning_limit(&self) -> u8 {
        self.state.borrow().error_warning_limit
    }

    pub fn transmitted(&self) -> Vec<Frame> {
        self.state.borrow().transmitted.clone()
    }

    pub fn commands(&self) -> Vec<u8> {
        self.state.borrow().commands.clone()
    }

    pub fn pending_rx(&self) -> usize {
        self.state.borrow().rx_fifo.len()
    }

    pub fn data_overrun(&self) -> bool {
        self.state.borrow().data_overrun
    }
}

impl Registers for MockController {
    fn read(&self, register: Register) -> u8 {
        let mut state = self.state.borrow_mut();
        match register {
            Register::Mode => state.mode,
            Register::Status => {
                let mut status = 0;
                if !state.rx_fifo.is_empty() {
                    status |= STATUS_RX_BUFFER_FULL;
                }
                if !state.transmitting {
                    status |= STATUS_TX_BUFFER_FREE | STATUS_TX_COMPLETE;
                }
                status
            }
            Register::Interrupt => core::mem::take(&mut state.interrupt),
            Register::InterruptEnable => state.interrupt_enable,
            Register::BusTiming0 if state.broken_bus_timing => !state.bus_timing[0],
            Register::BusTiming0 => state.bus_timing[0],
            Register::BusTiming1 => state.bus_timing[1],
            Register::ErrorCodeCapture => state.error_code_capture,
            Register::ErrorWarningLimit => state.error_warning_limit,
            Register::RxErrorCounter => state.rx_error_counter,
            Register::TxErrorCounter => state.tx_error_counter,
            Register::Window(n) if state.in_reset() && n < 8 => state.acceptance[usize::from(n)],
            Register::Window(n) => state
                .rx_fifo
                .front()
                .map_or(0, |frame| frame[usize::from(n)]),
            Register::RxMessageCounter => state.rx_fifo.len() as u8,
            Register::ArbitrationLostCapture => state.arbitration_lost_capture,
            Register::ClockDivider => state.clock_divider,
            Register::Command => 0,
        }
    }

    fn write(&self, register: Register, value: u8) {
        let mut state = self.state.borrow_mut();
        match register {
            Register::Mode => {
                let mut mode = value;
                if state.refuses_reset {
                    mode &= !MODE_RESET;
                }
                if state.stuck_in_reset {
                    mode |= MODE_RESET;
                }
                state.mode = mode;
            }
            Register::Command => {
                state.commands.push(value);
                if value & (command::TX_REQUEST | command::SELF_RX_REQUEST) != 0 {
                    let window = state.tx_window;
                    state.transmitted.push(RawFrame::from_bytes(window).decode());
                    state.transmitting = true;
                    if value & command::SELF_RX_REQUEST != 0 {
                        state.rx_fifo.push_back(window);
                        state.raise(INTERRUPT_RX);
                    }
                }
                if value & command::RELEASE_RX_BUFFER != 0 {
                    state.rx_fifo.pop_front();
                    if !state.rx_fifo.is_empty() {
                        state.raise(INTERRUPT_RX);
                    }
                }
                if value & command::CLEAR_DATA_OVERRUN != 0 {
                    state.data_overrun = false;
                }
            }
            Register::InterruptEnable => state.interrupt_enable = value,
            Register::BusTiming0 => state.bus_timing[0] = value,
            Register::BusTiming1 => state.bus_timing[1] = value,
            Register::ErrorWarningLimit => state.error_warning_limit = value,
            Register::RxErrorCounter => state.rx_error_counter = value,
            Register::TxErrorCounter => state.tx_error_counter = value,
            Register::Window(n) if state.in_reset() && n < 8 => {
                state.acceptance[usize::from(n)] = value
            }
            Register::Window(n) => state.tx_window[usize::from(n)] = value,
            Register::ClockDivider => state.clock_divider = value,
            Register::Status
            | Register::Interrupt
            | Register::ArbitrationLostCapture
            | Register::ErrorCodeCapture
            | Register::RxMessageCounter => {}
        }
    }
}

/// Configurable bus on top of `mock` with `memory` as buffer storage.
pub fn configurable<'a, C: Capacities>(
    bitrate: HertzU32,
    mock: &'a MockController,
    memory: &'a mut FrameMemory<C>,
) -> CanConfigurable<'a, TestCan, TestDependencies, &'a MockController> {
    CanConfigurable::new_with_registers(bitrate, mock, TestDependencies, memory)
}
