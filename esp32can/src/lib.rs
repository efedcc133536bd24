#![no_std]
#![warn(missing_docs)]
//! # ESP32CAN
//!
//! ## Overview
//! This crate drives the CAN controller of the ESP32, which is register
//! compatible with the NXP SJA1000 in PeliCAN mode.
//!
//! It provides the following features:
//!
//! - bit timing synthesis from the APB clock and a desired bit rate, with a
//!   configurable tolerance
//! - classic CAN frames with standard and extended identifiers, data and
//!   remote frames
//! - receive and transmit buffers in caller provided memory, sized at compile
//!   time via [`FrameMemory`]
//! - polled or interrupt driven transfer, chosen per direction
//! - normal, listen only and loop back (self test) modes
//! - single and dual acceptance filters
//!
//! Routing the TX/RX signals through the GPIO matrix and enabling the
//! peripheral clock are platform specific. They are covered by the safety
//! requirements of the [`esp32can_core`] traits, which the platform HAL is
//! expected to implement.
//!
//! In order to use the controller, one has to instantiate
//! [`CanConfigurable`] and [`finalize`] it. Its constructor requires an
//! instance of a [`Dependencies`] implementing struct and holds onto it until
//! it's [`released`].
//!
//! ## Frame memory
//!
//! The driver never allocates. Buffer storage is a [`FrameMemory`] whose
//! size is selected by implementing [`Capacities`] on a marker type. The
//! number of frames each buffer actually uses can be lowered at
//! configuration time.
//!
//! ```no_run
//! use esp32can::generic_array::typenum::consts::*;
//! use esp32can::buffer::FrameMemory;
//! struct Capacities;
//! impl esp32can::buffer::Capacities for Capacities {
//!     type RxFrames = U32;
//!     type TxFrames = U16;
//! }
//!
//! static mut FRAME_MEMORY: FrameMemory<Capacities> = FrameMemory::new();
//! ```
//!
//! ## General usage example
//!
//! ```no_run
//! # use esp32can::generic_array::typenum::consts::*;
//! # use esp32can::buffer::FrameMemory;
//! # use fugit::RateExtU32 as _;
//! # struct Capacities;
//! # impl esp32can::buffer::Capacities for Capacities {
//! #     type RxFrames = U32;
//! #     type TxFrames = U16;
//! # }
//! # static mut FRAME_MEMORY: FrameMemory<Capacities> = FrameMemory::new();
//! # pub enum Twai0 {}
//! # unsafe impl esp32can::core::CanId for Twai0 {
//! #     const ADDRESS: *const () = 0x3FF6_B000 as *const _;
//! # }
//! # pub mod hal {
//! #     pub mod can {
//! #         pub struct Dependencies(());
//! #         unsafe impl<ID: esp32can::core::CanId> esp32can::core::Dependencies<ID> for Dependencies {
//! #             fn apb_clock(&self) -> fugit::HertzU32 { unreachable!() }
//! #         }
//! #         impl Dependencies {
//! #             pub fn new() -> Result<Dependencies, ()> {
//! #                 Ok(Dependencies(()))
//! #             }
//! #         }
//! #     }
//! # }
//! use esp32can::config::{Mode, TransferMode};
//! use esp32can::embedded_can::{Frame as _, StandardId};
//! use esp32can::filter::Filter;
//! use esp32can::message::Frame;
//!
//! let dependencies = hal::can::Dependencies::new(/* pins, clock gate */).unwrap();
//! let mut can = esp32can::bus::CanConfigurable::<'_, Twai0, _>::new(
//!     500.kHz(),
//!     dependencies,
//!     unsafe { &mut *core::ptr::addr_of_mut!(FRAME_MEMORY) },
//! );
//!
//! // The controller is held in reset and the config struct can be modified.
//! can.config().mode = Mode::Normal;
//! can.config().rx = TransferMode::Interrupt;
//! can.config().tx = TransferMode::Poll;
//! can.config().filter = Filter::SingleStandard {
//!     code: StandardId::new(0x120).unwrap(),
//!     code_data: [0; 2],
//!     mask: StandardId::new(0x00F).unwrap(),
//!     mask_data: [0xFF; 2],
//! };
//!
//! // Call to `finalize` leaves reset mode
//! let can = can.finalize().unwrap();
//!
//! let frame = Frame::new(StandardId::new(0x123).unwrap(), &[1, 2, 3]).unwrap();
//! while !can.send(frame) {}
//!
//! // `can.on_interrupt()` is called from the CAN interrupt handler
//! if let Some(frame) = can.receive() {
//!     // ...
//! }
//! ```
//!
//! [`CanConfigurable`]: crate::bus::CanConfigurable
//! [`finalize`]: crate::bus::CanConfigurable::finalize
//! [`released`]: crate::bus::Can::release
//! [`Dependencies`]: esp32can_core::Dependencies
//! [`Capacities`]: crate::buffer::Capacities
//! [`FrameMemory`]: crate::buffer::FrameMemory

pub mod buffer;
pub mod bus;
pub mod config;
pub mod filter;
pub mod interrupt;
pub mod message;
pub mod prelude;
pub mod reg;

pub use embedded_can;
pub use esp32can_core as core;
pub use generic_array;
