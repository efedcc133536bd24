#![no_std]
#![warn(missing_docs)]

//! `esp32can-core` is the thin integration layer between the platform
//! independent [`esp32can`] driver and the HAL crate of a concrete chip
//! (referred to as the _target HAL_).
//!
//! The driver only knows how to talk to an SJA1000 compatible register file.
//! Routing the TX/RX signals through the GPIO matrix, ungating the peripheral
//! clock and releasing the peripheral from its system reset are platform
//! specific and stay on the target HAL side. The traits in this crate are the
//! contract between the two.
//!
//! Traits from this crate are not supposed to be implemented by the
//! application developer; implementations should be provided by target HALs.
//!
//! [`esp32can`]: <https://docs.rs/crate/esp32can/>

pub use fugit;

/// Trait representing CAN peripheral identity
///
/// Types implementing this trait are marker types identifying a specific CAN
/// controller instance. It only conveys *where* the register file is
/// located, not that it can be accessed. The latter is expressed by the
/// [`Dependencies`] trait.
///
/// # Safety
/// `CanId::ADDRESS` points to the start of the register file of an SJA1000
/// compatible CAN controller (`0x3FF6_B000` on the ESP32).
///
/// # Examples
/// ```no_run
/// use esp32can_core::CanId;
///
/// pub enum Twai0 {}
///
/// unsafe impl CanId for Twai0 {
///     const ADDRESS: *const () = 0x3FF6_B000 as *const _;
/// }
/// ```
pub unsafe trait CanId {
    /// Static address of the register file of the CAN controller
    const ADDRESS: *const ();
}

/// Trait representing CAN peripheral dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose the GPIO pins carrying the TX and RX signals and the peripheral
///   clock gate, and release them upon destruction
/// - be constructible only when the signals are routed through the GPIO
///   matrix and the peripheral clock is enabled
/// - be a singleton for a given [`CanId`]
///
/// so that the driver is the sole owner of the controller while it runs.
///
/// # Safety
/// While a [`Dependencies`] instance exists
/// - the APB clock must not change
/// - the CAN related pins must not be reconfigured
/// - the register file must not be accessible elsewhere in the target HAL
///
/// # Example
/// ```no_run
/// # mod hal {
/// #     pub struct Pin<const N: u8>;
/// #     pub struct ClockGate;
/// #     impl ClockGate {
/// #         pub fn apb_frequency(&self) -> fugit::HertzU32 { fugit::HertzU32::MHz(80) }
/// #     }
/// # }
/// use esp32can_core::CanId;
/// use fugit::HertzU32;
///
/// pub enum Twai0 {}
///
/// unsafe impl CanId for Twai0 {
///     const ADDRESS: *const () = 0x3FF6_B000 as *const _;
/// }
///
/// pub struct Dependencies {
///     tx: hal::Pin<5>,
///     rx: hal::Pin<4>,
///     clock: hal::ClockGate,
/// }
///
/// unsafe impl esp32can_core::Dependencies<Twai0> for Dependencies {
///     fn apb_clock(&self) -> HertzU32 {
///         self.clock.apb_frequency()
///     }
/// }
/// ```
pub unsafe trait Dependencies<Id: CanId> {
    /// Frequency of the APB clock feeding the CAN controller.
    ///
    /// Every bit timing derivation starts from this value; on the ESP32 it
    /// is 80 MHz unless the CPU runs from a low power clock source.
    fn apb_clock(&self) -> fugit::HertzU32;
}
