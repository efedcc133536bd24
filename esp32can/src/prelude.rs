//! Trait imports
pub use crate::bus::CanBus as _;
pub use crate::reg::Registers as _;
pub use embedded_can::nb::Can as _;
pub use embedded_can::Frame as _;
