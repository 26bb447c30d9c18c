//! Hardware primitives the sensing core is built on.
//!
//! The scanner only ever needs two operations from the platform: drive one
//! digital control line, and take one 16-bit analog sample. Real GPIO/ADC
//! drivers implement these traits outside this crate; [`crate::sim`]
//! provides a scripted implementation for tests and the demo binary.

use thiserror::Error;

/// Errors surfaced by the hardware primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwError {
    /// The analog conversion failed or timed out.
    #[error("analog read failed")]
    AdcRead,
    /// A digital control line could not be driven.
    #[error("control line write failed: {0}")]
    LineWrite(&'static str),
}

/// One digital output driving a multiplexer select line.
pub trait SelectPin {
    fn set(&mut self, high: bool) -> Result<(), HwError>;
}

/// The analog input carrying the muxed sensor signal.
pub trait AnalogPin {
    /// Takes exactly one sample of the currently selected sensor.
    fn read_u16(&mut self) -> Result<u16, HwError>;
}
