#![no_std]

//! Motion control for the micro-turtle: the trapezoidal motion profile,
//! the two-motor stepper sequencer and the pen servo sequencer, plus the
//! configuration block they read their parameters from.
//!
//! Everything here is driven by the embedder calling the tick methods
//! from its periodic timer context; hardware is reached only through the
//! [`stepper::StepperBus`] and [`servo::ServoPwm`] traits.

pub mod config;
pub mod profile;
pub mod servo;
pub mod stepper;

#[cfg(test)]
mod test;
