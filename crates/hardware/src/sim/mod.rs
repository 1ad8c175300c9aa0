//! Simulation: clock domains and the top-level cycle loop.

/// Multi-domain clock stepper.
pub mod clock;
/// Top-level simulator owning every component.
pub mod simulator;
