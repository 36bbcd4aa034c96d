//! psim - Membrane Computing (P System) Simulation Engine

pub mod core;
pub mod listener;
pub mod membrane;
pub mod object;
pub mod rules;
pub mod simulation;
pub mod system;
pub mod tunnel;
