//! Step driver - walks the tree once per global step

pub mod step;

pub use step::{run, run_step, StepReport};
