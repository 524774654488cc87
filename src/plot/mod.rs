//! Life-story hierarchy: outlines, stages, segments, and daily plots,
//! plus the window resolver, generator, and advancement state machine
//! that operate over them.

pub mod generator;
pub mod models;
pub mod state_machine;
pub mod window;

pub use models::{DailyPlot, LifeOutline, LifeStage, PlotSegment, PlotStatus, StageStatus};
