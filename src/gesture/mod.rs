//! Grip learning and recognition.
//!
//! A grip is the spatial relationship between both wands and the vehicle.
//! `calibrator` decides when one is stable enough to keep and finds the
//! closest known grip for live poses; `catalog` owns the persisted set.

pub mod calibrator;
pub mod catalog;

pub use calibrator::{median, GestureCalibrator, Promotion, TrainingState, TrainingWindow};
pub use catalog::{CalibratedOffset, Catalog};
