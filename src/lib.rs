//! Wand-gesture flight control.
//!
//! Two hand-held wands and a quadcopter are tracked by motion capture. The
//! controller learns how the operator grips the vehicle, recognises that
//! grip later and flies the vehicle to wherever the hands imply it should
//! be, wrapped in a lift/hover/follow/land state machine with safety
//! interlocks.

pub mod config;
pub mod control_loop;
pub mod controller;
pub mod dashboard;
pub mod dispatcher;
pub mod error;
pub mod gesture;
pub mod live_status;
pub mod pose_fusion;
pub mod pose_table;
pub mod safety;
pub mod sim;
pub mod types;

pub use config::{FlightEnvelope, RigProfile, TripPolicy};
pub use control_loop::{ControlLoop, LoopStats};
pub use controller::{ControlEvent, ControllerStatus, FlightModeController, OperatorCommand};
pub use dispatcher::{DispatchOutcome, SetpointDispatcher, SetpointLink};
pub use error::{FlightError, FlightResult};
pub use gesture::{CalibratedOffset, Catalog, GestureCalibrator, TrainingState};
pub use pose_table::{PoseSnapshot, PoseTable};
pub use types::{BatteryState, BodyId, FlightMode, GoalPosition, PoseSample};
