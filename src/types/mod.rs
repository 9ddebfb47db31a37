pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};

/// Tracked bodies. Each one owns exactly one slot of the pose table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyId {
    Vehicle,
    LeftWand,
    RightWand,
}

impl BodyId {
    pub const COUNT: usize = 3;
    pub const ALL: [BodyId; BodyId::COUNT] = [BodyId::Vehicle, BodyId::LeftWand, BodyId::RightWand];

    pub fn index(self) -> usize {
        match self {
            BodyId::Vehicle => 0,
            BodyId::LeftWand => 1,
            BodyId::RightWand => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BodyId::Vehicle => "vehicle",
            BodyId::LeftWand => "wand_L",
            BodyId::RightWand => "wand_R",
        }
    }
}

/// 6-DOF pose snapshot as reported by the tracking system.
///
/// A NaN in any position component means tracking was lost for that update;
/// it is not an error. Orientation is in degrees and always numeric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl PoseSample {
    pub fn new(x: f64, y: f64, z: f64, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self { x, y, z, roll, pitch, yaw }
    }

    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self::new(x, y, z, 0.0, 0.0, 0.0)
    }

    /// Sentinel sample for a body that cannot currently be tracked.
    pub fn lost() -> Self {
        Self::at(f64::NAN, f64::NAN, f64::NAN)
    }

    pub fn is_valid(&self) -> bool {
        !(self.x.is_nan() || self.y.is_nan() || self.z.is_nan())
    }

    pub fn position(&self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn distance_to(&self, other: &Point3) -> f64 {
        (self.position() - other).norm()
    }
}

impl Default for PoseSample {
    fn default() -> Self {
        Self::lost()
    }
}

/// Target handed to the vehicle's onboard position controller.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GoalPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f64,
}

impl GoalPosition {
    pub fn new(x: f64, y: f64, z: f64, yaw: f64) -> Self {
        Self { x, y, z, yaw }
    }

    pub fn from_point(p: &Point3, yaw: f64) -> Self {
        Self::new(p.x, p.y, p.z, yaw)
    }

    pub fn position(&self) -> Point3 {
        Point3::new(self.x, self.y, self.z)
    }
}

impl Default for GoalPosition {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }
}

/// Flight modes of the controller. Exactly one is active at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightMode {
    Disconnected,
    Grounded,
    Lift,
    Hovering,
    Follow,
    Land,
}

impl FlightMode {
    /// Motors may be spinning in this mode.
    pub fn is_airborne(self) -> bool {
        !matches!(self, FlightMode::Disconnected | FlightMode::Grounded)
    }

    pub fn label(self) -> &'static str {
        match self {
            FlightMode::Disconnected => "Disabled",
            FlightMode::Grounded => "Grounded",
            FlightMode::Lift => "Lifting...",
            FlightMode::Hovering => "Hovering...",
            FlightMode::Follow => "Follow Mode",
            FlightMode::Land => "Landing...",
        }
    }
}

impl Default for FlightMode {
    fn default() -> Self {
        FlightMode::Disconnected
    }
}

/// Power-management state reported by the vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryState {
    Battery,
    Charging,
    Charged,
    LowPower,
}

impl BatteryState {
    /// The firmware reports both charging and fully charged while docked.
    pub fn on_charger(self) -> bool {
        matches!(self, BatteryState::Charging | BatteryState::Charged)
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(BatteryState::Battery),
            1 => Some(BatteryState::Charging),
            2 => Some(BatteryState::Charged),
            3 => Some(BatteryState::LowPower),
            _ => None,
        }
    }
}
