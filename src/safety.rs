use crate::config::{RigProfile, TripPolicy};
use crate::types::{BatteryState, FlightMode, Point3, PoseSample};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TripCause {
    UpsideDown,
    TrackingLost,
    OnCharger,
    Untracked,
    OffCentre,
    LowPower,
}

impl TripCause {
    /// Operator-facing reason string.
    pub fn reason(self) -> &'static str {
        match self {
            TripCause::UpsideDown => "Upside down",
            TripCause::TrackingLost => "Tracking lost",
            TripCause::OnCharger => "Vehicle on charger, take it off the charger and try again",
            TripCause::Untracked => "Drone not tracked, check the motion capture system",
            TripCause::OffCentre => "Drone not in centre of flying area",
            TripCause::LowPower => "Disabled - Low Power",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafetyAction {
    Land,
    Disconnect,
    /// Stay grounded and drop the pending launch.
    RefuseLaunch,
}

impl From<TripPolicy> for SafetyAction {
    fn from(policy: TripPolicy) -> Self {
        match policy {
            TripPolicy::Land => SafetyAction::Land,
            TripPolicy::Disconnect => SafetyAction::Disconnect,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SafetyTrip {
    pub cause: TripCause,
    pub action: SafetyAction,
}

/// What the monitor needs to know about the current tick.
#[derive(Clone, Copy, Debug)]
pub struct SafetyInput {
    pub mode: FlightMode,
    /// This tick's vehicle sample, possibly lost.
    pub vehicle: PoseSample,
    pub last_valid_vehicle: PoseSample,
    pub battery: Option<BatteryState>,
    pub launch_requested: bool,
}

/// Per-tick safety checks, evaluated in priority order; first match wins.
pub struct SafetyMonitor {
    flip_roll_limit: f64,
    lost_tracking_frames: u32,
    flip_action: SafetyAction,
    tracking_loss_action: SafetyAction,
    launch_radius: f64,
    frames_without_tracking: u32,
}

impl SafetyMonitor {
    pub fn new(profile: &RigProfile) -> Self {
        Self {
            flip_roll_limit: profile.flip_roll_limit,
            lost_tracking_frames: profile.lost_tracking_frames,
            flip_action: profile.flip_policy.into(),
            tracking_loss_action: profile.tracking_loss_policy.into(),
            launch_radius: profile.launch_radius,
            frames_without_tracking: 0,
        }
    }

    /// Count consecutive invalid vehicle samples.
    pub fn observe_vehicle(&mut self, sample: &PoseSample) {
        if sample.is_valid() {
            self.frames_without_tracking = 0;
        } else {
            self.frames_without_tracking = self.frames_without_tracking.saturating_add(1);
        }
    }

    pub fn frames_without_tracking(&self) -> u32 {
        self.frames_without_tracking
    }

    pub fn reset(&mut self) {
        self.frames_without_tracking = 0;
    }

    pub fn check(&self, input: &SafetyInput) -> Option<SafetyTrip> {
        let airborne = input.mode.is_airborne();
        let roll = input.last_valid_vehicle.roll;

        if airborne && roll.abs() > self.flip_roll_limit {
            return Some(SafetyTrip { cause: TripCause::UpsideDown, action: self.flip_action });
        }

        if airborne && self.frames_without_tracking > self.lost_tracking_frames {
            return Some(SafetyTrip { cause: TripCause::TrackingLost, action: self.tracking_loss_action });
        }

        if input.mode == FlightMode::Grounded && input.launch_requested {
            if input.battery.map(|b| b.on_charger()).unwrap_or(false) {
                return Some(SafetyTrip { cause: TripCause::OnCharger, action: SafetyAction::RefuseLaunch });
            }
            if !input.vehicle.is_valid() {
                return Some(SafetyTrip { cause: TripCause::Untracked, action: SafetyAction::RefuseLaunch });
            }
            if input.vehicle.distance_to(&Point3::zeros()) > self.launch_radius {
                return Some(SafetyTrip { cause: TripCause::OffCentre, action: SafetyAction::RefuseLaunch });
            }
        }

        if input.battery == Some(BatteryState::LowPower)
            && !matches!(input.mode, FlightMode::Grounded | FlightMode::Land | FlightMode::Disconnected)
        {
            return Some(SafetyTrip { cause: TripCause::LowPower, action: SafetyAction::Land });
        }

        None
    }
}
