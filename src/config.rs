use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{FlightError, FlightResult};

/// What the controller does when a safety monitor trips in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPolicy {
    /// Ramp down through LAND.
    Land,
    /// Stop the motors and drop the link.
    Disconnect,
}

/// Axis-aligned box the follow target is clamped into.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlightEnvelope {
    pub min: [f64; 3],
    pub max: [f64; 3],
    /// Lowest height a tracking setpoint may ask for.
    pub hover_floor: f64,
}

impl Default for FlightEnvelope {
    fn default() -> Self {
        Self {
            min: [-1.5, -1.5, 0.0],
            max: [1.5, 1.5, 1.8],
            hover_floor: 0.3,
        }
    }
}

/// Per-rig tuning. One instance is loaded per session and never mutated.
///
/// Every field has a default, so a profile file only needs the values
/// that differ for a particular vehicle/wand set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RigProfile {
    pub name: String,

    // ── Loop ──
    pub tick_interval_ms: u64,

    // ── Lift ──
    pub lift_height: f64,
    pub lift_rate_start: f64,
    pub lift_rate_step: f64,
    pub lift_settle_threshold: f64,

    // ── Land ──
    pub land_rate_growth: f64,
    pub land_spin_rate: f64,
    pub path_tolerance: f64,

    // ── Hover ──
    pub hover_spin_rate: f64,

    // ── Follow ──
    pub wand_length: f64,
    pub free_follow_drop: f64,
    pub step_leeway_min: f64,
    pub step_leeway_max: f64,
    /// Session starts unlocked: follow can be toggled without a learned grip.
    pub require_grip: bool,
    pub match_leeway: f64,
    pub follow_leeway: f64,

    // ── Gesture training ──
    pub variance_threshold: f64,
    pub min_window: usize,
    pub abandon_cap: usize,
    /// Also learn grips while the vehicle sits on the ground.
    pub train_while_grounded: bool,

    // ── Safety ──
    pub flip_roll_limit: f64,
    pub lost_tracking_frames: u32,
    pub tracking_loss_policy: TripPolicy,
    pub flip_policy: TripPolicy,
    pub launch_radius: f64,

    // ── Dispatch ──
    pub floor_height: f64,
    pub envelope: FlightEnvelope,
}

impl Default for RigProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            tick_interval_ms: 1,
            lift_height: 0.5,
            lift_rate_start: 3.0,
            lift_rate_step: 0.01,
            lift_settle_threshold: 0.17,
            land_rate_growth: 1.1,
            land_spin_rate: 0.05,
            path_tolerance: 0.2,
            hover_spin_rate: 0.05,
            wand_length: 0.25,
            free_follow_drop: 0.25,
            step_leeway_min: 0.2,
            step_leeway_max: 0.4,
            require_grip: true,
            match_leeway: 0.1,
            follow_leeway: 0.2,
            variance_threshold: 0.05,
            min_window: 300,
            abandon_cap: 10,
            train_while_grounded: true,
            flip_roll_limit: 120.0,
            lost_tracking_frames: 2500,
            tracking_loss_policy: TripPolicy::Disconnect,
            flip_policy: TripPolicy::Land,
            launch_radius: 1.0,
            floor_height: 0.02,
            envelope: FlightEnvelope::default(),
        }
    }
}

impl RigProfile {
    pub fn load(path: &Path) -> FlightResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| FlightError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: RigProfile = serde_json::from_str(&text).map_err(|source| FlightError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reject profiles that would make the state machine misbehave
    /// (e.g. a lift rate that can never reach 1).
    pub fn validate(&self) -> FlightResult<()> {
        let invalid = |msg: &str| Err(FlightError::InvalidProfile(format!("{}: {}", self.name, msg)));

        if self.lift_rate_start < 1.0 || self.lift_rate_step <= 0.0 {
            return invalid("lift rate must start at >= 1 and step down by a positive amount");
        }
        if self.land_rate_growth <= 1.0 {
            return invalid("land_rate_growth must be > 1");
        }
        if self.min_window < 2 || self.abandon_cap < 2 {
            return invalid("training windows need at least 2 samples");
        }
        if self.match_leeway <= 0.0 || self.follow_leeway <= 0.0 {
            return invalid("leeways must be positive");
        }
        if self.step_leeway_min > self.step_leeway_max {
            return invalid("step_leeway_min exceeds step_leeway_max");
        }
        if self.floor_height < 0.0 || self.envelope.hover_floor <= self.floor_height {
            return invalid("hover floor must sit above the stop floor");
        }
        for axis in 0..3 {
            if self.envelope.min[axis] > self.envelope.max[axis] {
                return invalid("envelope min exceeds max");
            }
        }
        Ok(())
    }
}
