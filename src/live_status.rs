use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::controller::ControllerStatus;
use crate::error::FlightResult;
use crate::pose_table::PoseSnapshot;
use crate::types::{BodyId, FlightMode, PoseSample};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BodyStatus {
    pub body: BodyId,
    pub present: bool,
    pub valid: bool,
    /// Lost samples serialise with null coordinates.
    pub pose: PoseSample,
}

/// Periodic on-disk snapshot of the session, rewritten in place.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub mode: FlightMode,
    pub status: String,
    pub reason: Option<String>,
    pub ticks: u64,
    pub frames_without_tracking: u32,
    pub active_grip: Option<String>,
    pub training_progress: f64,
    pub catalog_size: usize,
    pub setpoints_sent: u64,
    pub stops_sent: u64,
    // Goal
    pub goal_x: f64,
    pub goal_y: f64,
    pub goal_z: f64,
    pub goal_yaw: f64,
    pub bodies: Vec<BodyStatus>,
}

impl LiveStatus {
    pub fn new(status: &ControllerStatus, poses: &PoseSnapshot, uptime_seconds: u64) -> Self {
        let bodies = BodyId::ALL
            .iter()
            .map(|&body| {
                let pose = poses.get(body);
                BodyStatus { body, present: poses.is_present(body), valid: pose.is_valid(), pose }
            })
            .collect();

        Self {
            timestamp: current_timestamp(),
            uptime_seconds,
            mode: status.mode,
            status: status.status.clone(),
            reason: status.reason.clone(),
            ticks: status.ticks,
            frames_without_tracking: status.frames_without_tracking,
            active_grip: status.active_grip.clone(),
            training_progress: status.training_progress,
            catalog_size: status.catalog_size,
            setpoints_sent: status.setpoints_sent,
            stops_sent: status.stops_sent,
            goal_x: status.goal.x,
            goal_y: status.goal.y,
            goal_z: status.goal.z,
            goal_yaw: status.goal.yaw,
            bodies,
        }
    }

    pub fn save(&self, path: &Path) -> FlightResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::from)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
