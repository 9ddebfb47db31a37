// pose_fusion.rs — Wand geometry for the follow target
//
// Pure functions only. No pose table, no controller state, no I/O.
// Callers check `PoseSample::is_valid` before handing a pose in here;
// an invalid pose simply propagates NaN through the result.

use crate::types::{Point3, PoseSample, Rot3};

/// Rotation for a body with the given orientation in degrees.
///
/// Composition is R = Rz(yaw) · Ry(−pitch) · Rx(roll): roll about the
/// forward axis, pitch reversed relative to the textbook yaw-pitch-roll
/// convention to match the tracker's sign, yaw about vertical.
pub fn rotation(roll_deg: f64, pitch_deg: f64, yaw_deg: f64) -> Rot3 {
    Rot3::from_euler_angles(
        roll_deg.to_radians(),
        -pitch_deg.to_radians(),
        yaw_deg.to_radians(),
    )
}

/// Point `distance` metres out along the body's own −Z axis, in world frame.
///
/// This is "the tip of the wand". A distance of zero returns the body's
/// position unchanged whatever the orientation.
pub fn project_endpoint(pose: &PoseSample, distance: f64) -> Point3 {
    let tip = Point3::new(0.0, 0.0, -distance);
    rotation(pose.roll, pose.pitch, pose.yaw) * tip + pose.position()
}

pub fn fuse_midpoint(a: &Point3, b: &Point3) -> Point3 {
    (a + b) * 0.5
}

pub fn distance(a: &Point3, b: &Point3) -> f64 {
    (a - b).norm()
}

/// Midpoint of both wand tips. Used as the free-follow target.
pub fn wand_target(left: &PoseSample, right: &PoseSample, wand_length: f64) -> Point3 {
    let tip_l = project_endpoint(left, wand_length);
    let tip_r = project_endpoint(right, wand_length);
    fuse_midpoint(&tip_l, &tip_r)
}
