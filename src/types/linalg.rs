//! Linear algebra aliases for the pose geometry
//!
//! Everything is in the tracking system's world frame, metres and degrees
//! at the boundaries, radians only inside the rotation helpers.

use nalgebra::{Rotation3, Vector3};

// ===== Dimensions =====
pub const AXES: usize = 3;
pub const OFFSET_DIM: usize = 2 * AXES; // left Δxyz + right Δxyz

// ===== Geometry Types =====
pub type Point3 = Vector3<f64>;
pub type Rot3 = Rotation3<f64>;

/// Six per-axis values: `[Δx_l, Δy_l, Δz_l, Δx_r, Δy_r, Δz_r]`
pub type OffsetVec = [f64; OFFSET_DIM];

pub fn point(x: f64, y: f64, z: f64) -> Point3 {
    Point3::new(x, y, z)
}
