use chrono::Utc;
use std::collections::VecDeque;

use super::catalog::{timestamp_name, CalibratedOffset, Catalog};
use crate::config::RigProfile;
use crate::error::FlightError;
use crate::types::{OffsetVec, PoseSample, OFFSET_DIM};

/// Outcome of feeding one tick into the training window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrainingState {
    /// Still accumulating.
    Training,
    /// Stable for longer than the minimum window; ready to promote.
    Converged,
    /// Never stabilised within the abandon cap; window discarded.
    Abandoned,
}

/// Result of promoting a converged window.
///
/// The offset is always in the in-memory catalog; `save_error` is set when
/// writing the catalog file failed.
#[derive(Debug)]
pub struct Promotion {
    pub offset: CalibratedOffset,
    pub save_error: Option<FlightError>,
}

/// Rolling per-axis differences (vehicle − hand) for a candidate grip.
#[derive(Clone, Debug, Default)]
pub struct TrainingWindow {
    samples: VecDeque<OffsetVec>,
}

impl TrainingWindow {
    pub fn push(&mut self, values: OffsetVec) {
        self.samples.push_back(values);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// `max − min` per axis.
    pub fn spreads(&self) -> OffsetVec {
        let mut lo = [f64::INFINITY; OFFSET_DIM];
        let mut hi = [f64::NEG_INFINITY; OFFSET_DIM];
        for s in &self.samples {
            for axis in 0..OFFSET_DIM {
                lo[axis] = lo[axis].min(s[axis]);
                hi[axis] = hi[axis].max(s[axis]);
            }
        }
        let mut out = [0.0; OFFSET_DIM];
        if self.samples.is_empty() {
            return out;
        }
        for axis in 0..OFFSET_DIM {
            out[axis] = hi[axis] - lo[axis];
        }
        out
    }

    pub fn medians(&self) -> OffsetVec {
        let mut out = [0.0; OFFSET_DIM];
        for (axis, slot) in out.iter_mut().enumerate() {
            let column: Vec<f64> = self.samples.iter().map(|s| s[axis]).collect();
            *slot = median(column);
        }
        out
    }
}

/// Median with the mean of the middle pair for even lengths. 0 when empty.
pub fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    }
}

/// Learns stable hand-to-vehicle grips and recognises them later.
pub struct GestureCalibrator {
    catalog: Catalog,
    window: TrainingWindow,
    variance_threshold: f64,
    min_window: usize,
    abandon_cap: usize,
}

impl GestureCalibrator {
    pub fn new(catalog: Catalog, profile: &RigProfile) -> Self {
        Self {
            catalog,
            window: TrainingWindow::default(),
            variance_threshold: profile.variance_threshold,
            min_window: profile.min_window,
            abandon_cap: profile.abandon_cap,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn window(&self) -> &TrainingWindow {
        &self.window
    }

    /// Fraction of the minimum window accumulated, in [0, 1].
    pub fn progress(&self) -> f64 {
        (self.window.len() as f64 / self.min_window as f64).min(1.0)
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Feed one tick of poses into the training window.
    ///
    /// A grip that is never stable is dropped after `abandon_cap` samples;
    /// a stable one has to hold for more than `min_window` samples before
    /// it is reported as converged. Invalid poses break the grip.
    pub fn observe(&mut self, left: &PoseSample, right: &PoseSample, vehicle: &PoseSample) -> TrainingState {
        if !(left.is_valid() && right.is_valid() && vehicle.is_valid()) {
            if self.window.is_empty() {
                return TrainingState::Training;
            }
            self.window.clear();
            return TrainingState::Abandoned;
        }

        self.window.push([
            vehicle.x - left.x,
            vehicle.y - left.y,
            vehicle.z - left.z,
            vehicle.x - right.x,
            vehicle.y - right.y,
            vehicle.z - right.z,
        ]);

        let len = self.window.len();
        if len < 2 {
            return TrainingState::Training;
        }

        let stable = self.window.spreads().iter().all(|&s| s < self.variance_threshold);

        if stable {
            if len > self.min_window {
                return TrainingState::Converged;
            }
            TrainingState::Training
        } else if len > self.abandon_cap {
            log::debug!("Training window abandoned after {} samples", len);
            self.window.clear();
            TrainingState::Abandoned
        } else {
            TrainingState::Training
        }
    }

    /// Turn the current window into a catalog entry named by timestamp.
    pub fn promote(&mut self) -> Promotion {
        let name = self.catalog.unique_name(&timestamp_name(Utc::now()));
        let offset = CalibratedOffset::from_values(name, self.window.medians());
        self.window.clear();

        let save_error = self.catalog.append(offset.clone()).err();
        match &save_error {
            None => log::info!(
                "Learned grip {} (L {:?}, R {:?}), catalog now {} entries",
                offset.name,
                offset.left,
                offset.right,
                self.catalog.len()
            ),
            Some(e) => log::error!("Grip {} kept for this session only: {}", offset.name, e),
        }

        Promotion { offset, save_error }
    }

    /// Nearest catalog grip whose implied hand positions are both within
    /// `leeway` of the live hands. Ties go to the earlier entry.
    pub fn match_grip(
        &self,
        left: &PoseSample,
        right: &PoseSample,
        vehicle: &PoseSample,
        leeway: f64,
    ) -> Option<&CalibratedOffset> {
        if !(left.is_valid() && right.is_valid() && vehicle.is_valid()) {
            return None;
        }

        let mut best: Option<(f64, &CalibratedOffset)> = None;
        for entry in self.catalog.entries() {
            let (err_l, err_r) = entry.hand_errors(left, right, vehicle);
            if err_l >= leeway || err_r >= leeway {
                continue;
            }
            let score = err_l + err_r;
            match best {
                Some((best_score, _)) if best_score <= score => {}
                _ => best = Some((score, entry)),
            }
        }
        best.map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn profile(min_window: usize) -> RigProfile {
        RigProfile {
            variance_threshold: 0.05,
            min_window,
            abandon_cap: 10,
            ..RigProfile::default()
        }
    }

    fn calibrator(min_window: usize) -> GestureCalibrator {
        GestureCalibrator::new(Catalog::in_memory(), &profile(min_window))
    }

    fn hands() -> (PoseSample, PoseSample) {
        (PoseSample::at(-0.3, 0.0, 0.8), PoseSample::at(0.3, 0.0, 0.8))
    }

    #[test]
    fn test_stable_window_converges_after_min_window() {
        let mut cal = calibrator(20);
        let (l, r) = hands();
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);

        for i in 1..=20 {
            assert_eq!(cal.observe(&l, &r, &vehicle), TrainingState::Training, "tick {}", i);
        }
        assert_eq!(cal.observe(&l, &r, &vehicle), TrainingState::Converged);
    }

    #[test]
    fn test_small_jitter_still_converges() {
        let mut cal = calibrator(30);
        let (l, r) = hands();
        let mut last = TrainingState::Training;
        for i in 0..31 {
            let jitter = if i % 2 == 0 { 0.01 } else { -0.01 };
            let vehicle = PoseSample::at(jitter, 0.0, 1.0 + jitter);
            last = cal.observe(&l, &r, &vehicle);
        }
        assert_eq!(last, TrainingState::Converged);
    }

    #[test]
    fn test_unstable_window_abandons_and_empties() {
        let mut cal = calibrator(300);
        let (l, r) = hands();

        let mut states = Vec::new();
        for i in 0..11 {
            let vehicle = PoseSample::at(0.0, 0.0, 1.0 + 0.1 * i as f64);
            states.push(cal.observe(&l, &r, &vehicle));
        }
        assert!(states[..10].iter().all(|s| *s == TrainingState::Training));
        assert_eq!(states[10], TrainingState::Abandoned);
        assert!(cal.window().is_empty());
    }

    #[test]
    fn test_invalid_pose_breaks_grip() {
        let mut cal = calibrator(300);
        let (l, r) = hands();
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);

        assert_eq!(cal.observe(&l, &r, &PoseSample::lost()), TrainingState::Training);
        cal.observe(&l, &r, &vehicle);
        cal.observe(&l, &r, &vehicle);
        assert_eq!(cal.observe(&PoseSample::lost(), &r, &vehicle), TrainingState::Abandoned);
        assert!(cal.window().is_empty());
    }

    #[test]
    fn test_promote_takes_per_axis_median() {
        let mut cal = calibrator(300);
        let (l, r) = hands();
        let heights = [1.00, 1.02, 0.99, 1.01, 1.03];
        for z in heights {
            cal.observe(&l, &r, &PoseSample::at(0.0, 0.0, z));
        }

        let promotion = cal.promote();
        assert!(promotion.save_error.is_none());
        let grip = promotion.offset;
        assert_relative_eq!(grip.left[0], 0.3);
        assert_relative_eq!(grip.right[0], -0.3);
        assert_relative_eq!(grip.left[2], 1.01 - 0.8, epsilon = 1e-12);
        assert_relative_eq!(grip.right[2], 1.01 - 0.8, epsilon = 1e-12);
        assert!(cal.window().is_empty());
        assert_eq!(cal.catalog().len(), 1);
    }

    #[test]
    fn test_promote_keeps_grip_when_save_fails() {
        // Parent of the catalog path is a regular file, so every write fails
        let blocker = std::env::temp_dir().join("wand_flight_calibrator_blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let catalog = Catalog::load(&blocker.join("grips.json"));
        let mut cal = GestureCalibrator::new(catalog, &profile(300));

        let (l, r) = hands();
        for _ in 0..5 {
            cal.observe(&l, &r, &PoseSample::at(0.0, 0.0, 1.0));
        }
        let promotion = cal.promote();

        assert!(matches!(promotion.save_error, Some(FlightError::CatalogIo { .. })));
        assert_eq!(cal.catalog().len(), 1);
        let hit = cal.match_grip(&l, &r, &PoseSample::at(0.0, 0.0, 1.0), 0.1);
        assert_eq!(hit.map(|g| g.name.clone()), Some(promotion.offset.name));

        std::fs::remove_file(&blocker).unwrap();
    }

    #[test]
    fn test_median_ignores_single_outlier() {
        let base = vec![0.20, 0.21, 0.19, 0.22, 0.18, 0.20];
        let clean = median(base.clone());

        let mut high = base.clone();
        high[3] = 50.0; // replaces the largest
        assert_eq!(median(high), clean);

        let mut low = base;
        low[4] = -50.0; // replaces the smallest
        assert_eq!(median(low), clean);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(vec![4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(Vec::new()), 0.0);
    }

    fn catalog_with(entries: &[(&str, OffsetVec)]) -> GestureCalibrator {
        let mut catalog = Catalog::in_memory();
        for (name, values) in entries {
            catalog
                .append(CalibratedOffset::from_values(name.to_string(), *values))
                .unwrap();
        }
        GestureCalibrator::new(catalog, &profile(300))
    }

    #[test]
    fn test_match_exact_grip() {
        // Vehicle at (0,0,1), hands 0.3 either side and 0.2 below
        let cal = catalog_with(&[("A", [0.3, 0.0, 0.2, -0.3, 0.0, 0.2])]);
        let (l, r) = hands();
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);

        let hit = cal.match_grip(&l, &r, &vehicle, 0.1).map(|g| g.name.clone());
        assert_eq!(hit.as_deref(), Some("A"));

        let moved = PoseSample::at(l.x - 1.1, l.y, l.z);
        assert!(cal.match_grip(&moved, &r, &vehicle, 0.1).is_none());
        let moved = PoseSample::at(r.x, r.y + 1.1, r.z);
        assert!(cal.match_grip(&l, &moved, &vehicle, 0.1).is_none());
    }

    #[test]
    fn test_match_empty_catalog() {
        let cal = calibrator(300);
        let (l, r) = hands();
        assert!(cal.match_grip(&l, &r, &PoseSample::at(0.0, 0.0, 1.0), 10.0).is_none());
    }

    #[test]
    fn test_match_prefers_smallest_sum_then_first() {
        let cal = catalog_with(&[
            ("far", [0.3, 0.0, 0.25, -0.3, 0.0, 0.25]),
            ("near", [0.3, 0.0, 0.21, -0.3, 0.0, 0.21]),
            ("near_dup", [0.3, 0.0, 0.21, -0.3, 0.0, 0.21]),
        ]);
        let (l, r) = hands();
        let vehicle = PoseSample::at(0.0, 0.0, 1.0);

        let hit = cal.match_grip(&l, &r, &vehicle, 0.1).unwrap();
        assert_eq!(hit.name, "near");
    }

    #[test]
    fn test_progress_tracks_window() {
        let mut cal = calibrator(10);
        let (l, r) = hands();
        assert_eq!(cal.progress(), 0.0);
        for _ in 0..5 {
            cal.observe(&l, &r, &PoseSample::at(0.0, 0.0, 1.0));
        }
        assert_relative_eq!(cal.progress(), 0.5);
    }
}
