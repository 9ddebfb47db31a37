use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FlightError, FlightResult};
use crate::types::{OffsetVec, Point3, PoseSample};

/// A learned grip: where the vehicle sits relative to each wand.
///
/// `left` is vehicle − left wand, `right` is vehicle − right wand, both as
/// per-axis medians over a stable training window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibratedOffset {
    pub name: String,
    pub left: [f64; 3],
    pub right: [f64; 3],
}

impl CalibratedOffset {
    pub fn from_values(name: String, values: OffsetVec) -> Self {
        Self {
            name,
            left: [values[0], values[1], values[2]],
            right: [values[3], values[4], values[5]],
        }
    }

    pub fn values(&self) -> OffsetVec {
        [self.left[0], self.left[1], self.left[2], self.right[0], self.right[1], self.right[2]]
    }

    pub fn left_delta(&self) -> Point3 {
        Point3::from(self.left)
    }

    pub fn right_delta(&self) -> Point3 {
        Point3::from(self.right)
    }

    /// Where each hand should be for this grip given the vehicle position.
    pub fn implied_hands(&self, vehicle: &PoseSample) -> (Point3, Point3) {
        let v = vehicle.position();
        (v - self.left_delta(), v - self.right_delta())
    }

    /// Where the vehicle should be for this grip given both hands.
    pub fn implied_vehicle(&self, left: &PoseSample, right: &PoseSample) -> (Point3, Point3) {
        (left.position() + self.left_delta(), right.position() + self.right_delta())
    }

    /// Distance of each live hand from its implied position.
    pub fn hand_errors(&self, left: &PoseSample, right: &PoseSample, vehicle: &PoseSample) -> (f64, f64) {
        let (want_l, want_r) = self.implied_hands(vehicle);
        (left.distance_to(&want_l), right.distance_to(&want_r))
    }
}

pub fn timestamp_name(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d_%H-%M-%S%.3f").to_string()
}

/// Append-only store of learned grips.
///
/// On disk: one JSON object, entry name → six floats. Names are UTC
/// timestamps, so sorting by name restores insertion order on load.
pub struct Catalog {
    path: Option<PathBuf>,
    entries: Vec<CalibratedOffset>,
}

impl Catalog {
    /// Catalog that is never written anywhere.
    pub fn in_memory() -> Self {
        Self { path: None, entries: Vec::new() }
    }

    /// Load the catalog at `path`. A missing or unreadable file gives an
    /// empty catalog that will still be written to `path` on the next append.
    pub fn load(path: &Path) -> Self {
        let entries = match Self::read_entries(path) {
            Ok(entries) => {
                log::info!("Loaded {} calibrated grip(s) from {}", entries.len(), path.display());
                entries
            }
            Err(FlightError::CatalogIo { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No catalog at {}, starting empty", path.display());
                Vec::new()
            }
            Err(e) => {
                log::warn!("Ignoring unusable catalog: {}", e);
                Vec::new()
            }
        };

        Self { path: Some(path.to_path_buf()), entries }
    }

    fn read_entries(path: &Path) -> FlightResult<Vec<CalibratedOffset>> {
        let text = fs::read_to_string(path).map_err(|source| FlightError::CatalogIo {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |source| FlightError::CatalogParse { path: path.to_path_buf(), source };

        // Map keeps file order (preserve_order)
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text).map_err(parse_err)?;

        raw.into_iter()
            .map(|(name, value)| {
                let values: OffsetVec = serde_json::from_value(value).map_err(parse_err)?;
                Ok(CalibratedOffset::from_values(name, values))
            })
            .collect()
    }

    pub fn entries(&self) -> &[CalibratedOffset] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Name not yet used in the catalog, derived from `base`.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !self.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Add an entry and rewrite the whole file.
    ///
    /// The entry is kept in memory even when the write fails.
    pub fn append(&mut self, offset: CalibratedOffset) -> FlightResult<()> {
        self.entries.push(offset);
        self.save()
    }

    pub fn save(&self) -> FlightResult<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };

        let raw: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|e| (e.name.clone(), serde_json::Value::from(e.values().to_vec())))
            .collect();

        let io_err = |source| FlightError::CatalogIo { path: path.to_path_buf(), source };

        let json = serde_json::to_string_pretty(&raw).map_err(|source| FlightError::CatalogEncode {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }
}
