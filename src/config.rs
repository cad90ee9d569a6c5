//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Persisted configuration: a `Profile` saved as JSON under the user's
//! config directory. Replaces the original's `glib::KeyFile`-backed
//! `Configuration` (a GTK type this headless crate has no reason to
//! depend on) with a plain serde-derived struct serving the same role.
//!

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::controller::SettleParams;
use crate::error::PhdError;

fn config_file_path(profile_name: &str) -> Option<PathBuf> {
    let mut dir = dirs::config_dir()?;
    dir.push("phd2-core");
    Some(dir.join(format!("{}.json", profile_name)))
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub last_mount: Option<String>,
    pub last_camera: Option<String>,
    pub exposure_ms: u32,
    pub calibration_pulse_ms: u32,
    pub calibration_distance_px: f64,
    /// Upper bound on a single guide pulse duration, in milliseconds.
    pub max_pulse_ms: u32,
    pub default_settle: SettleParams,
    pub min_star_hfd: f64,
    pub min_star_snr: f64,
    /// Scale the primary-axis pulse duration by
    /// `cos(currentDec)/cos(calibrationDec)` each guide step, compensating
    /// for RA rate changing with declination since calibration was run.
    pub dec_compensation_enabled: bool,
    /// Guide scope focal length, used with the camera's pixel size to
    /// derive `get_pixel_scale`'s arcsec/pixel figure.
    pub focal_length_mm: f64,
    /// Guide algorithm selected for the primary (RA) axis.
    pub primary_algorithm: AlgorithmKind,
    /// Guide algorithm selected for the secondary (Dec) axis.
    pub secondary_algorithm: AlgorithmKind,
}

impl Default for Profile {
    fn default() -> Profile {
        Profile {
            name: "default".to_string(),
            last_mount: None,
            last_camera: None,
            exposure_ms: 1000,
            calibration_pulse_ms: 500,
            calibration_distance_px: 25.0,
            max_pulse_ms: 8000,
            default_settle: SettleParams::default(),
            min_star_hfd: 1.5,
            min_star_snr: 6.0,
            dec_compensation_enabled: true,
            focal_length_mm: 1000.0,
            primary_algorithm: AlgorithmKind::default(),
            secondary_algorithm: AlgorithmKind::default(),
        }
    }
}

impl Profile {
    pub fn load(name: &str) -> Result<Profile, PhdError> {
        let path = config_file_path(name).ok_or_else(|| PhdError::Config("no config directory available".into()))?;
        if !path.exists() {
            return Ok(Profile { name: name.to_string(), ..Profile::default() });
        }
        let contents = fs::read_to_string(&path).map_err(|e| PhdError::Config(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| PhdError::Config(e.to_string()))
    }

    pub fn save(&self) -> Result<(), PhdError> {
        let path = config_file_path(&self.name).ok_or_else(|| PhdError::Config("no config directory available".into()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PhdError::Config(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(|e| PhdError::Config(e.to_string()))?;
        fs::write(&path, contents).map_err(|e| PhdError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_has_sane_exposure() {
        let profile = Profile::default();
        assert_eq!(profile.exposure_ms, 1000);
    }

    #[test]
    fn round_trips_through_json() {
        let profile = Profile::default();
        let json = serde_json::to_string(&profile).unwrap();
        let back: Profile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.exposure_ms, profile.exposure_ms);
    }
}
