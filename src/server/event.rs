//
// PHD2-core - Telescope auto-guiding control engine
// Copyright (c) 2020-2026 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Server-pushed events, matching the event names and fields built by
//! `event_server.cpp`'s `ev_*` constructors, but serialized with
//! `serde_json` instead of hand-built string concatenation.
//!

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::guider::GuideStepInfo;

#[derive(Copy, Clone, Debug, Serialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl From<crate::geometry::Point> for Point2 {
    fn from(p: crate::geometry::Point) -> Point2 {
        Point2 { x: p.x, y: p.y }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "Event")]
pub enum Event {
    Version { #[serde(rename = "PHDVersion")] version: String, #[serde(rename = "PHDSubver")] subversion: String, msg_version: u32 },
    AppState { state: String },
    LockPositionSet { #[serde(rename = "X")] x: f64, #[serde(rename = "Y")] y: f64 },
    LockPositionLost,
    StarSelected { #[serde(rename = "X")] x: f64, #[serde(rename = "Y")] y: f64 },
    StarLost { frame: u64, avg_dist: f64, status: String },
    StartCalibration { mount: String },
    CalibrationComplete { mount: String },
    CalibrationFailed { reason: String },
    CalibrationDataFlipped { mount: String },
    StartGuiding,
    GuideStep {
        frame: u64,
        #[serde(rename = "Mount")]
        mount: String,
        dx: f64,
        dy: f64,
        #[serde(rename = "RADistanceRaw")]
        ra_distance_raw: f64,
        #[serde(rename = "DecDistanceRaw")]
        dec_distance_raw: f64,
        #[serde(rename = "RADuration")]
        ra_duration_ms: i64,
        #[serde(rename = "DecDuration")]
        dec_duration_ms: i64,
        #[serde(rename = "StarMass")]
        star_mass: f64,
        #[serde(rename = "SNR")]
        snr: f64,
        #[serde(rename = "HFD")]
        hfd: f64,
        #[serde(rename = "AvgDist")]
        avg_dist: f64,
    },
    GuidingDithered { dx: f64, dy: f64 },
    LoopingExposures { frame: u64 },
    LoopingExposuresStopped,
    Paused,
    Resumed,
    SettleBegin,
    Settling { distance: f64, time: f64, settle_time: f64 },
    SettleDone { status: u32, error: Option<String> },
}

impl Event {
    pub fn from_guide_step(info: &GuideStepInfo, mount_name: &str) -> Event {
        Event::GuideStep {
            frame: info.frame_number,
            mount: mount_name.to_string(),
            dx: info.camera_offset.x,
            dy: info.camera_offset.y,
            ra_distance_raw: info.primary_distance,
            dec_distance_raw: info.secondary_distance,
            ra_duration_ms: info.primary_duration_ms as i64,
            dec_duration_ms: info.secondary_duration_ms as i64,
            star_mass: info.star_mass,
            snr: info.star_snr,
            hfd: info.star_hfd,
            avg_dist: info.avg_distance,
        }
    }
}

/// Envelope wrapping every event with the common fields the original's
/// `Ev` base struct carries: timestamp and host/instance identity.
#[derive(Serialize)]
pub struct EventEnvelope<'a> {
    #[serde(flatten)]
    pub event: &'a Event,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub inst: u32,
}

impl<'a> EventEnvelope<'a> {
    pub fn new(event: &'a Event, timestamp: DateTime<Utc>, host: String, inst: u32) -> EventEnvelope<'a> {
        EventEnvelope { event, timestamp, host, inst }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut s = serde_json::to_string(self)?;
        s.push_str("\r\n");
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guide_step_serializes_with_tagged_event_name() {
        let info = GuideStepInfo {
            frame_number: 1,
            star_position: crate::geometry::Point::new(10.0, 10.0),
            camera_offset: crate::geometry::Point::new(0.1, -0.2),
            mount_offset: crate::geometry::Point::new(0.1, -0.2),
            primary_distance: 0.1,
            secondary_distance: -0.2,
            primary_correction: 0.05,
            secondary_correction: -0.1,
            primary_duration_ms: 12,
            secondary_duration_ms: 25,
            star_mass: 5000.0,
            star_snr: 20.0,
            star_hfd: 2.2,
            avg_distance: 0.15,
        };
        let event = Event::from_guide_step(&info, "Simulator");
        let envelope = EventEnvelope::new(&event, Utc::now(), "localhost".into(), 1);
        let json = envelope.to_json_line().unwrap();
        assert!(json.contains("\"Event\":\"GuideStep\""));
        assert!(json.ends_with("\r\n"));
    }
}
